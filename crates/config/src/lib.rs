use serde::Deserialize;
use std::collections::HashMap;

/// Read a secret from `<file_var>` when set, else from `<var>`.
///
/// A `_FILE` variable that points at an unreadable file is a deployment
/// error and aborts startup.
fn secret_from_env(var: &str, file_var: &str, fallback: &str) -> String {
    if let Ok(path) = std::env::var(file_var) {
        std::fs::read_to_string(&path)
            .map(|p| p.trim().to_string())
            .unwrap_or_else(|e| panic!("Failed to read {} at {}: {}", file_var, path, e))
    } else {
        std::env::var(var).unwrap_or_else(|_| fallback.to_string())
    }
}

fn parsed_env<T: std::str::FromStr>(var: &str, fallback: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

/// Non-empty value of an environment variable
fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
    pub tls_enabled: bool,
    pub tls_ca_cert_path: Option<String>,
    /// Use native-tls and accept self-signed server certificates
    pub tls_accept_invalid_certs: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("DATABASE_HOST").ok(),
            port: parsed_env("DATABASE_PORT", 5432),
            database: std::env::var("DATABASE_NAME").unwrap_or_else(|_| "catalog".to_string()),
            username: std::env::var("DATABASE_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: secret_from_env("DATABASE_PASSWORD", "DATABASE_PASSWORD_FILE", "postgres"),
            max_connections: parsed_env("DATABASE_MAX_CONNECTIONS", 10),
            tls_enabled: parsed_env("DATABASE_TLS_ENABLED", false),
            tls_ca_cert_path: std::env::var("DATABASE_TLS_CA_CERT_PATH").ok(),
            tls_accept_invalid_certs: parsed_env("DATABASE_TLS_ACCEPT_INVALID_CERTS", false),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed_env("SERVER_PORT", 8080),
        }
    }
}

/// Stripe credentials
#[derive(Clone, Deserialize)]
pub struct StripeConfig {
    /// Stripe secret key for API authentication
    pub secret_key: String,
    /// Stripe webhook secret for verifying webhook signatures
    pub webhook_secret: String,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: secret_from_env("STRIPE_SECRET_KEY", "STRIPE_SECRET_KEY_FILE", ""),
            webhook_secret: secret_from_env(
                "STRIPE_WEBHOOK_SECRET",
                "STRIPE_WEBHOOK_SECRET_FILE",
                "",
            ),
        }
    }
}

impl StripeConfig {
    pub fn is_configured(&self) -> bool {
        !self.secret_key.is_empty()
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &str| if s.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("StripeConfig")
            .field("secret_key", &redact(&self.secret_key))
            .field("webhook_secret", &redact(&self.webhook_secret))
            .finish()
    }
}

/// Purchasable durations and where the hosted checkout page sends the user back to
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutConfig {
    /// Gateway price code for `1_day`
    pub price_1_day: Option<String>,
    /// Gateway price code for `7_days`
    pub price_7_days: Option<String>,
    /// Gateway price code for `1_month`
    pub price_1_month: Option<String>,
    /// Return URL after payment; `session_id` is appended by the gateway
    pub success_url: String,
    /// Return URL when the user abandons payment
    pub cancel_url: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            price_1_day: non_empty_env("STRIPE_PRICE_1_DAY"),
            price_7_days: non_empty_env("STRIPE_PRICE_7_DAYS"),
            price_1_month: non_empty_env("STRIPE_PRICE_1_MONTH"),
            success_url: std::env::var("SUCCESS_URL").unwrap_or_else(|_| {
                "http://localhost:8080/v1/subscriptions/success".to_string()
            }),
            cancel_url: std::env::var("CANCEL_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1/subscriptions/cancel".to_string()),
        }
    }
}

impl CheckoutConfig {
    /// Price code configured for a duration's wire name, if any
    pub fn price_for(&self, duration: &str) -> Option<&str> {
        match duration {
            "1_day" => self.price_1_day.as_deref(),
            "7_days" => self.price_7_days.as_deref(),
            "1_month" => self.price_1_month.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub exact_matches: Vec<String>,
    pub wildcard_suffixes: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        let raw_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        Self::parse(&raw_origins)
    }
}

impl CorsConfig {
    /// Split a comma-separated origin list; `*suffix` entries match subdomains
    pub fn parse(raw_origins: &str) -> Self {
        let mut exact_matches = Vec::new();
        let mut wildcard_suffixes = Vec::new();

        for origin in raw_origins.split(',').map(str::trim) {
            if origin.is_empty() {
                continue;
            }

            match origin.strip_prefix('*') {
                Some(suffix) if suffix.starts_with('.') || suffix.starts_with('-') => {
                    wildcard_suffixes.push(suffix.to_string())
                }
                Some(suffix) => wildcard_suffixes.push(format!(".{}", suffix)),
                None => exact_matches.push(origin.to_string()),
            }
        }

        Self {
            exact_matches,
            wildcard_suffixes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level: "error", "warn", "info", "debug" or "trace".
    pub level: String,
    /// Output format: "pretty" or "json".
    pub format: String,
    /// Per-module log levels.
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let modules = [
            ("api", "LOG_MODULE_API"),
            ("services", "LOG_MODULE_SERVICES"),
            ("database", "LOG_MODULE_DATABASE"),
        ]
        .into_iter()
        .filter_map(|(module, var)| {
            std::env::var(var)
                .ok()
                .map(|level| (module.to_string(), level))
        })
        .collect();

        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            modules,
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive string, e.g. `info,services=debug`
    pub fn filter_directives(&self) -> String {
        let mut modules: Vec<_> = self.modules.iter().collect();
        modules.sort();
        std::iter::once(self.level.clone())
            .chain(modules.into_iter().map(|(m, l)| format!("{m}={l}")))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub stripe: StripeConfig,
    pub checkout: CheckoutConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            stripe: StripeConfig::default(),
            checkout: CheckoutConfig::default(),
            cors: CorsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
