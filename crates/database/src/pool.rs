use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::fs::File;
use std::io::BufReader;
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Build a deadpool config from the application's database settings
fn pool_config(config: &config::DatabaseConfig) -> Config {
    let mut cfg = Config::new();
    cfg.host = Some(
        config
            .host
            .clone()
            .unwrap_or_else(|| "localhost".to_string()),
    );
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.database.clone());
    cfg.user = Some(config.username.clone());
    cfg.password = Some(config.password.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(config.max_connections as usize));
    cfg
}

/// Create the connection pool, picking the TLS backend the config asks for
pub async fn create_pool(config: &config::DatabaseConfig) -> anyhow::Result<DbPool> {
    info!(
        "Creating database pool: host={:?}, port={}, database={}, max_connections={}, tls={}",
        config.host, config.port, config.database, config.max_connections, config.tls_enabled
    );

    let cfg = pool_config(config);
    let pool = if !config.tls_enabled {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {e}"))?
    } else if config.tls_accept_invalid_certs {
        create_pool_with_native_tls(cfg, true)?
    } else {
        create_pool_with_rustls(cfg, config.tls_ca_cert_path.as_deref())?
    };

    // Fail at startup rather than on the first request
    let client = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {e}"))?;
    client.simple_query("SELECT 1").await?;
    info!("Database connection established");

    Ok(pool)
}

/// Create pool using rustls with either custom certificate or platform verifier
pub fn create_pool_with_rustls(cfg: Config, cert_path: Option<&str>) -> anyhow::Result<Pool> {
    use tokio_postgres_rustls::MakeRustlsConnect;

    // Install the default crypto provider (ring) if not already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    let client_config = if let Some(cert_path) = cert_path {
        // Load custom certificate from file
        info!(
            "Using rustls with custom CA certificate from: {}",
            cert_path
        );
        debug!("Loading CA certificate from: {}", cert_path);

        let cert_file = File::open(cert_path)
            .map_err(|e| anyhow::anyhow!("Failed to open certificate file {}: {}", cert_path, e))?;
        let mut reader = BufReader::new(cert_file);

        // Parse the PEM certificates
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to parse certificate: {}", e))?;

        if certs.is_empty() {
            return Err(anyhow::anyhow!("No certificates found in {}", cert_path));
        }

        info!("Found {} certificate(s) in {}", certs.len(), cert_path);

        // Create root certificate store and add custom certificates
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs {
            root_store
                .add(cert)
                .map_err(|e| anyhow::anyhow!("Failed to add certificate to root store: {}", e))?;
        }

        info!(
            "Successfully loaded custom CA certificate from {}",
            cert_path
        );

        // Build TLS configuration with custom certificates
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    } else {
        // Use platform verifier for system certificates
        // This uses OS-native verification (Security.framework on macOS, etc.)
        // and includes revocation checking via OCSP/CRLs
        info!("Using rustls with platform verifier (OS certificate store)");

        use rustls_platform_verifier::ConfigVerifierExt;
        rustls::ClientConfig::with_platform_verifier()
            .map_err(|e| anyhow::anyhow!("Failed to create platform verifier: {}", e))?
    };

    let tls = MakeRustlsConnect::new(client_config);

    cfg.create_pool(Some(Runtime::Tokio1), tls)
        .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))
}

/// Create pool using native-tls (simpler for accepting self-signed certificates)
pub fn create_pool_with_native_tls(
    cfg: Config,
    accept_invalid_certs: bool,
) -> anyhow::Result<Pool> {
    use native_tls::TlsConnector;
    use postgres_native_tls::MakeTlsConnector;

    let mut builder = TlsConnector::builder();
    if accept_invalid_certs {
        info!("Configuring TLS to accept self-signed certificates");
        builder.danger_accept_invalid_certs(true);
    }

    let connector = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create TLS connector: {e}"))?;
    let tls = MakeTlsConnector::new(connector);

    cfg.create_pool(Some(Runtime::Tokio1), tls)
        .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {e}"))
}

pub type DbPool = Pool;
