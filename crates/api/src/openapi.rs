use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::OpenApi;

/// OpenAPI documentation configuration
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Catalog Subscription API",
        description = "Plan purchases, subscription status and content entitlement checks.",
        version = "1.0.0",
        license(name = "MIT",)
    ),
    paths(
        crate::routes::health_check,
        // Subscription endpoints
        crate::routes::subscriptions::create_subscription,
        crate::routes::subscriptions::checkout_success,
        crate::routes::subscriptions::checkout_cancelled,
        crate::routes::subscriptions::get_subscription_status,
        crate::routes::subscriptions::get_subscription,
        crate::routes::subscriptions::cancel_subscription,
        crate::routes::subscriptions::handle_stripe_webhook,
        // Entitlement endpoints
        crate::routes::entitlements::check_entitlement,
    ),
    components(schemas(
        crate::error::ApiErrorResponse,
        crate::routes::HealthResponse,
        crate::routes::subscriptions::CreateSubscriptionRequest,
        crate::routes::subscriptions::CreateSubscriptionResponse,
        crate::routes::subscriptions::SubscriptionResponse,
        crate::routes::subscriptions::MessageResponse,
        crate::routes::entitlements::EntitlementCheckRequest,
        crate::routes::entitlements::EntitlementCheckResponse,
        services::subscription::ports::PlanView,
        services::subscription::ports::PlanType,
        services::subscription::ports::SubscriptionStatus,
        services::subscription::ports::DurationCode,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Subscriptions", description = "Plan purchase and subscription lifecycle"),
        (name = "Entitlements", description = "Content access decisions")
    )
)]
pub struct ApiDoc;

/// Security scheme addon for Bearer token authentication
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_token",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("session_token")
                        .description(Some("Session token issued by the identity provider"))
                        .build(),
                ),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/v1/subscriptions",
            "/v1/subscriptions/success",
            "/v1/subscriptions/cancel",
            "/v1/subscriptions/status",
            "/v1/subscriptions/stripe/webhook",
            "/v1/entitlements/check",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
