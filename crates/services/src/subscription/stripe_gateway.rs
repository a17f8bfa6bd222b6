use async_trait::async_trait;
use stripe::{
    CheckoutSession as StripeCheckoutSession, CheckoutSessionId, CheckoutSessionMode,
    CheckoutSessionPaymentStatus, Client, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionPaymentMethodTypes, CreateCustomer, Customer, CustomerId, Expandable, Webhook, WebhookError,
};

use super::ports::{
    CheckoutGateway, CheckoutMetadata, CheckoutSession, GatewayError, GatewayEvent,
    SubscriptionError, WebhookVerifier, METADATA_USER_ID,
};

/// Placeholder Stripe substitutes with the session id on redirect
const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Checkout gateway backed by Stripe Checkout in one-off payment mode
pub struct StripeCheckoutGateway {
    client: Client,
    success_url: String,
    cancel_url: String,
}

impl StripeCheckoutGateway {
    pub fn new(secret_key: &str, success_url: String, cancel_url: String) -> Self {
        Self {
            client: Client::new(secret_key),
            success_url,
            cancel_url,
        }
    }

    /// Create the Stripe customer a first purchase will be correlated by
    async fn create_customer(&self, metadata: &CheckoutMetadata) -> Result<String, GatewayError> {
        let customer_metadata = metadata.user_id.as_ref().map(|user_id| {
            [(METADATA_USER_ID.to_string(), user_id.clone())]
                .into_iter()
                .collect()
        });

        let customer = Customer::create(
            &self.client,
            CreateCustomer {
                metadata: customer_metadata,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| GatewayError::Request(e.to_string()))?;

        tracing::info!(
            "Stripe customer created: customer_id={}, user_id={:?}",
            customer.id,
            metadata.user_id
        );

        Ok(customer.id.to_string())
    }
}

/// Append `session_id={CHECKOUT_SESSION_ID}` so the return handler can confirm
fn success_url_with_session_id(base: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}session_id={SESSION_ID_PLACEHOLDER}")
}

/// Convert a Stripe checkout session into the gateway-neutral model
fn session_from_stripe(session: StripeCheckoutSession) -> Result<CheckoutSession, GatewayError> {
    let customer_id = match &session.customer {
        Some(Expandable::Id(id)) => id.to_string(),
        Some(Expandable::Object(customer)) => customer.id.to_string(),
        None => {
            return Err(GatewayError::Malformed(format!(
                "checkout session {} has no customer",
                session.id
            )))
        }
    };

    // A purchase only exists once Stripe reports the session as paid
    let purchase_id = match session.payment_status {
        CheckoutSessionPaymentStatus::Paid => Some(match &session.payment_intent {
            Some(Expandable::Id(id)) => id.to_string(),
            Some(Expandable::Object(intent)) => intent.id.to_string(),
            None => session.id.to_string(),
        }),
        _ => None,
    };

    let metadata = session
        .metadata
        .as_ref()
        .map(CheckoutMetadata::from_map)
        .unwrap_or_default();

    Ok(CheckoutSession {
        session_id: session.id.to_string(),
        customer_id,
        purchase_id,
        redirect_url: session.url,
        metadata,
    })
}

#[async_trait]
impl CheckoutGateway for StripeCheckoutGateway {
    async fn create_session(
        &self,
        customer_id: Option<&str>,
        price_code: &str,
        metadata: &CheckoutMetadata,
    ) -> Result<CheckoutSession, GatewayError> {
        let customer_id = match customer_id {
            Some(id) => id.to_string(),
            None => self.create_customer(metadata).await?,
        };
        let customer: CustomerId = customer_id
            .parse()
            .map_err(|_| GatewayError::Malformed(format!("invalid customer id {customer_id}")))?;

        let success_url = success_url_with_session_id(&self.success_url);

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.customer = Some(customer);
        // Card payments settle before `checkout.session.completed` is sent
        params.payment_method_types = Some(vec![CreateCheckoutSessionPaymentMethodTypes::Card]);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&self.cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_code.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(metadata.to_map());

        let session = StripeCheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        tracing::info!(
            "Stripe checkout session created: session_id={}, customer_id={}",
            session.id,
            customer_id
        );

        session_from_stripe(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, GatewayError> {
        let id: CheckoutSessionId = session_id
            .parse()
            .map_err(|_| GatewayError::Malformed(format!("invalid session id {session_id}")))?;

        let session = StripeCheckoutSession::retrieve(&self.client, &id, &[])
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        session_from_stripe(session)
    }
}

/// Verifies Stripe webhook signatures
pub struct StripeWebhookVerifier {
    webhook_secret: String,
}

impl StripeWebhookVerifier {
    pub fn new(webhook_secret: String) -> Self {
        Self { webhook_secret }
    }
}

impl WebhookVerifier for StripeWebhookVerifier {
    fn verify(&self, payload: &[u8], signature: &str) -> Result<GatewayEvent, SubscriptionError> {
        let payload_str = std::str::from_utf8(payload).map_err(|e| {
            SubscriptionError::WebhookVerificationFailed(format!("Invalid UTF-8: {}", e))
        })?;

        // construct_event both verifies and parses; only the verification result matters here
        if let Err(e) = Webhook::construct_event(payload_str, signature, &self.webhook_secret) {
            match e {
                WebhookError::BadKey
                | WebhookError::BadSignature
                | WebhookError::BadTimestamp(_)
                | WebhookError::BadHeader(_) => {
                    tracing::error!("Webhook signature verification failed: error={}", e);
                    return Err(SubscriptionError::WebhookVerificationFailed(e.to_string()));
                }
                // Signature is fine; the event type is just unknown to the Stripe crate
                WebhookError::BadParse(_) => {
                    tracing::debug!("Webhook event parsing failed (signature OK): error={}", e);
                }
            }
        }

        parse_gateway_event(payload)
    }
}

/// Extract id, type and (for checkout events) the session id from a webhook body
pub fn parse_gateway_event(payload: &[u8]) -> Result<GatewayEvent, SubscriptionError> {
    let json: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
        SubscriptionError::WebhookVerificationFailed(format!("Invalid JSON: {}", e))
    })?;

    let event_id = json
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let event_type = json
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let session_id = if event_type.starts_with("checkout.session.") {
        json.get("data")
            .and_then(|d| d.get("object"))
            .and_then(|o| o.get("id"))
            .and_then(|id| id.as_str())
            .map(str::to_string)
    } else {
        None
    };

    Ok(GatewayEvent {
        event_id,
        event_type,
        session_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_url_with_session_id() {
        assert_eq!(
            success_url_with_session_id("https://catalog.example.com/paid"),
            "https://catalog.example.com/paid?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(
            success_url_with_session_id("https://catalog.example.com/paid?src=app"),
            "https://catalog.example.com/paid?src=app&session_id={CHECKOUT_SESSION_ID}"
        );
    }

    #[test]
    fn test_parse_checkout_completed_event() {
        let payload = json!({
            "id": "evt_123",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_test_abc", "object": "checkout.session" } }
        });
        let event = parse_gateway_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_id, "evt_123");
        assert!(event.confirms_checkout());
        assert_eq!(event.session_id.as_deref(), Some("cs_test_abc"));
    }

    #[test]
    fn test_parse_async_payment_succeeded_event() {
        let payload = json!({
            "id": "evt_124",
            "type": "checkout.session.async_payment_succeeded",
            "data": { "object": { "id": "cs_test_delayed", "object": "checkout.session" } }
        });
        let event = parse_gateway_event(payload.to_string().as_bytes()).unwrap();
        assert!(event.confirms_checkout());
        assert_eq!(event.session_id.as_deref(), Some("cs_test_delayed"));
    }

    #[test]
    fn test_parse_non_checkout_event_has_no_session() {
        let payload = json!({
            "id": "evt_456",
            "type": "invoice.paid",
            "data": { "object": { "id": "in_789" } }
        });
        let event = parse_gateway_event(payload.to_string().as_bytes()).unwrap();
        assert!(!event.confirms_checkout());
        assert_eq!(event.session_id, None);
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = parse_gateway_event(b"not json").unwrap_err();
        assert!(matches!(err, SubscriptionError::WebhookVerificationFailed(_)));
    }

    #[test]
    fn test_stripe_verifier_rejects_bad_signature() {
        let verifier = StripeWebhookVerifier::new("whsec_test_secret".to_string());
        let payload = json!({ "id": "evt_1", "type": "checkout.session.completed" }).to_string();
        let err = verifier
            .verify(payload.as_bytes(), "t=1,v1=deadbeef")
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::WebhookVerificationFailed(_)));
    }
}
