use super::signature;
use crate::application::engine::MarketplaceEngine;
use crate::domain::event::{AuditEntry, AuditOutcome, GatewayEvent};
use crate::error::{MarketplaceError, Result};
use serde::Deserialize;
use tracing::{error, info, warn};

/// Header the gateway puts the body signature in.
pub const SIGNATURE_HEADER: &str = "X-Razorpay-Signature";

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Acknowledgement returned to the gateway for a verified delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookAck {
    pub outcome: AuditOutcome,
}

/// Webhook ingress.
///
/// Only a signature mismatch is refused. Every other failure is written to
/// the audit log and acknowledged anyway: the gateway's retry policy is
/// coarser than the engine's own idempotency, and replays are harmless.
#[derive(Clone)]
pub struct WebhookIngress {
    engine: MarketplaceEngine,
}

impl WebhookIngress {
    pub fn new(engine: MarketplaceEngine) -> Self {
        Self { engine }
    }

    pub async fn handle(&self, body: &[u8], signature_header: &str) -> Result<WebhookAck> {
        let secret = &self.engine.context().policy.webhook_secret;
        if !signature::verify(secret, body, signature_header) {
            warn!(body_len = body.len(), "Rejected webhook with invalid signature");
            return Err(MarketplaceError::InvalidSignature);
        }

        let envelope: Envelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                let detail = format!("Unreadable envelope: {e}");
                return Ok(self.acknowledge("unknown", None, AuditOutcome::Faulted, Some(detail)).await);
            }
        };

        let event = match GatewayEvent::decode(&envelope.event, envelope.payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                info!(event = %envelope.event, "Ignoring unsupported webhook event");
                return Ok(self.acknowledge(&envelope.event, None, AuditOutcome::Ignored, None).await);
            }
            Err(e) => {
                return Ok(self
                    .acknowledge(&envelope.event, None, AuditOutcome::Faulted, Some(e.to_string()))
                    .await);
            }
        };

        let kind = event.kind();
        let reference = event.reference().to_string();
        match self.engine.apply_event(event).await {
            Ok(outcome) => Ok(self.acknowledge(kind, Some(reference), outcome, None).await),
            Err(e) => {
                error!(
                    event = kind,
                    %reference,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Webhook application failed"
                );
                Ok(self
                    .acknowledge(kind, Some(reference), AuditOutcome::Faulted, Some(e.to_string()))
                    .await)
            }
        }
    }

    /// Applied and duplicate deliveries are only traced; everything else
    /// also lands in the audit log.
    async fn acknowledge(
        &self,
        event: &str,
        reference: Option<String>,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) -> WebhookAck {
        match outcome {
            AuditOutcome::Applied | AuditOutcome::Duplicate => {
                info!(event, reference = reference.as_deref(), ?outcome, "Webhook acknowledged");
            }
            _ => {
                self.engine
                    .context()
                    .audit(AuditEntry {
                        event: event.to_string(),
                        reference,
                        outcome,
                        detail,
                        recorded_at: self.engine.context().clock.now(),
                    })
                    .await;
            }
        }
        WebhookAck { outcome }
    }
}
