use super::booking::RefundStatus;
use super::money::MinorUnits;
use crate::error::{MarketplaceError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const PAYMENT_CAPTURED: &str = "payment.captured";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const REFUND_CREATED: &str = "refund.created";
pub const REFUND_PROCESSED: &str = "refund.processed";
pub const REFUND_FAILED: &str = "refund.failed";

/// Payment object as the gateway attaches it to payment events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: String,
    pub amount: MinorUnits,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Refund object as the gateway attaches it to refund events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundEntity {
    pub id: String,
    pub payment_id: String,
    pub amount: MinorUnits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Wrapped<T> {
    entity: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PaymentPayload {
    payment: Wrapped<PaymentEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RefundPayload {
    refund: Wrapped<RefundEntity>,
}

/// A webhook event the engine knows how to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentCaptured(PaymentEntity),
    PaymentFailed(PaymentEntity),
    RefundCreated(RefundEntity),
    RefundProcessed(RefundEntity),
    RefundFailed(RefundEntity),
}

impl GatewayEvent {
    /// Decodes the payload for a known event kind. Unknown kinds yield
    /// `Ok(None)`; a known kind with a malformed payload is a validation error.
    pub fn decode(event: &str, payload: serde_json::Value) -> Result<Option<Self>> {
        let decoded = match event {
            PAYMENT_CAPTURED => Self::PaymentCaptured(payment(payload)?),
            PAYMENT_FAILED => Self::PaymentFailed(payment(payload)?),
            REFUND_CREATED => Self::RefundCreated(refund(payload)?),
            REFUND_PROCESSED => Self::RefundProcessed(refund(payload)?),
            REFUND_FAILED => Self::RefundFailed(refund(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PaymentCaptured(_) => PAYMENT_CAPTURED,
            Self::PaymentFailed(_) => PAYMENT_FAILED,
            Self::RefundCreated(_) => REFUND_CREATED,
            Self::RefundProcessed(_) => REFUND_PROCESSED,
            Self::RefundFailed(_) => REFUND_FAILED,
        }
    }

    /// Order id for payment events, payment id for refund events.
    pub fn reference(&self) -> &str {
        match self {
            Self::PaymentCaptured(p) | Self::PaymentFailed(p) => &p.order_id,
            Self::RefundCreated(r) | Self::RefundProcessed(r) | Self::RefundFailed(r) => {
                &r.payment_id
            }
        }
    }

    pub fn refund_status(&self) -> Option<RefundStatus> {
        match self {
            Self::RefundCreated(_) => Some(RefundStatus::Initiated),
            Self::RefundProcessed(_) => Some(RefundStatus::Processed),
            Self::RefundFailed(_) => Some(RefundStatus::Failed),
            _ => None,
        }
    }

    /// Re-encodes into the `{event, payload}` envelope the gateway sends.
    pub fn to_envelope(&self) -> serde_json::Value {
        let payload = match self {
            Self::PaymentCaptured(p) | Self::PaymentFailed(p) => serde_json::json!({
                "payment": { "entity": p }
            }),
            Self::RefundCreated(r) | Self::RefundProcessed(r) | Self::RefundFailed(r) => {
                serde_json::json!({ "refund": { "entity": r } })
            }
        };
        serde_json::json!({ "event": self.kind(), "payload": payload })
    }
}

fn payment(payload: serde_json::Value) -> Result<PaymentEntity> {
    Ok(entity::<PaymentPayload>(payload)?.payment.entity)
}

fn refund(payload: serde_json::Value) -> Result<RefundEntity> {
    Ok(entity::<RefundPayload>(payload)?.refund.entity)
}

fn entity<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| MarketplaceError::ValidationError(format!("Malformed webhook payload: {e}")))
}

/// What the ingress did with one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Applied,
    Duplicate,
    Dropped,
    Ignored,
    Faulted,
    /// Recorded by the engine itself when the ledger and the gateway disagree.
    Anomaly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event: String,
    pub reference: Option<String>,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
