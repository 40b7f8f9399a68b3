use chrono::TimeDelta;
use std::time::Duration;

/// Reference cancellation policy: cancelling a paid booking this long after
/// creation imposes a fine on the customer's next booking.
pub const DEFAULT_FINE_GRACE_MINUTES: i64 = 25;
pub const DEFAULT_ORDER_TTL_MINUTES: u64 = 15;
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

/// Operational knobs of the engine. Fee amounts are not here: they live in
/// the ledger and are read per operation.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub fine_grace_period: TimeDelta,
    /// Idempotency window for onboarding orders.
    pub order_ttl: Duration,
    pub gateway_timeout: Duration,
    /// Key for the verify-payment signature over `order_id|payment_id`.
    pub payment_secret: String,
    /// Key for the webhook body signature.
    pub webhook_secret: String,
}

impl PolicyConfig {
    pub fn new(payment_secret: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            fine_grace_period: TimeDelta::minutes(DEFAULT_FINE_GRACE_MINUTES),
            order_ttl: Duration::from_secs(DEFAULT_ORDER_TTL_MINUTES * 60),
            gateway_timeout: Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
            payment_secret: payment_secret.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn with_fine_grace_minutes(mut self, minutes: i64) -> Self {
        self.fine_grace_period = TimeDelta::minutes(minutes);
        self
    }

    pub fn with_order_ttl_minutes(mut self, minutes: u64) -> Self {
        self.order_ttl = Duration::from_secs(minutes * 60);
        self
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }
}
