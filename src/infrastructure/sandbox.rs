use crate::domain::money::MinorUnits;
use crate::domain::ports::{ClockRef, GatewayOrder, GatewayRefund, PaymentGateway};
use crate::error::{MarketplaceError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// An offline stand-in for the payment gateway.
///
/// Order and refund ids come from a counter, so runs are reproducible.
/// Failures and latency can be injected to exercise the gateway error paths.
#[derive(Clone)]
pub struct SandboxGateway {
    clock: ClockRef,
    namespace: Option<String>,
    sequence: Arc<AtomicU64>,
    orders: Arc<RwLock<Vec<GatewayOrder>>>,
    refunds: Arc<RwLock<Vec<GatewayRefund>>>,
    fail_orders: Arc<AtomicBool>,
    fail_refunds: Arc<AtomicBool>,
    latency: Arc<RwLock<Option<Duration>>>,
}

impl SandboxGateway {
    pub fn new(clock: ClockRef) -> Self {
        Self {
            clock,
            namespace: None,
            sequence: Arc::new(AtomicU64::new(0)),
            orders: Arc::default(),
            refunds: Arc::default(),
            fail_orders: Arc::new(AtomicBool::new(false)),
            fail_refunds: Arc::new(AtomicBool::new(false)),
            latency: Arc::default(),
        }
    }

    /// Tags every id with `namespace`, keeping ids from separate runs over
    /// one persistent ledger apart.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    /// Delay applied to every call before it answers.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    pub async fn orders(&self) -> Vec<GatewayOrder> {
        self.orders.read().await.clone()
    }

    pub async fn refunds(&self) -> Vec<GatewayRefund> {
        self.refunds.read().await.clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.namespace {
            Some(namespace) => format!("{prefix}_{namespace}_{n:06}"),
            None => format!("{prefix}_{n:06}"),
        }
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_order(&self, amount: MinorUnits, receipt: &str) -> Result<GatewayOrder> {
        self.simulate_latency().await;
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(MarketplaceError::GatewayError(
                "order creation rejected".to_string(),
            ));
        }
        if amount.0 <= 0 {
            return Err(MarketplaceError::GatewayError(format!(
                "order amount must be positive, got {}",
                amount.0
            )));
        }

        let order = GatewayOrder {
            id: self.next_id("order"),
            amount,
            receipt: receipt.to_string(),
            created_at: self.clock.now(),
        };
        debug!(order_id = %order.id, amount = amount.0, "Sandbox order created");
        self.orders.write().await.push(order.clone());
        Ok(order)
    }

    async fn refund(&self, payment_id: &str, amount: MinorUnits) -> Result<GatewayRefund> {
        self.simulate_latency().await;
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(MarketplaceError::GatewayError(format!(
                "refund of {payment_id} rejected"
            )));
        }

        let refund = GatewayRefund {
            id: self.next_id("rfnd"),
            payment_id: payment_id.to_string(),
            amount,
        };
        debug!(refund_id = %refund.id, %payment_id, "Sandbox refund issued");
        self.refunds.write().await.push(refund.clone());
        Ok(refund)
    }
}
