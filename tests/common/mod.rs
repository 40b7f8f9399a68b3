#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use marketplace_ledger::application::booking::BookingReceipt;
use marketplace_ledger::application::context::EngineContext;
use marketplace_ledger::application::engine::MarketplaceEngine;
use marketplace_ledger::config::PolicyConfig;
use marketplace_ledger::domain::booking::Booking;
use marketplace_ledger::domain::event::{GatewayEvent, PaymentEntity, RefundEntity};
use marketplace_ledger::domain::money::{Amount, MinorUnits};
use marketplace_ledger::domain::ports::{BookingStore, CatalogStore, CustomerStore, CustomerStoreRef};
use marketplace_ledger::domain::pricing::{Customer, FeeConfig, ServiceCategory};
use marketplace_ledger::error::{MarketplaceError, Result};
use marketplace_ledger::infrastructure::clock::ManualClock;
use marketplace_ledger::infrastructure::in_memory::{
    InMemoryAccountStore, InMemoryAuditLog, InMemoryBookingStore, InMemoryCatalogStore,
    InMemoryCustomerStore, InMemoryOrderCache, InMemoryScheduleStore, RecordingNotifier,
};
use marketplace_ledger::infrastructure::sandbox::SandboxGateway;
use marketplace_ledger::interfaces::signature;
use marketplace_ledger::interfaces::verify::{PaymentVerifier, VerifyPaymentRequest};
use marketplace_ledger::interfaces::webhook::WebhookIngress;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

pub const PAYMENT_SECRET: &str = "test_payment_secret";
pub const WEBHOOK_SECRET: &str = "test_webhook_secret";

/// An engine over in-memory adapters, with handles on every adapter so tests
/// can inspect what the engine did.
pub struct Harness {
    pub engine: MarketplaceEngine,
    pub bookings: InMemoryBookingStore,
    pub schedules: InMemoryScheduleStore,
    pub accounts: InMemoryAccountStore,
    pub customers: InMemoryCustomerStore,
    pub catalog: InMemoryCatalogStore,
    pub gateway: SandboxGateway,
    pub cache: InMemoryOrderCache,
    pub notifier: RecordingNotifier,
    pub audit: InMemoryAuditLog,
    pub clock: ManualClock,
    pub category: ServiceCategory,
    pub customer_id: Uuid,
}

/// Customer store whose reads pass through and whose writes all fail.
pub struct RejectingWrites(pub InMemoryCustomerStore);

#[async_trait]
impl CustomerStore for RejectingWrites {
    async fn get(&self, id: Uuid) -> Result<Option<Customer>> {
        self.0.get(id).await
    }

    async fn store(&self, _customer: Customer) -> Result<()> {
        Err(MarketplaceError::StorageError("customer store is read-only".to_string()))
    }
}

pub fn fees() -> FeeConfig {
    FeeConfig {
        booking_fee: Amount::new(dec!(500)).unwrap(),
        fine_amount: Amount::new(dec!(100)).unwrap(),
        onboarding_fee: Amount::new(dec!(1000)).unwrap(),
    }
}

impl Harness {
    pub async fn new() -> Self {
        let harness = Self::with_policy(PolicyConfig::new(PAYMENT_SECRET, WEBHOOK_SECRET)).await;
        harness.catalog.set_fees(fees()).await.unwrap();
        harness
    }

    /// No fee schedule is configured.
    pub async fn with_policy(policy: PolicyConfig) -> Self {
        Self::assemble(policy, |customers| Arc::new(customers) as CustomerStoreRef).await
    }

    /// Fees seeded, with the engine reaching customers through `wrap`. The
    /// harness keeps a handle on the unwrapped store.
    pub async fn with_customer_store(
        wrap: impl FnOnce(InMemoryCustomerStore) -> CustomerStoreRef,
    ) -> Self {
        let policy = PolicyConfig::new(PAYMENT_SECRET, WEBHOOK_SECRET);
        let harness = Self::assemble(policy, wrap).await;
        harness.catalog.set_fees(fees()).await.unwrap();
        harness
    }

    async fn assemble(
        policy: PolicyConfig,
        wrap: impl FnOnce(InMemoryCustomerStore) -> CustomerStoreRef,
    ) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let bookings = InMemoryBookingStore::new();
        let schedules = InMemoryScheduleStore::new();
        let accounts = InMemoryAccountStore::new();
        let customers = InMemoryCustomerStore::new();
        let catalog = InMemoryCatalogStore::new();
        let gateway = SandboxGateway::new(Arc::new(clock.clone()));
        let cache = InMemoryOrderCache::new();
        let notifier = RecordingNotifier::new();
        let audit = InMemoryAuditLog::new();

        let category = ServiceCategory {
            id: Uuid::new_v4(),
            name: "Plumbing".to_string(),
            min_pay_rate: Amount::new(dec!(200)).unwrap(),
            max_pay_rate: Amount::new(dec!(800)).unwrap(),
        };
        catalog.put_category(category.clone()).await.unwrap();

        let ctx = EngineContext {
            bookings: Arc::new(bookings.clone()),
            schedules: Arc::new(schedules.clone()),
            accounts: Arc::new(accounts.clone()),
            customers: wrap(customers.clone()),
            catalog: Arc::new(catalog.clone()),
            gateway: Arc::new(gateway.clone()),
            cache: Arc::new(cache.clone()),
            notifier: Arc::new(notifier.clone()),
            audit: Arc::new(audit.clone()),
            clock: Arc::new(clock.clone()),
            policy,
        };

        Self {
            engine: MarketplaceEngine::new(ctx),
            bookings,
            schedules,
            accounts,
            customers,
            catalog,
            gateway,
            cache,
            notifier,
            audit,
            clock,
            category,
            customer_id: Uuid::new_v4(),
        }
    }

    pub fn verifier(&self) -> PaymentVerifier {
        PaymentVerifier::new(self.engine.clone())
    }

    pub fn ingress(&self) -> WebhookIngress {
        WebhookIngress::new(self.engine.clone())
    }

    pub async fn book(&self) -> BookingReceipt {
        self.engine
            .bookings
            .create(self.customer_id, self.category.id)
            .await
            .unwrap()
    }

    pub async fn booking(&self, id: Uuid) -> Booking {
        self.bookings.get(id).await.unwrap().unwrap()
    }

    /// A booking whose upfront fee has been captured.
    pub async fn confirmed_booking(&self, payment_id: &str) -> Booking {
        let receipt = self.book().await;
        let request = verify_request(&receipt.order.id, payment_id, &self.customer_id.to_string());
        self.verifier().verify_initial(&request).await.unwrap();
        self.booking(receipt.booking.id).await
    }

    /// A booking with `employee_id` accepted and at work.
    pub async fn started_booking(&self, employee_id: Uuid) -> Booking {
        let booking = self.confirmed_booking("pay_initial").await;
        self.engine.bookings.assign(booking.id, employee_id).await.unwrap();
        self.engine.bookings.accept(booking.id, employee_id).await.unwrap();
        self.engine.bookings.start(booking.id, employee_id).await.unwrap();
        self.booking(booking.id).await
    }

    /// Signs and delivers an event through the webhook ingress.
    pub async fn deliver(&self, event: &GatewayEvent) {
        let (body, header) = signed_body(event);
        self.ingress().handle(&body, &header).await.unwrap();
    }
}

pub fn verify_request(order_id: &str, payment_id: &str, identity: &str) -> VerifyPaymentRequest {
    let message = signature::payment_message(order_id, payment_id);
    VerifyPaymentRequest {
        order_id: order_id.to_string(),
        payment_id: payment_id.to_string(),
        signature: signature::sign(PAYMENT_SECRET, message.as_bytes()).unwrap(),
        customer_identity: identity.to_string(),
    }
}

pub fn signed_body(event: &GatewayEvent) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&event.to_envelope()).unwrap();
    let header = signature::sign(WEBHOOK_SECRET, &body).unwrap();
    (body, header)
}

pub fn captured(order_id: &str, payment_id: &str, amount: i64) -> GatewayEvent {
    GatewayEvent::PaymentCaptured(PaymentEntity {
        id: payment_id.to_string(),
        order_id: order_id.to_string(),
        amount: MinorUnits(amount),
        error_description: None,
    })
}

pub fn failed(order_id: &str, payment_id: &str, amount: i64) -> GatewayEvent {
    GatewayEvent::PaymentFailed(PaymentEntity {
        id: payment_id.to_string(),
        order_id: order_id.to_string(),
        amount: MinorUnits(amount),
        error_description: Some("card declined".to_string()),
    })
}

pub fn refund_processed(refund_id: &str, payment_id: &str, amount: i64) -> GatewayEvent {
    GatewayEvent::RefundProcessed(RefundEntity {
        id: refund_id.to_string(),
        payment_id: payment_id.to_string(),
        amount: MinorUnits(amount),
    })
}

pub fn refund_created(refund_id: &str, payment_id: &str, amount: i64) -> GatewayEvent {
    GatewayEvent::RefundCreated(RefundEntity {
        id: refund_id.to_string(),
        payment_id: payment_id.to_string(),
        amount: MinorUnits(amount),
    })
}
