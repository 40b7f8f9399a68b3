use super::account::TechnicianAccount;
use super::booking::{Booking, BookingStatus, PaymentStatus, Schedule};
use super::event::AuditEntry;
use super::money::MinorUnits;
use super::notification::Notification;
use super::pricing::{Customer, FeeConfig, ServiceCategory};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: Booking) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Booking>>;
    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Booking>>;
    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Booking>>;
    /// Compare-and-swap: replaces the stored booking only if its current
    /// status is one of `expected` and its version still equals
    /// `booking.version`. The stored copy carries the next version. Returns
    /// whether it wrote.
    async fn update_if_status(
        &self,
        booking: &Booking,
        expected: &[BookingStatus],
    ) -> Result<bool>;
    async fn get_all(&self) -> Result<Vec<Booking>>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Stores `schedule` as the only live schedule of its booking and
    /// returns the one it replaced.
    async fn replace_for_booking(&self, schedule: Schedule) -> Result<Option<Schedule>>;
    async fn get_for_booking(&self, booking_id: Uuid) -> Result<Option<Schedule>>;
    async fn store(&self, schedule: Schedule) -> Result<()>;
    /// Returns whether a schedule was removed.
    async fn delete_for_booking(&self, booking_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn store(&self, account: TechnicianAccount) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<TechnicianAccount>>;
    async fn find_by_applicant(&self, applicant: &str) -> Result<Option<TechnicianAccount>>;
    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<TechnicianAccount>>;
    /// Compare-and-swap keyed on the account's payment status.
    async fn update_if_payment_status(
        &self,
        account: &TechnicianAccount,
        expected: &[PaymentStatus],
    ) -> Result<bool>;
    async fn get_all(&self) -> Result<Vec<TechnicianAccount>>;
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Customer>>;
    async fn store(&self, customer: Customer) -> Result<()>;
}

/// Fee schedule and service categories. Maintained elsewhere; the engine
/// only reads them, once per operation.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn current_fees(&self) -> Result<Option<FeeConfig>>;
    async fn set_fees(&self, fees: FeeConfig) -> Result<()>;
    async fn category(&self, id: Uuid) -> Result<Option<ServiceCategory>>;
    async fn put_category(&self, category: ServiceCategory) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: MinorUnits,
    pub receipt: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: String,
    pub amount: MinorUnits,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, amount: MinorUnits, receipt: &str) -> Result<GatewayOrder>;
    async fn refund(&self, payment_id: &str, amount: MinorUnits) -> Result<GatewayRefund>;
}

/// Key-value store with expiry. Advisory only: losing an entry must never
/// lose data, at worst it duplicates a gateway order.
#[async_trait]
pub trait OrderCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<()>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type BookingStoreRef = Arc<dyn BookingStore>;
pub type ScheduleStoreRef = Arc<dyn ScheduleStore>;
pub type AccountStoreRef = Arc<dyn AccountStore>;
pub type CustomerStoreRef = Arc<dyn CustomerStore>;
pub type CatalogStoreRef = Arc<dyn CatalogStore>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type OrderCacheRef = Arc<dyn OrderCache>;
pub type NotifierRef = Arc<dyn Notifier>;
pub type AuditLogRef = Arc<dyn AuditLog>;
pub type ClockRef = Arc<dyn Clock>;
