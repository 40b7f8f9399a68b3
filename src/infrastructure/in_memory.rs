use crate::domain::account::TechnicianAccount;
use crate::domain::booking::{Booking, BookingStatus, PaymentStatus, Schedule};
use crate::domain::event::AuditEntry;
use crate::domain::notification::Notification;
use crate::domain::ports::{
    AccountStore, AuditLog, BookingStore, CatalogStore, CustomerStore, Notifier, OrderCache,
    ScheduleStore,
};
use crate::domain::pricing::{Customer, FeeConfig, ServiceCategory};
use crate::error::{MarketplaceError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

/// A thread-safe in-memory booking collection.
///
/// Conditional updates hold the write lock across the status and version
/// check and the write, which gives them compare-and-swap semantics.
#[derive(Default, Clone)]
pub struct InMemoryBookingStore {
    bookings: Arc<RwLock<HashMap<Uuid, Booking>>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert(&self, booking: Booking) -> Result<()> {
        let mut bookings = self.bookings.write().await;
        bookings.insert(booking.id, booking);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings.get(&id).cloned())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Booking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings.values().find(|b| b.order_id == order_id).cloned())
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Booking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings
            .values()
            .find(|b| b.payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn update_if_status(
        &self,
        booking: &Booking,
        expected: &[BookingStatus],
    ) -> Result<bool> {
        let mut bookings = self.bookings.write().await;
        let current = bookings
            .get(&booking.id)
            .ok_or_else(|| MarketplaceError::not_found("booking", booking.id))?;
        if !expected.contains(&current.status) || current.version != booking.version {
            return Ok(false);
        }
        let mut next = booking.clone();
        next.version += 1;
        bookings.insert(booking.id, next);
        Ok(true)
    }

    async fn get_all(&self) -> Result<Vec<Booking>> {
        let bookings = self.bookings.read().await;
        let mut all: Vec<Booking> = bookings.values().cloned().collect();
        all.sort_by_key(|b| b.created_at);
        Ok(all)
    }
}

/// Schedules keyed by booking, so there is never more than one per booking.
#[derive(Default, Clone)]
pub struct InMemoryScheduleStore {
    schedules: Arc<RwLock<HashMap<Uuid, Schedule>>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn replace_for_booking(&self, schedule: Schedule) -> Result<Option<Schedule>> {
        let mut schedules = self.schedules.write().await;
        Ok(schedules.insert(schedule.booking_id, schedule))
    }

    async fn get_for_booking(&self, booking_id: Uuid) -> Result<Option<Schedule>> {
        let schedules = self.schedules.read().await;
        Ok(schedules.get(&booking_id).cloned())
    }

    async fn store(&self, schedule: Schedule) -> Result<()> {
        let mut schedules = self.schedules.write().await;
        schedules.insert(schedule.booking_id, schedule);
        Ok(())
    }

    async fn delete_for_booking(&self, booking_id: Uuid) -> Result<bool> {
        let mut schedules = self.schedules.write().await;
        Ok(schedules.remove(&booking_id).is_some())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAccountStore {
    accounts: Arc<RwLock<HashMap<Uuid, TechnicianAccount>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn store(&self, account: TechnicianAccount) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.id, account);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<TechnicianAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&id).cloned())
    }

    async fn find_by_applicant(&self, applicant: &str) -> Result<Option<TechnicianAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().find(|a| a.applicant == applicant).cloned())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<TechnicianAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.order_id.as_deref() == Some(order_id))
            .cloned())
    }

    async fn update_if_payment_status(
        &self,
        account: &TechnicianAccount,
        expected: &[PaymentStatus],
    ) -> Result<bool> {
        let mut accounts = self.accounts.write().await;
        let current = accounts
            .get(&account.id)
            .ok_or_else(|| MarketplaceError::not_found("account", account.id))?;
        if !expected.contains(&current.payment_status) {
            return Ok(false);
        }
        accounts.insert(account.id, account.clone());
        Ok(true)
    }

    async fn get_all(&self) -> Result<Vec<TechnicianAccount>> {
        let accounts = self.accounts.read().await;
        let mut all: Vec<TechnicianAccount> = accounts.values().cloned().collect();
        all.sort_by_key(|a| a.created_at);
        Ok(all)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCustomerStore {
    customers: Arc<RwLock<HashMap<Uuid, Customer>>>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn get(&self, id: Uuid) -> Result<Option<Customer>> {
        let customers = self.customers.read().await;
        Ok(customers.get(&id).cloned())
    }

    async fn store(&self, customer: Customer) -> Result<()> {
        let mut customers = self.customers.write().await;
        customers.insert(customer.id, customer);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCatalogStore {
    fees: Arc<RwLock<Option<FeeConfig>>>,
    categories: Arc<RwLock<HashMap<Uuid, ServiceCategory>>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn current_fees(&self) -> Result<Option<FeeConfig>> {
        Ok(self.fees.read().await.clone())
    }

    async fn set_fees(&self, fees: FeeConfig) -> Result<()> {
        *self.fees.write().await = Some(fees);
        Ok(())
    }

    async fn category(&self, id: Uuid) -> Result<Option<ServiceCategory>> {
        let categories = self.categories.read().await;
        Ok(categories.get(&id).cloned())
    }

    async fn put_category(&self, category: ServiceCategory) -> Result<()> {
        let mut categories = self.categories.write().await;
        categories.insert(category.id, category);
        Ok(())
    }
}

/// TTL cache on `tokio::time::Instant`, so paused-clock tests can expire it.
/// Expired entries are dropped lazily on read.
#[derive(Default, Clone)]
pub struct InMemoryOrderCache {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl InMemoryOrderCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderCache for InMemoryOrderCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

/// Keeps every notification instead of delivering it.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub async fn count(&self, template: &str) -> usize {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| n.template() == template)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: Notification) -> Result<()> {
        self.sent.write().await.push(notification);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn booking(order_id: &str) -> Booking {
        Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            order_id.to_string(),
            Amount::new(dec!(500)).unwrap(),
            false,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_booking_lookup_by_current_order_only() {
        let store = InMemoryBookingStore::new();
        let mut b = booking("order_1");
        store.insert(b.clone()).await.unwrap();
        assert!(store.find_by_order_id("order_1").await.unwrap().is_some());

        b.order_id = "order_2".to_string();
        assert!(store.update_if_status(&b, &[BookingStatus::Pending]).await.unwrap());
        assert!(store.find_by_order_id("order_1").await.unwrap().is_none());
        assert_eq!(
            store.find_by_order_id("order_2").await.unwrap().unwrap().id,
            b.id
        );
    }

    #[tokio::test]
    async fn test_conditional_update_refuses_unexpected_status() {
        let store = InMemoryBookingStore::new();
        let b = booking("order_1");
        store.insert(b.clone()).await.unwrap();

        let mut confirmed = b.clone();
        confirmed.confirm_initial_payment("pay_1");
        assert!(store.update_if_status(&confirmed, &[BookingStatus::Pending]).await.unwrap());

        // A stale writer still believing the booking is pending loses.
        let mut cancelled = b.clone();
        cancelled.status = BookingStatus::Cancelled;
        assert!(!store.update_if_status(&cancelled, &[BookingStatus::Pending]).await.unwrap());

        let stored = store.get(b.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(
            store.find_by_payment_id("pay_1").await.unwrap().unwrap().id,
            b.id
        );
    }

    #[tokio::test]
    async fn test_conditional_update_refuses_stale_copy() {
        let store = InMemoryBookingStore::new();
        let b = booking("order_1");
        store.insert(b.clone()).await.unwrap();

        let mut first = b.clone();
        first.order_id = "order_2".to_string();
        assert!(store.update_if_status(&first, &[BookingStatus::Pending]).await.unwrap());

        // Same status, but read before the first write landed.
        let mut second = b.clone();
        second.order_id = "order_3".to_string();
        assert!(!store.update_if_status(&second, &[BookingStatus::Pending]).await.unwrap());

        let stored = store.get(b.id).await.unwrap().unwrap();
        assert_eq!(stored.order_id, "order_2");
        assert_eq!(stored.version, b.version + 1);
    }

    #[tokio::test]
    async fn test_conditional_update_of_missing_booking_errors() {
        let store = InMemoryBookingStore::new();
        let result = store
            .update_if_status(&booking("order_1"), &[BookingStatus::Pending])
            .await;
        assert!(matches!(result, Err(MarketplaceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_schedule_replacement_keeps_one_per_booking() {
        let store = InMemoryScheduleStore::new();
        let booking_id = Uuid::new_v4();
        let first = Schedule::propose(booking_id, Uuid::new_v4(), Utc::now());
        let second = Schedule::propose(booking_id, Uuid::new_v4(), Utc::now());

        assert!(store.replace_for_booking(first.clone()).await.unwrap().is_none());
        let replaced = store.replace_for_booking(second.clone()).await.unwrap();
        assert_eq!(replaced, Some(first));
        assert_eq!(store.get_for_booking(booking_id).await.unwrap(), Some(second));

        assert!(store.delete_for_booking(booking_id).await.unwrap());
        assert!(!store.delete_for_booking(booking_id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_cache_expires() {
        let cache = InMemoryOrderCache::new();
        cache
            .set("tech@example.com_order", "{}".to_string(), Duration::from_secs(900))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(cache.get("tech@example.com_order").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(cache.get("tech@example.com_order").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_account_conditional_update() {
        let store = InMemoryAccountStore::new();
        let mut account = TechnicianAccount::new(
            "tech@example.com".to_string(),
            Uuid::new_v4(),
            Amount::new(dec!(300)).unwrap(),
            None,
            Utc::now(),
        );
        account.order_id = Some("order_1".to_string());
        store.store(account.clone()).await.unwrap();

        let mut paid = account.clone();
        paid.activate("pay_1");
        assert!(
            store
                .update_if_payment_status(&paid, &[PaymentStatus::Pending])
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_if_payment_status(&account, &[PaymentStatus::Pending])
                .await
                .unwrap()
        );
        let stored = store.find_by_order_id("order_1").await.unwrap().unwrap();
        assert!(stored.is_paid);
        assert_eq!(
            store.find_by_applicant("tech@example.com").await.unwrap().unwrap().id,
            account.id
        );
    }
}
