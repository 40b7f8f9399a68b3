use crate::domain::account::TechnicianAccount;
use crate::domain::booking::{Booking, BookingStatus, PaymentStatus, Schedule};
use crate::domain::ports::{AccountStore, BookingStore, CatalogStore, CustomerStore, ScheduleStore};
use crate::domain::pricing::{Customer, FeeConfig, ServiceCategory};
use crate::error::{MarketplaceError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CF_BOOKINGS: &str = "bookings";
/// Gateway order id to booking id.
pub const CF_BOOKING_ORDERS: &str = "booking_orders";
/// Gateway payment id to booking id.
pub const CF_BOOKING_PAYMENTS: &str = "booking_payments";
/// Keyed by booking id.
pub const CF_SCHEDULES: &str = "schedules";
pub const CF_ACCOUNTS: &str = "accounts";
pub const CF_ACCOUNT_ORDERS: &str = "account_orders";
pub const CF_ACCOUNT_APPLICANTS: &str = "account_applicants";
pub const CF_CUSTOMERS: &str = "customers";
pub const CF_CATALOG: &str = "catalog";

const COLUMN_FAMILIES: [&str; 9] = [
    CF_BOOKINGS,
    CF_BOOKING_ORDERS,
    CF_BOOKING_PAYMENTS,
    CF_SCHEDULES,
    CF_ACCOUNTS,
    CF_ACCOUNT_ORDERS,
    CF_ACCOUNT_APPLICANTS,
    CF_CUSTOMERS,
    CF_CATALOG,
];

const FEES_KEY: &[u8] = b"fees";

/// A persistent ledger using RocksDB.
///
/// Each collection has its own column family; secondary lookups go through
/// index column families written in the same batch as the record. Index
/// entries are never removed, so lookups re-check the record they land on.
///
/// Conditional updates are serialized through `write_lock`, which turns the
/// read-check-write sequence into a compare-and-swap for this process.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating any missing
    /// column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            MarketplaceError::StorageError(format!("Column family {name} not found"))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_all<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn lookup_index(&self, cf: &str, key: &str) -> Result<Option<Uuid>> {
        match self.db.get_cf(self.cf(cf)?, key.as_bytes())? {
            Some(bytes) => Uuid::from_slice(&bytes).map(Some).map_err(|e| {
                MarketplaceError::StorageError(format!("Corrupt index in {cf}: {e}"))
            }),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn index(&self, batch: &mut WriteBatch, cf: &str, key: &str, id: Uuid) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key.as_bytes(), id.as_bytes());
        Ok(())
    }

    fn write_booking(&self, booking: &Booking) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_BOOKINGS, booking.id.as_bytes(), booking)?;
        self.index(&mut batch, CF_BOOKING_ORDERS, &booking.order_id, booking.id)?;
        if let Some(payment_id) = &booking.payment_id {
            self.index(&mut batch, CF_BOOKING_PAYMENTS, payment_id, booking.id)?;
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn write_account(&self, account: &TechnicianAccount) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_ACCOUNTS, account.id.as_bytes(), account)?;
        self.index(&mut batch, CF_ACCOUNT_APPLICANTS, &account.applicant, account.id)?;
        if let Some(order_id) = &account.order_id {
            self.index(&mut batch, CF_ACCOUNT_ORDERS, order_id, account.id)?;
        }
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl BookingStore for RocksDBStore {
    async fn insert(&self, booking: Booking) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_booking(&booking)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>> {
        self.read(CF_BOOKINGS, id.as_bytes())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Booking>> {
        let Some(id) = self.lookup_index(CF_BOOKING_ORDERS, order_id)? else {
            return Ok(None);
        };
        let booking: Option<Booking> = self.read(CF_BOOKINGS, id.as_bytes())?;
        Ok(booking.filter(|b| b.order_id == order_id))
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Booking>> {
        let Some(id) = self.lookup_index(CF_BOOKING_PAYMENTS, payment_id)? else {
            return Ok(None);
        };
        let booking: Option<Booking> = self.read(CF_BOOKINGS, id.as_bytes())?;
        Ok(booking.filter(|b| b.payment_id.as_deref() == Some(payment_id)))
    }

    async fn update_if_status(
        &self,
        booking: &Booking,
        expected: &[BookingStatus],
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let current: Booking = self
            .read(CF_BOOKINGS, booking.id.as_bytes())?
            .ok_or_else(|| MarketplaceError::not_found("booking", booking.id))?;
        if !expected.contains(&current.status) || current.version != booking.version {
            return Ok(false);
        }
        let mut next = booking.clone();
        next.version += 1;
        self.write_booking(&next)?;
        Ok(true)
    }

    async fn get_all(&self) -> Result<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self.read_all(CF_BOOKINGS)?;
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }
}

#[async_trait]
impl ScheduleStore for RocksDBStore {
    async fn replace_for_booking(&self, schedule: Schedule) -> Result<Option<Schedule>> {
        let _guard = self.write_lock.lock().await;
        let previous = self.read(CF_SCHEDULES, schedule.booking_id.as_bytes())?;
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_SCHEDULES, schedule.booking_id.as_bytes(), &schedule)?;
        self.db.write(batch)?;
        Ok(previous)
    }

    async fn get_for_booking(&self, booking_id: Uuid) -> Result<Option<Schedule>> {
        self.read(CF_SCHEDULES, booking_id.as_bytes())
    }

    async fn store(&self, schedule: Schedule) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_SCHEDULES, schedule.booking_id.as_bytes(), &schedule)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn delete_for_booking(&self, booking_id: Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_SCHEDULES)?;
        let existed = self.db.get_pinned_cf(cf, booking_id.as_bytes())?.is_some();
        if existed {
            self.db.delete_cf(cf, booking_id.as_bytes())?;
        }
        Ok(existed)
    }
}

#[async_trait]
impl AccountStore for RocksDBStore {
    async fn store(&self, account: TechnicianAccount) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_account(&account)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TechnicianAccount>> {
        self.read(CF_ACCOUNTS, id.as_bytes())
    }

    async fn find_by_applicant(&self, applicant: &str) -> Result<Option<TechnicianAccount>> {
        let Some(id) = self.lookup_index(CF_ACCOUNT_APPLICANTS, applicant)? else {
            return Ok(None);
        };
        self.read(CF_ACCOUNTS, id.as_bytes())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<TechnicianAccount>> {
        let Some(id) = self.lookup_index(CF_ACCOUNT_ORDERS, order_id)? else {
            return Ok(None);
        };
        let account: Option<TechnicianAccount> = self.read(CF_ACCOUNTS, id.as_bytes())?;
        Ok(account.filter(|a| a.order_id.as_deref() == Some(order_id)))
    }

    async fn update_if_payment_status(
        &self,
        account: &TechnicianAccount,
        expected: &[PaymentStatus],
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let current: TechnicianAccount = self
            .read(CF_ACCOUNTS, account.id.as_bytes())?
            .ok_or_else(|| MarketplaceError::not_found("account", account.id))?;
        if !expected.contains(&current.payment_status) {
            return Ok(false);
        }
        self.write_account(account)?;
        Ok(true)
    }

    async fn get_all(&self) -> Result<Vec<TechnicianAccount>> {
        let mut accounts: Vec<TechnicianAccount> = self.read_all(CF_ACCOUNTS)?;
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }
}

#[async_trait]
impl CustomerStore for RocksDBStore {
    async fn get(&self, id: Uuid) -> Result<Option<Customer>> {
        self.read(CF_CUSTOMERS, id.as_bytes())
    }

    async fn store(&self, customer: Customer) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_CUSTOMERS, customer.id.as_bytes(), &customer)?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for RocksDBStore {
    async fn current_fees(&self) -> Result<Option<FeeConfig>> {
        self.read(CF_CATALOG, FEES_KEY)
    }

    async fn set_fees(&self, fees: FeeConfig) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_CATALOG, FEES_KEY, &fees)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn category(&self, id: Uuid) -> Result<Option<ServiceCategory>> {
        self.read(CF_CATALOG, id.as_bytes())
    }

    async fn put_category(&self, category: ServiceCategory) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_CATALOG, category.id.as_bytes(), &category)?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

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
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some(), "missing {name}");
        }
    }

    #[tokio::test]
    async fn test_rocksdb_booking_indexes_follow_updates() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let mut b = booking("order_1");
        BookingStore::insert(&store, b.clone()).await.unwrap();

        b.confirm_initial_payment("pay_1");
        b.open_final_payment("order_2".to_string(), Amount::new(dec!(1200)).unwrap());
        assert!(
            store
                .update_if_status(&b, &[BookingStatus::Pending])
                .await
                .unwrap()
        );
        b.version += 1;

        assert!(
            BookingStore::find_by_order_id(&store, "order_1")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            BookingStore::find_by_order_id(&store, "order_2").await.unwrap(),
            Some(b.clone())
        );
        assert_eq!(store.find_by_payment_id("pay_1").await.unwrap(), Some(b.clone()));

        // The stored booking is confirmed now, so a pending-only update loses.
        assert!(
            !store
                .update_if_status(&b, &[BookingStatus::Pending])
                .await
                .unwrap()
        );

        // So does a writer holding an older copy, even with the right status.
        let mut stale = b.clone();
        stale.version -= 1;
        assert!(
            !store
                .update_if_status(&stale, &[BookingStatus::Confirmed])
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_rocksdb_reopen_keeps_ledger() {
        let dir = tempdir().unwrap();
        let b = booking("order_1");
        let fees = FeeConfig {
            booking_fee: Amount::new(dec!(500)).unwrap(),
            fine_amount: Amount::new(dec!(100)).unwrap(),
            onboarding_fee: Amount::new(dec!(1000)).unwrap(),
        };
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            BookingStore::insert(&store, b.clone()).await.unwrap();
            store.set_fees(fees.clone()).await.unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(BookingStore::get(&store, b.id).await.unwrap(), Some(b));
        assert_eq!(store.current_fees().await.unwrap(), Some(fees));
        assert_eq!(BookingStore::get_all(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_schedule_and_account() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let booking_id = Uuid::new_v4();
        let schedule = Schedule::propose(booking_id, Uuid::new_v4(), Utc::now());
        assert!(store.replace_for_booking(schedule.clone()).await.unwrap().is_none());
        assert_eq!(store.get_for_booking(booking_id).await.unwrap(), Some(schedule));
        assert!(store.delete_for_booking(booking_id).await.unwrap());
        assert!(store.get_for_booking(booking_id).await.unwrap().is_none());

        let mut account = TechnicianAccount::new(
            "tech@example.com".to_string(),
            Uuid::new_v4(),
            Amount::new(dec!(300)).unwrap(),
            None,
            Utc::now(),
        );
        account.order_id = Some("order_9".to_string());
        AccountStore::store(&store, account.clone()).await.unwrap();

        assert_eq!(
            store.find_by_applicant("tech@example.com").await.unwrap(),
            Some(account.clone())
        );
        assert_eq!(
            AccountStore::find_by_order_id(&store, "order_9").await.unwrap(),
            Some(account)
        );
    }
}
