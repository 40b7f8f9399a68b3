use crate::config::PolicyConfig;
use crate::domain::booking::Booking;
use crate::domain::event::{AuditEntry, AuditOutcome};
use crate::domain::money::Amount;
use crate::domain::notification::Notification;
use crate::domain::ports::{
    AccountStoreRef, AuditLogRef, BookingStoreRef, CatalogStoreRef, ClockRef, CustomerStoreRef,
    GatewayOrder, GatewayRefund, NotifierRef, OrderCacheRef, PaymentGatewayRef, ScheduleStoreRef,
};
use crate::domain::pricing::FeeConfig;
use crate::error::{MarketplaceError, Result};
use tracing::{debug, error, warn};

/// A swap only fails when another writer landed in between, so a handful of
/// rounds is plenty.
const MAX_UPDATE_ATTEMPTS: usize = 16;

/// Everything the engine's services share: the ledger collections, the
/// external collaborators and the policy.
#[derive(Clone)]
pub struct EngineContext {
    pub bookings: BookingStoreRef,
    pub schedules: ScheduleStoreRef,
    pub accounts: AccountStoreRef,
    pub customers: CustomerStoreRef,
    pub catalog: CatalogStoreRef,
    pub gateway: PaymentGatewayRef,
    pub cache: OrderCacheRef,
    pub notifier: NotifierRef,
    pub audit: AuditLogRef,
    pub clock: ClockRef,
    pub policy: PolicyConfig,
}

impl EngineContext {
    /// Current fee schedule. Fetched per operation so a fee update takes
    /// effect on the next call.
    pub async fn fees(&self) -> Result<FeeConfig> {
        self.catalog
            .current_fees()
            .await?
            .ok_or(MarketplaceError::PricingUnavailable)
    }

    /// Opens a gateway order for `amount`. This and [`Self::issue_refund`]
    /// are the only places major units are scaled for the gateway.
    pub async fn open_order(&self, amount: Amount, receipt: &str) -> Result<GatewayOrder> {
        let minor = amount.to_minor_units()?;
        let call = self.gateway.create_order(minor, receipt);
        match tokio::time::timeout(self.policy.gateway_timeout, call).await {
            Ok(Ok(order)) => {
                debug!(order_id = %order.id, %amount, receipt, "Gateway order opened");
                Ok(order)
            }
            Ok(Err(e)) => {
                error!(%amount, receipt, error = %e, "Gateway order creation failed");
                Err(into_gateway_error(e))
            }
            Err(_) => {
                error!(%amount, receipt, "Gateway order creation timed out");
                Err(MarketplaceError::GatewayTimeout)
            }
        }
    }

    pub async fn issue_refund(&self, payment_id: &str, amount: Amount) -> Result<GatewayRefund> {
        let minor = amount.to_minor_units()?;
        let call = self.gateway.refund(payment_id, minor);
        match tokio::time::timeout(self.policy.gateway_timeout, call).await {
            Ok(Ok(refund)) => Ok(refund),
            Ok(Err(e)) => {
                error!(payment_id, %amount, error = %e, "Gateway refund failed");
                Err(into_gateway_error(e))
            }
            Err(_) => {
                error!(payment_id, %amount, "Gateway refund timed out");
                Err(MarketplaceError::GatewayTimeout)
            }
        }
    }

    /// Applies `step` to `current` and writes the result with a conditional
    /// update. Whenever another writer got there first, the booking is read
    /// again and `step` re-applied to the fresh copy. `step` returns `None`
    /// once the change no longer applies.
    pub async fn update_booking<F>(&self, mut current: Booking, mut step: F) -> Result<Option<Booking>>
    where
        F: FnMut(&Booking) -> Result<Option<Booking>> + Send,
    {
        let booking_id = current.id;
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let Some(next) = step(&current)? else {
                return Ok(None);
            };
            if self.bookings.update_if_status(&next, &[current.status]).await? {
                return Ok(Some(next));
            }
            debug!(%booking_id, "Booking changed underneath the update; re-reading");
            current = self
                .bookings
                .get(booking_id)
                .await?
                .ok_or_else(|| MarketplaceError::not_found("booking", booking_id))?;
        }
        Err(MarketplaceError::StorageError(format!(
            "Booking {booking_id} kept changing during the update"
        )))
    }

    /// Records something that needs a human: money moved but the ledger
    /// could not follow.
    pub async fn flag(&self, event: &str, reference: String, detail: String) {
        self.audit(AuditEntry {
            event: event.to_string(),
            reference: Some(reference),
            outcome: AuditOutcome::Anomaly,
            detail: Some(detail),
            recorded_at: self.clock.now(),
        })
        .await;
    }

    /// Delivery is someone else's job; a failed send never fails a transition.
    pub async fn notify(&self, notification: Notification) {
        let template = notification.template();
        if let Err(e) = self.notifier.send(notification).await {
            warn!(template, error = %e, "Notification dispatch failed");
        }
    }

    pub async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(entry).await {
            error!(error = %e, "Audit log write failed");
        }
    }
}

fn into_gateway_error(e: MarketplaceError) -> MarketplaceError {
    match e {
        MarketplaceError::GatewayError(_) | MarketplaceError::GatewayTimeout => e,
        other => MarketplaceError::GatewayError(other.to_string()),
    }
}
