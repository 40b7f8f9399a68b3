use super::context::EngineContext;
use crate::domain::Transition;
use crate::domain::booking::{Booking, BookingStatus, PaymentStatus, RefundRecord, RefundStatus};
use crate::domain::event::RefundEntity;
use crate::domain::notification::Notification;
use crate::domain::pricing::Customer;
use crate::error::{MarketplaceError, Result};
use chrono::TimeDelta;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Nothing had been paid, or there was nothing to refund against.
    Cancelled,
    Refunded {
        refund_id: String,
        fine_imposed: bool,
    },
    /// A concurrent writer settled the booking first.
    AlreadyTerminal,
    /// Another cancellation of this booking is waiting on the gateway.
    InFlight,
}

/// Why a refund claim could not be taken.
enum Held {
    /// The gateway already reported a refund for this booking.
    Reported(String),
    InFlight,
    Moved(BookingStatus),
}

/// Customer cancellation: fine eligibility, refund issuance and schedule
/// teardown.
///
/// A paid booking is claimed (refund `initiated`, no refund id yet) before
/// the gateway is asked for money back, so concurrent cancellations issue at
/// most one refund. A claim older than the gateway timeout belongs to a call
/// that can no longer succeed and may be taken over.
#[derive(Clone)]
pub struct CancellationOrchestrator {
    ctx: Arc<EngineContext>,
}

impl CancellationOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn cancel(&self, booking_id: Uuid, customer_id: Uuid) -> Result<CancelOutcome> {
        let booking = self.load(booking_id).await?;
        if booking.customer_id != customer_id {
            return Err(MarketplaceError::ValidationError(format!(
                "Booking {booking_id} does not belong to customer {customer_id}"
            )));
        }
        if let Some(outcome) = settled(booking.status) {
            return outcome;
        }

        if booking.initial_payment_status != PaymentStatus::Paid {
            return self.cancel_without_refund(booking).await;
        }
        let Some(payment_id) = booking.payment_id.clone() else {
            warn!(%booking_id, "Paid booking has no payment id on record; cancelling without refund");
            return self.cancel_without_refund(booking).await;
        };
        self.cancel_with_refund(booking, &payment_id).await
    }

    async fn load(&self, booking_id: Uuid) -> Result<Booking> {
        self.ctx
            .bookings
            .get(booking_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("booking", booking_id))
    }

    async fn cancel_without_refund(&self, booking: Booking) -> Result<CancelOutcome> {
        let booking_id = booking.id;
        let mut moved = None;
        let cancelled = self
            .ctx
            .update_booking(booking, |current| {
                let paid_meanwhile = current.initial_payment_status == PaymentStatus::Paid
                    && current.payment_id.is_some();
                if !current.status.is_cancellable() || paid_meanwhile {
                    moved = Some(current.status);
                    return Ok(None);
                }
                let mut next = current.clone();
                next.status = BookingStatus::Cancelled;
                next.is_active = false;
                Ok(Some(next))
            })
            .await?;

        let Some(next) = cancelled else {
            debug!(%booking_id, "Cancellation overtaken by a concurrent transition");
            return match moved.and_then(settled) {
                Some(outcome) => outcome,
                // The upfront fee was captured while we were cancelling.
                None => {
                    let booking = self.load(booking_id).await?;
                    let payment_id = booking.payment_id.clone().unwrap_or_default();
                    self.cancel_with_refund(booking, &payment_id).await
                }
            };
        };
        info!(%booking_id, "Booking cancelled");
        self.drop_schedule(booking_id).await;
        self.ctx
            .notify(Notification::BookingCancelled {
                booking_id,
                customer_id: next.customer_id,
                refund_id: None,
                fine_imposed: false,
            })
            .await;
        Ok(CancelOutcome::Cancelled)
    }

    async fn cancel_with_refund(&self, booking: Booking, payment_id: &str) -> Result<CancelOutcome> {
        let booking_id = booking.id;
        let amount = booking.initial_amount;
        let now = self.ctx.clock.now();
        let impose_fine = now - booking.created_at >= self.ctx.policy.fine_grace_period;
        let claim_ttl = TimeDelta::from_std(self.ctx.policy.gateway_timeout).map_err(|e| {
            MarketplaceError::ValidationError(format!("Gateway timeout out of range: {e}"))
        })?;

        let mut held = None;
        let claimed = self
            .ctx
            .update_booking(booking, |current| {
                if !current.status.is_cancellable() {
                    held = Some(Held::Moved(current.status));
                    return Ok(None);
                }
                if let Some(refund_id) = &current.refund.refund_id {
                    held = Some(Held::Reported(refund_id.clone()));
                    return Ok(None);
                }
                let fresh_claim = current.refund.status == RefundStatus::Initiated
                    && current.refund.date.is_some_and(|at| now - at < claim_ttl);
                if fresh_claim {
                    held = Some(Held::InFlight);
                    return Ok(None);
                }
                let mut next = current.clone();
                next.refund = RefundRecord {
                    status: RefundStatus::Initiated,
                    refund_id: None,
                    amount: Some(current.initial_amount),
                    date: Some(now),
                };
                Ok(Some(next))
            })
            .await?;

        let refund_id = match (claimed, held) {
            (Some(_), _) => match self.ctx.issue_refund(payment_id, amount).await {
                Ok(refund) => refund.id,
                Err(e) => {
                    self.release_claim(booking_id).await;
                    return Err(e);
                }
            },
            (None, Some(Held::Reported(existing))) => {
                info!(%booking_id, refund_id = %existing, "Reusing refund from earlier attempt");
                existing
            }
            (None, Some(Held::InFlight)) => {
                debug!(%booking_id, "Refund already in flight");
                return Ok(CancelOutcome::InFlight);
            }
            (None, Some(Held::Moved(status))) => {
                return settled(status).unwrap_or(Ok(CancelOutcome::AlreadyTerminal));
            }
            (None, None) => return Ok(CancelOutcome::AlreadyTerminal),
        };

        let current = self.load(booking_id).await?;
        let refunded = self
            .ctx
            .update_booking(current, |current| {
                if !current.status.is_cancellable() {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.status = BookingStatus::Refunded;
                next.is_active = false;
                next.refund = RefundRecord {
                    status: current.refund.status.advanced_to(RefundStatus::Initiated),
                    refund_id: Some(refund_id.clone()),
                    amount: current.refund.amount.or(Some(current.initial_amount)),
                    date: current.refund.date.or(Some(now)),
                };
                Ok(Some(next))
            })
            .await?;
        let Some(next) = refunded else {
            error!(
                %booking_id,
                %refund_id,
                "Refund issued but booking moved on before it could be marked refunded"
            );
            self.ctx
                .flag(
                    "refund.orphaned",
                    booking_id.to_string(),
                    format!("Refund {refund_id} issued for a booking that is no longer cancellable"),
                )
                .await;
            return Ok(CancelOutcome::AlreadyTerminal);
        };
        info!(%booking_id, %refund_id, impose_fine, "Booking refunded");

        self.drop_schedule(booking_id).await;
        if impose_fine {
            self.impose_fine(&next).await;
        }
        self.ctx
            .notify(Notification::BookingCancelled {
                booking_id,
                customer_id: next.customer_id,
                refund_id: Some(refund_id.clone()),
                fine_imposed: impose_fine,
            })
            .await;
        Ok(CancelOutcome::Refunded {
            refund_id,
            fine_imposed: impose_fine,
        })
    }

    /// Gives the claim back after a failed refund call so the customer can
    /// retry straight away.
    async fn release_claim(&self, booking_id: Uuid) {
        let released = async {
            let current = self.load(booking_id).await?;
            self.ctx
                .update_booking(current, |current| {
                    if current.refund.status != RefundStatus::Initiated
                        || current.refund.refund_id.is_some()
                    {
                        return Ok(None);
                    }
                    let mut next = current.clone();
                    next.refund = RefundRecord::default();
                    Ok(Some(next))
                })
                .await
        };
        if let Err(e) = released.await {
            warn!(%booking_id, error = %e, "Could not release refund claim; it lapses with the gateway timeout");
        }
    }

    /// A refunded booking's schedule is inert, so a failed delete is only logged.
    async fn drop_schedule(&self, booking_id: Uuid) {
        if let Err(e) = self.ctx.schedules.delete_for_booking(booking_id).await {
            warn!(%booking_id, error = %e, "Could not delete schedule of cancelled booking");
        }
    }

    async fn impose_fine(&self, booking: &Booking) {
        let customer_id = booking.customer_id;
        let imposed = async {
            let mut customer = self
                .ctx
                .customers
                .get(customer_id)
                .await?
                .unwrap_or_else(|| Customer::new(customer_id));
            customer.fine_imposed = true;
            self.ctx.customers.store(customer).await
        };
        match imposed.await {
            Ok(()) => info!(%customer_id, "Late-cancellation fine imposed"),
            Err(e) => {
                error!(booking_id = %booking.id, %customer_id, error = %e, "Could not impose fine");
                self.ctx
                    .flag(
                        "fine.impose",
                        customer_id.to_string(),
                        format!("Late cancellation of booking {} went unfined: {e}", booking.id),
                    )
                    .await;
            }
        }
    }

    /// Applies a refund confirmation from the gateway. Only the refund
    /// sub-record moves; the booking status is never reopened.
    pub async fn apply_refund_update(
        &self,
        booking: Booking,
        refund: &RefundEntity,
        status: RefundStatus,
    ) -> Result<Transition> {
        let now = self.ctx.clock.now();
        let refund_amount = refund.amount.to_amount()?;
        let updated = self
            .ctx
            .update_booking(booking, |current| {
                let advances = current.refund.status.can_advance_to(status);
                // A claim still waiting on its own gateway call learns the id here.
                let names_claim = current.refund.status == RefundStatus::Initiated
                    && current.refund.refund_id.is_none();
                if !advances && !names_claim {
                    debug!(booking_id = %current.id, current = current.refund.status.as_str(), "Stale refund update");
                    return Ok(None);
                }
                let mut next = current.clone();
                if advances {
                    next.refund.status = status;
                }
                next.refund.refund_id = Some(refund.id.clone());
                next.refund.amount = next.refund.amount.or(Some(refund_amount));
                if next.refund.date.is_none() || (advances && status == RefundStatus::Processed) {
                    next.refund.date = Some(now);
                }
                Ok(Some(next))
            })
            .await?;
        let Some(next) = updated else {
            return Ok(Transition::AlreadyTerminal);
        };
        if next.refund.status == RefundStatus::Failed {
            error!(booking_id = %next.id, refund_id = %refund.id, "Gateway reported refund failure");
        } else {
            info!(
                booking_id = %next.id,
                refund_id = %refund.id,
                status = next.refund.status.as_str(),
                "Refund updated"
            );
        }
        Ok(Transition::Applied)
    }
}

/// Outcome for a booking that can no longer be cancelled, or `None` while it
/// still can.
fn settled(status: BookingStatus) -> Option<Result<CancelOutcome>> {
    match status {
        BookingStatus::Cancelled | BookingStatus::Refunded => Some(Ok(CancelOutcome::AlreadyTerminal)),
        from if !from.is_cancellable() => Some(Err(MarketplaceError::IllegalTransition {
            from,
            operation: "cancel",
        })),
        _ => None,
    }
}
