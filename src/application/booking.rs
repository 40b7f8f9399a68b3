use super::context::EngineContext;
use crate::domain::Transition;
use crate::domain::booking::{Booking, BookingStatus, PaymentStatus, RefundStatus, Schedule};
use crate::domain::event::PAYMENT_CAPTURED;
use crate::domain::money::Amount;
use crate::domain::notification::Notification;
use crate::domain::ports::GatewayOrder;
use crate::domain::pricing::Customer;
use crate::error::{MarketplaceError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A freshly created booking together with the order the customer must pay.
#[derive(Debug, Clone)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub order: GatewayOrder,
}

/// Owns the legal transitions of a booking.
///
/// Every write goes through [`EngineContext::update_booking`], so two workers
/// racing on one booking cannot overwrite each other: the loser re-reads the
/// booking and either re-applies its change or reports
/// [`Transition::AlreadyTerminal`].
#[derive(Clone)]
pub struct BookingStateMachine {
    ctx: Arc<EngineContext>,
}

impl BookingStateMachine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn load(&self, booking_id: Uuid) -> Result<Booking> {
        self.ctx
            .bookings
            .get(booking_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("booking", booking_id))
    }

    pub async fn find_by_order(&self, order_id: &str) -> Result<Booking> {
        self.ctx
            .bookings
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("booking", order_id))
    }

    /// Opens the upfront-fee order and persists a `pending` booking for it.
    /// Nothing is written unless the gateway hands back an order.
    pub async fn create(&self, customer_id: Uuid, category_id: Uuid) -> Result<BookingReceipt> {
        let fees = self.ctx.fees().await?;
        self.ctx
            .catalog
            .category(category_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("category", category_id))?;
        let customer = self
            .ctx
            .customers
            .get(customer_id)
            .await?
            .unwrap_or_else(|| Customer::new(customer_id));

        let (amount, fine_applied) = fees.initial_amount(&customer)?;
        let now = self.ctx.clock.now();
        let receipt = format!("bk_{}_{}", customer_id.simple(), now.timestamp_millis());
        let order = self.ctx.open_order(amount, &receipt).await?;

        let booking = Booking::new(
            customer_id,
            category_id,
            order.id.clone(),
            amount,
            fine_applied,
            now,
        );
        self.ctx.bookings.insert(booking.clone()).await?;
        info!(
            booking_id = %booking.id,
            order_id = %order.id,
            %amount,
            fine_applied,
            "Booking created"
        );
        Ok(BookingReceipt { booking, order })
    }

    pub async fn confirm_initial_payment(
        &self,
        order_id: &str,
        payment_id: &str,
    ) -> Result<Transition> {
        let booking = self.find_by_order(order_id).await?;
        self.confirm_initial(booking, payment_id).await
    }

    /// `pending -> confirmed`. Only the writer that wins the swap notifies.
    pub async fn confirm_initial(&self, booking: Booking, payment_id: &str) -> Result<Transition> {
        let booking_id = booking.id;
        let mut seen = booking.status;
        let confirmed = self
            .ctx
            .update_booking(booking, |current| {
                seen = current.status;
                if current.status != BookingStatus::Pending {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.confirm_initial_payment(payment_id);
                Ok(Some(next))
            })
            .await?;
        let Some(next) = confirmed else {
            debug!(%booking_id, status = %seen, payment_id, "Initial payment already settled");
            if seen == BookingStatus::Cancelled {
                self.flag_orphan_capture(booking_id, payment_id).await;
            }
            return Ok(Transition::AlreadyTerminal);
        };
        info!(booking_id = %next.id, order_id = %next.order_id, payment_id, "Booking confirmed");

        self.ctx
            .notify(Notification::BookingConfirmed {
                booking_id: next.id,
                customer_id: next.customer_id,
                amount: next.initial_amount,
            })
            .await;
        if next.fine_applied {
            self.clear_fine(&next).await;
        }
        Ok(Transition::Applied)
    }

    /// Records a failed attempt at the upfront fee. Status stays `pending`,
    /// so a later capture for the same order still confirms.
    pub async fn fail_initial(&self, booking: Booking, reason: Option<&str>) -> Result<Transition> {
        let failed = self
            .ctx
            .update_booking(booking, |current| {
                if current.status != BookingStatus::Pending
                    || current.initial_payment_status != PaymentStatus::Pending
                {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.initial_payment_status = PaymentStatus::Failed;
                Ok(Some(next))
            })
            .await?;
        let Some(next) = failed else {
            return Ok(Transition::AlreadyTerminal);
        };
        warn!(booking_id = %next.id, reason, "Initial payment failed");
        Ok(Transition::Applied)
    }

    /// Proposes a technician. Any earlier proposal for the booking is replaced.
    pub async fn assign(&self, booking_id: Uuid, employee_id: Uuid) -> Result<Schedule> {
        let booking = self.load(booking_id).await?;
        if booking.status != BookingStatus::Confirmed {
            return Err(MarketplaceError::IllegalTransition {
                from: booking.status,
                operation: "assign",
            });
        }

        let schedule = Schedule::propose(booking_id, employee_id, self.ctx.clock.now());
        let replaced = self.ctx.schedules.replace_for_booking(schedule.clone()).await?;
        if let Some(previous) = replaced {
            info!(%booking_id, previous = %previous.employee_id, "Replaced technician proposal");
        }
        info!(%booking_id, %employee_id, "Technician proposed");
        self.ctx
            .notify(Notification::TechnicianProposed {
                booking_id,
                employee_id,
            })
            .await;
        Ok(schedule)
    }

    /// `confirmed -> in-progress`, binding the technician.
    pub async fn accept(&self, booking_id: Uuid, employee_id: Uuid) -> Result<Transition> {
        let mut schedule = self
            .ctx
            .schedules
            .get_for_booking(booking_id)
            .await?
            .ok_or(MarketplaceError::ScheduleNotFound(booking_id))?;
        if schedule.employee_id != employee_id {
            return Err(MarketplaceError::ValidationError(format!(
                "Technician {employee_id} was not proposed for booking {booking_id}"
            )));
        }

        let booking = self.load(booking_id).await?;
        let accepted = self
            .ctx
            .update_booking(booking, |current| match current.status {
                BookingStatus::Confirmed => {
                    let mut next = current.clone();
                    next.status = BookingStatus::InProgress;
                    next.employee_id = Some(employee_id);
                    Ok(Some(next))
                }
                BookingStatus::InProgress if current.employee_id == Some(employee_id) => Ok(None),
                from => Err(MarketplaceError::IllegalTransition {
                    from,
                    operation: "accept",
                }),
            })
            .await?;

        // Also repairs a schedule left unaccepted by an interrupted earlier call.
        if !schedule.is_accepted {
            schedule.is_accepted = true;
            self.ctx.schedules.store(schedule).await?;
        }

        let Some(next) = accepted else {
            return Ok(Transition::AlreadyTerminal);
        };
        info!(%booking_id, %employee_id, "Assignment accepted");
        self.ctx
            .notify(Notification::AssignmentAccepted {
                booking_id,
                customer_id: next.customer_id,
                employee_id,
            })
            .await;
        Ok(Transition::Applied)
    }

    /// `in-progress -> started`. Refused while a cancellation is refunding
    /// the booking.
    pub async fn start(&self, booking_id: Uuid, employee_id: Uuid) -> Result<Transition> {
        let booking = self.load(booking_id).await?;
        ensure_assigned(&booking, employee_id)?;
        let started = self
            .ctx
            .update_booking(booking, |current| match current.status {
                BookingStatus::InProgress if current.refund.status != RefundStatus::None => {
                    Err(MarketplaceError::ValidationError(format!(
                        "Booking {booking_id} is being cancelled"
                    )))
                }
                BookingStatus::InProgress => {
                    let mut next = current.clone();
                    next.status = BookingStatus::Started;
                    Ok(Some(next))
                }
                BookingStatus::Started => Ok(None),
                from => Err(MarketplaceError::IllegalTransition {
                    from,
                    operation: "start",
                }),
            })
            .await?;
        if started.is_none() {
            return Ok(Transition::AlreadyTerminal);
        }
        info!(%booking_id, %employee_id, "Work started");
        Ok(Transition::Applied)
    }

    /// Opens the service-completion order and points the booking at it.
    ///
    /// A booking has at most one final order. Once it is open, further
    /// requests are refused; a failed attempt is retried against the same
    /// order.
    pub async fn request_final_payment(
        &self,
        booking_id: Uuid,
        employee_id: Uuid,
        amount: Decimal,
    ) -> Result<GatewayOrder> {
        let amount = Amount::new(amount)?;
        let booking = self.load(booking_id).await?;
        ensure_assigned(&booking, employee_id)?;
        ensure_final_requestable(&booking)?;

        let receipt = format!("fin_{}", booking_id.simple());
        let order = self.ctx.open_order(amount, &receipt).await?;

        let opened = self
            .ctx
            .update_booking(booking, |current| {
                ensure_final_requestable(current)?;
                let mut next = current.clone();
                next.open_final_payment(order.id.clone(), amount);
                Ok(Some(next))
            })
            .await;
        let next = match opened {
            Ok(Some(next)) => next,
            Ok(None) => return Err(MarketplaceError::not_found("booking", booking_id)),
            Err(e) => {
                warn!(%booking_id, order_id = %order.id, error = %e, "Abandoning unused final order");
                return Err(e);
            }
        };
        info!(%booking_id, order_id = %order.id, %amount, "Final payment requested");
        self.ctx
            .notify(Notification::FinalPaymentRequested {
                booking_id,
                customer_id: next.customer_id,
                amount,
            })
            .await;
        Ok(order)
    }

    pub async fn confirm_final_payment(
        &self,
        order_id: &str,
        payment_id: &str,
    ) -> Result<Transition> {
        let booking = self.find_by_order(order_id).await?;
        self.confirm_final(booking, payment_id).await
    }

    /// `started -> completed`.
    pub async fn confirm_final(&self, booking: Booking, payment_id: &str) -> Result<Transition> {
        let completed = self
            .ctx
            .update_booking(booking, |current| {
                if current.status == BookingStatus::Completed {
                    return Ok(None);
                }
                if current.service_amount.is_none() {
                    // No final order was ever opened, so `order_id` still names
                    // the upfront-fee order: this is a replay of the initial phase.
                    debug!(booking_id = %current.id, "Replayed initial-phase payment ignored");
                    return Ok(None);
                }
                if current.status != BookingStatus::Started {
                    return Err(MarketplaceError::IllegalTransition {
                        from: current.status,
                        operation: "confirm final payment of",
                    });
                }
                let mut next = current.clone();
                next.confirm_final_payment(payment_id);
                Ok(Some(next))
            })
            .await?;
        let Some(next) = completed else {
            return Ok(Transition::AlreadyTerminal);
        };
        info!(booking_id = %next.id, order_id = %next.order_id, payment_id, "Service completed");
        self.ctx
            .notify(Notification::ServiceCompleted {
                booking_id: next.id,
                customer_id: next.customer_id,
            })
            .await;
        Ok(Transition::Applied)
    }

    pub async fn fail_final(&self, booking: Booking, reason: Option<&str>) -> Result<Transition> {
        let failed = self
            .ctx
            .update_booking(booking, |current| {
                if current.status != BookingStatus::Started
                    || current.service_amount.is_none()
                    || current.payment_status != PaymentStatus::Pending
                {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.payment_status = PaymentStatus::Failed;
                Ok(Some(next))
            })
            .await?;
        let Some(next) = failed else {
            return Ok(Transition::AlreadyTerminal);
        };
        warn!(booking_id = %next.id, reason, "Final payment failed");
        Ok(Transition::Applied)
    }

    /// The booking is already confirmed when this runs, so a failure here is
    /// flagged for follow-up instead of failing the confirmation.
    async fn clear_fine(&self, booking: &Booking) {
        let customer_id = booking.customer_id;
        let cleared = async {
            if let Some(mut customer) = self.ctx.customers.get(customer_id).await?
                && customer.fine_imposed
            {
                customer.fine_imposed = false;
                self.ctx.customers.store(customer).await?;
                info!(%customer_id, "Fine settled with booking fee");
            }
            Ok::<_, MarketplaceError>(())
        };
        if let Err(e) = cleared.await {
            error!(booking_id = %booking.id, %customer_id, error = %e, "Could not clear settled fine");
            self.ctx
                .flag(
                    "fine.clear",
                    customer_id.to_string(),
                    format!("Fine paid with booking {} is still on record: {e}", booking.id),
                )
                .await;
        }
    }

    /// Money arrived for a booking that was cancelled unpaid. The ledger
    /// does not reopen it; someone has to refund the payment by hand.
    async fn flag_orphan_capture(&self, booking_id: Uuid, payment_id: &str) {
        warn!(%booking_id, payment_id, "Payment captured for a cancelled booking");
        self.ctx
            .flag(
                PAYMENT_CAPTURED,
                booking_id.to_string(),
                format!("Payment {payment_id} captured after cancellation; refund it manually"),
            )
            .await;
    }
}

fn ensure_final_requestable(booking: &Booking) -> Result<()> {
    if booking.status != BookingStatus::Started {
        return Err(MarketplaceError::IllegalTransition {
            from: booking.status,
            operation: "request final payment for",
        });
    }
    if booking.service_amount.is_some() {
        return Err(MarketplaceError::ValidationError(format!(
            "Final payment for booking {} is already open on order {}",
            booking.id, booking.order_id
        )));
    }
    Ok(())
}

fn ensure_assigned(booking: &Booking, employee_id: Uuid) -> Result<()> {
    if booking.employee_id != Some(employee_id) {
        return Err(MarketplaceError::ValidationError(format!(
            "Technician {employee_id} is not assigned to booking {}",
            booking.id
        )));
    }
    Ok(())
}
