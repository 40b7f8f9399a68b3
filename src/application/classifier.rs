use super::context::EngineContext;
use crate::domain::account::TechnicianAccount;
use crate::domain::booking::{Booking, PaymentPhase};
use crate::domain::event::GatewayEvent;
use crate::error::Result;
use std::sync::Arc;
use tracing::debug;

/// Where a webhook event lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Account(TechnicianAccount),
    BookingPayment {
        booking: Booking,
        phase: PaymentPhase,
    },
    BookingRefund(Booking),
    Unmatched,
}

/// Works out which record, and which payment phase of it, a gateway event
/// belongs to. Events carry no phase tag, so the answer is derived from the
/// record's current state and must be recomputed on every delivery.
#[derive(Clone)]
pub struct EventClassifier {
    ctx: Arc<EngineContext>,
}

impl EventClassifier {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn classify(&self, event: &GatewayEvent) -> Result<Route> {
        let route = match event {
            GatewayEvent::PaymentCaptured(payment) | GatewayEvent::PaymentFailed(payment) => {
                if let Some(account) = self.ctx.accounts.find_by_order_id(&payment.order_id).await? {
                    Route::Account(account)
                } else if let Some(booking) =
                    self.ctx.bookings.find_by_order_id(&payment.order_id).await?
                {
                    let phase = booking.phase_for_payment_event();
                    Route::BookingPayment { booking, phase }
                } else {
                    Route::Unmatched
                }
            }
            GatewayEvent::RefundCreated(refund)
            | GatewayEvent::RefundProcessed(refund)
            | GatewayEvent::RefundFailed(refund) => {
                match self.ctx.bookings.find_by_payment_id(&refund.payment_id).await? {
                    Some(booking) => Route::BookingRefund(booking),
                    None => Route::Unmatched,
                }
            }
        };
        debug!(event = event.kind(), reference = event.reference(), route = route.label(), "Event classified");
        Ok(route)
    }
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Route::Account(_) => "account",
            Route::BookingPayment {
                phase: PaymentPhase::Initial,
                ..
            } => "booking-initial",
            Route::BookingPayment {
                phase: PaymentPhase::Final,
                ..
            } => "booking-final",
            Route::BookingRefund(_) => "booking-refund",
            Route::Unmatched => "unmatched",
        }
    }
}
