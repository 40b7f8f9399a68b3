use super::activation::ActivationGate;
use super::booking::BookingStateMachine;
use super::cancellation::CancellationOrchestrator;
use super::classifier::{EventClassifier, Route};
use super::context::EngineContext;
use crate::domain::Transition;
use crate::domain::account::TechnicianAccount;
use crate::domain::booking::{Booking, PaymentPhase};
use crate::domain::event::{AuditOutcome, GatewayEvent};
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// The main entry point of the ledger engine.
///
/// `MarketplaceEngine` holds no per-request state: any number of workers may
/// share one instance (or build their own over the same stores) and race on
/// the same records. Consistency comes from the stores' conditional updates.
#[derive(Clone)]
pub struct MarketplaceEngine {
    ctx: Arc<EngineContext>,
    pub bookings: BookingStateMachine,
    pub cancellation: CancellationOrchestrator,
    pub activation: ActivationGate,
    pub classifier: EventClassifier,
}

impl MarketplaceEngine {
    pub fn new(ctx: EngineContext) -> Self {
        let ctx = Arc::new(ctx);
        Self {
            bookings: BookingStateMachine::new(ctx.clone()),
            cancellation: CancellationOrchestrator::new(ctx.clone()),
            activation: ActivationGate::new(ctx.clone()),
            classifier: EventClassifier::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Classifies a verified webhook event and applies it through the same
    /// transition operations the synchronous verify calls use.
    pub async fn apply_event(&self, event: GatewayEvent) -> Result<AuditOutcome> {
        let route = self.classifier.classify(&event).await?;
        let transition = match (&event, route) {
            (_, Route::Unmatched) => {
                info!(
                    event = event.kind(),
                    reference = event.reference(),
                    "No record matches event; dropping"
                );
                return Ok(AuditOutcome::Dropped);
            }
            (GatewayEvent::PaymentCaptured(payment), Route::Account(account)) => {
                self.activation.confirm(account, &payment.id).await?
            }
            (GatewayEvent::PaymentFailed(payment), Route::Account(account)) => {
                self.activation
                    .fail(account, payment.error_description.as_deref())
                    .await?
            }
            (GatewayEvent::PaymentCaptured(payment), Route::BookingPayment { booking, phase }) => {
                match phase {
                    PaymentPhase::Initial => self.bookings.confirm_initial(booking, &payment.id).await?,
                    PaymentPhase::Final => self.bookings.confirm_final(booking, &payment.id).await?,
                }
            }
            (GatewayEvent::PaymentFailed(payment), Route::BookingPayment { booking, phase }) => {
                let reason = payment.error_description.as_deref();
                match phase {
                    PaymentPhase::Initial => self.bookings.fail_initial(booking, reason).await?,
                    PaymentPhase::Final => self.bookings.fail_final(booking, reason).await?,
                }
            }
            (_, Route::BookingRefund(booking)) => match (&event, event.refund_status()) {
                (
                    GatewayEvent::RefundCreated(refund)
                    | GatewayEvent::RefundProcessed(refund)
                    | GatewayEvent::RefundFailed(refund),
                    Some(status),
                ) => {
                    self.cancellation
                        .apply_refund_update(booking, refund, status)
                        .await?
                }
                _ => return Ok(AuditOutcome::Ignored),
            },
            // Refund events never classify to accounts, nor payment events to refunds.
            _ => return Ok(AuditOutcome::Ignored),
        };

        Ok(match transition {
            Transition::Applied => AuditOutcome::Applied,
            Transition::AlreadyTerminal => AuditOutcome::Duplicate,
        })
    }

    /// Snapshot of the ledger, for reporting.
    pub async fn snapshot(&self) -> Result<(Vec<Booking>, Vec<TechnicianAccount>)> {
        let bookings = self.ctx.bookings.get_all().await?;
        let accounts = self.ctx.accounts.get_all().await?;
        Ok((bookings, accounts))
    }
}
