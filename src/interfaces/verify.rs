use super::signature;
use crate::application::engine::MarketplaceEngine;
use crate::domain::Transition;
use crate::error::{MarketplaceError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Body of a client verify-payment call, posted after checkout completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyPaymentRequest {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    /// Customer id for bookings, applicant identity for onboarding.
    pub customer_identity: String,
}

/// Synchronous verify-payment entry points, one per phase. They race the
/// webhook path and share its transition operations, so whichever lands
/// second sees [`Transition::AlreadyTerminal`].
#[derive(Clone)]
pub struct PaymentVerifier {
    engine: MarketplaceEngine,
}

impl PaymentVerifier {
    pub fn new(engine: MarketplaceEngine) -> Self {
        Self { engine }
    }

    pub async fn verify_initial(&self, request: &VerifyPaymentRequest) -> Result<Transition> {
        self.check_signature(request)?;
        let booking = self.engine.bookings.find_by_order(&request.order_id).await?;
        ensure_owner(booking.customer_id.to_string(), request)?;
        self.engine
            .bookings
            .confirm_initial(booking, &request.payment_id)
            .await
    }

    pub async fn verify_final(&self, request: &VerifyPaymentRequest) -> Result<Transition> {
        self.check_signature(request)?;
        let booking = self.engine.bookings.find_by_order(&request.order_id).await?;
        ensure_owner(booking.customer_id.to_string(), request)?;
        self.engine
            .bookings
            .confirm_final(booking, &request.payment_id)
            .await
    }

    pub async fn verify_account(&self, request: &VerifyPaymentRequest) -> Result<Transition> {
        self.check_signature(request)?;
        let account = self
            .engine
            .context()
            .accounts
            .find_by_order_id(&request.order_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("account", &request.order_id))?;
        ensure_owner(account.applicant.clone(), request)?;
        self.engine
            .activation
            .confirm(account, &request.payment_id)
            .await
    }

    fn check_signature(&self, request: &VerifyPaymentRequest) -> Result<()> {
        let secret = &self.engine.context().policy.payment_secret;
        let message = signature::payment_message(&request.order_id, &request.payment_id);
        if signature::verify(secret, message.as_bytes(), &request.signature) {
            Ok(())
        } else {
            warn!(order_id = %request.order_id, "Rejected verify call with invalid signature");
            Err(MarketplaceError::InvalidSignature)
        }
    }
}

fn ensure_owner(owner: String, request: &VerifyPaymentRequest) -> Result<()> {
    if owner != request.customer_identity {
        return Err(MarketplaceError::ValidationError(format!(
            "Order {} does not belong to {}",
            request.order_id, request.customer_identity
        )));
    }
    Ok(())
}
