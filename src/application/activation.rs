use super::context::EngineContext;
use crate::domain::Transition;
use crate::domain::account::TechnicianAccount;
use crate::domain::booking::PaymentStatus;
use crate::domain::money::Amount;
use crate::domain::notification::Notification;
use crate::domain::ports::GatewayOrder;
use crate::domain::pricing::ServiceCategory;
use crate::error::{MarketplaceError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const UNSETTLED: [PaymentStatus; 2] = [PaymentStatus::Pending, PaymentStatus::Failed];

/// Cache key holding an applicant's in-flight onboarding order.
pub fn order_cache_key(applicant: &str) -> String {
    format!("{applicant}_order")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingApplication {
    pub applicant: String,
    pub category_id: Uuid,
    pub pay_rate: Decimal,
    #[serde(default)]
    pub recruited_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardingOutcome {
    OrderCreated {
        account: TechnicianAccount,
        order: GatewayOrder,
    },
    /// Resubmission inside the idempotency window: the cached order is returned.
    OrderReused {
        account: TechnicianAccount,
        order: GatewayOrder,
    },
    AlreadyActive {
        account: TechnicianAccount,
    },
}

impl OnboardingOutcome {
    pub fn account(&self) -> &TechnicianAccount {
        match self {
            Self::OrderCreated { account, .. }
            | Self::OrderReused { account, .. }
            | Self::AlreadyActive { account } => account,
        }
    }

    pub fn order(&self) -> Option<&GatewayOrder> {
        match self {
            Self::OrderCreated { order, .. } | Self::OrderReused { order, .. } => Some(order),
            Self::AlreadyActive { .. } => None,
        }
    }
}

/// Technician onboarding, gated by a one-time activation fee.
#[derive(Clone)]
pub struct ActivationGate {
    ctx: Arc<EngineContext>,
}

impl ActivationGate {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn submit(&self, application: OnboardingApplication) -> Result<OnboardingOutcome> {
        let applicant = application.applicant.trim().to_string();
        if applicant.is_empty() {
            return Err(MarketplaceError::ValidationError(
                "Applicant identity is required".to_string(),
            ));
        }
        let pay_rate = Amount::new(application.pay_rate)?;
        self.category(application.category_id)
            .await?
            .validate_pay_rate(pay_rate)?;

        let existing = self.ctx.accounts.find_by_applicant(&applicant).await?;
        if let Some(account) = &existing
            && account.is_paid
        {
            debug!(account_id = %account.id, "Onboarding resubmitted for an active account");
            return Ok(OnboardingOutcome::AlreadyActive {
                account: account.clone(),
            });
        }

        let key = order_cache_key(&applicant);
        if let Some(order) = self.cached_order(&key).await
            && let Some(account) = &existing
            && account.order_id.as_deref() == Some(order.id.as_str())
        {
            info!(account_id = %account.id, order_id = %order.id, "Reusing in-flight onboarding order");
            return Ok(OnboardingOutcome::OrderReused {
                account: account.clone(),
                order,
            });
        }

        let fees = self.ctx.fees().await?;
        let receipt = format!("onb_{}", self.ctx.clock.now().timestamp_millis());
        let order = self.ctx.open_order(fees.onboarding_fee, &receipt).await?;

        let account = match existing {
            Some(mut account) => {
                let expected = [account.payment_status];
                account.category_id = application.category_id;
                account.pay_rate = pay_rate;
                account.recruited_by = application.recruited_by.or(account.recruited_by);
                account.order_id = Some(order.id.clone());
                account.payment_status = PaymentStatus::Pending;
                if !self
                    .ctx
                    .accounts
                    .update_if_payment_status(&account, &expected)
                    .await?
                {
                    return self.resolve_lost_submission(account.id).await;
                }
                account
            }
            None => {
                let mut account = TechnicianAccount::new(
                    applicant,
                    application.category_id,
                    pay_rate,
                    application.recruited_by,
                    self.ctx.clock.now(),
                );
                account.order_id = Some(order.id.clone());
                self.ctx.accounts.store(account.clone()).await?;
                account
            }
        };

        match serde_json::to_string(&order) {
            Ok(raw) => {
                if let Err(e) = self.ctx.cache.set(&key, raw, self.ctx.policy.order_ttl).await {
                    warn!(%key, error = %e, "Could not cache onboarding order");
                }
            }
            Err(e) => warn!(%key, error = %e, "Could not serialize onboarding order"),
        }
        info!(account_id = %account.id, order_id = %order.id, "Onboarding order created");
        Ok(OnboardingOutcome::OrderCreated { account, order })
    }

    pub async fn confirm_payment(&self, order_id: &str, payment_id: &str) -> Result<Transition> {
        let account = self
            .ctx
            .accounts
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("account", order_id))?;
        self.confirm(account, payment_id).await
    }

    /// Activates the account. Idempotent: a paid account is left untouched.
    pub async fn confirm(&self, account: TechnicianAccount, payment_id: &str) -> Result<Transition> {
        if account.is_paid {
            return Ok(Transition::AlreadyTerminal);
        }
        let mut next = account;
        next.activate(payment_id);
        if !self
            .ctx
            .accounts
            .update_if_payment_status(&next, &UNSETTLED)
            .await?
        {
            return Ok(Transition::AlreadyTerminal);
        }
        info!(account_id = %next.id, payment_id, "Technician account activated");

        if let Err(e) = self.ctx.cache.delete(&order_cache_key(&next.applicant)).await {
            warn!(account_id = %next.id, error = %e, "Could not evict onboarding order");
        }
        self.ctx
            .notify(Notification::AccountActivated {
                account_id: next.id,
                applicant: next.applicant.clone(),
            })
            .await;
        Ok(Transition::Applied)
    }

    pub async fn fail(&self, account: TechnicianAccount, reason: Option<&str>) -> Result<Transition> {
        if account.payment_status != PaymentStatus::Pending {
            return Ok(Transition::AlreadyTerminal);
        }
        let mut next = account;
        next.payment_status = PaymentStatus::Failed;
        if !self
            .ctx
            .accounts
            .update_if_payment_status(&next, &[PaymentStatus::Pending])
            .await?
        {
            return Ok(Transition::AlreadyTerminal);
        }
        warn!(account_id = %next.id, reason, "Onboarding payment failed");
        Ok(Transition::Applied)
    }

    /// Changes category or pay rate. The band is enforced here exactly as at
    /// submission; payment state is not touched.
    pub async fn update_profile(
        &self,
        account_id: Uuid,
        category_id: Uuid,
        pay_rate: Decimal,
    ) -> Result<TechnicianAccount> {
        let pay_rate = Amount::new(pay_rate)?;
        self.category(category_id).await?.validate_pay_rate(pay_rate)?;

        let mut account = self
            .ctx
            .accounts
            .get(account_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("account", account_id))?;
        let expected = [account.payment_status];
        account.category_id = category_id;
        account.pay_rate = pay_rate;
        if !self
            .ctx
            .accounts
            .update_if_payment_status(&account, &expected)
            .await?
        {
            return Err(MarketplaceError::StorageError(format!(
                "Account {account_id} changed during profile update"
            )));
        }
        info!(%account_id, %pay_rate, "Technician profile updated");
        Ok(account)
    }

    async fn category(&self, category_id: Uuid) -> Result<ServiceCategory> {
        self.ctx
            .catalog
            .category(category_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("category", category_id))
    }

    /// The cache is advisory: read failures and stale entries fall through
    /// to minting a new order.
    async fn cached_order(&self, key: &str) -> Option<GatewayOrder> {
        match self.ctx.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(order) => Some(order),
                Err(e) => {
                    warn!(key, error = %e, "Discarding unreadable cached order");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Order cache unavailable");
                None
            }
        }
    }

    async fn resolve_lost_submission(&self, account_id: Uuid) -> Result<OnboardingOutcome> {
        let account = self
            .ctx
            .accounts
            .get(account_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("account", account_id))?;
        if account.is_paid {
            return Ok(OnboardingOutcome::AlreadyActive { account });
        }
        Err(MarketplaceError::StorageError(format!(
            "Account {account_id} changed during onboarding submission"
        )))
    }
}
