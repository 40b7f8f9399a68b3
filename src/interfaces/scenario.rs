//! JSON-lines scenarios for the sandbox simulator.
//!
//! Each line is one step. Records are referred to by labels chosen in the
//! scenario; customers and technicians get an id the first time their label
//! appears. Blank lines and lines starting with `#` are skipped.

use super::signature;
use super::verify::{PaymentVerifier, VerifyPaymentRequest};
use super::webhook::WebhookIngress;
use crate::application::activation::OnboardingApplication;
use crate::application::engine::MarketplaceEngine;
use crate::domain::event::{GatewayEvent, PaymentEntity, RefundEntity};
use crate::domain::money::{Amount, MinorUnits};
use crate::domain::pricing::{FeeConfig, ServiceCategory};
use crate::error::{MarketplaceError, Result};
use crate::infrastructure::clock::ManualClock;
use chrono::TimeDelta;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::BufRead;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScenarioStep {
    Fees {
        booking_fee: Decimal,
        fine_amount: Decimal,
        onboarding_fee: Decimal,
    },
    Category {
        label: String,
        name: String,
        min_pay_rate: Decimal,
        max_pay_rate: Decimal,
    },
    Book {
        label: String,
        customer: String,
        category: String,
    },
    VerifyInitial {
        booking: String,
        payment_id: String,
        /// Sign with the wrong key, to exercise rejection.
        #[serde(default)]
        forge: bool,
    },
    /// Delivers a signed gateway event. Payment events target a booking or
    /// an account by label; refund events target a booking's refund.
    Webhook {
        event: String,
        #[serde(default)]
        booking: Option<String>,
        #[serde(default)]
        account: Option<String>,
        #[serde(default)]
        payment_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Assign {
        booking: String,
        technician: String,
    },
    Accept {
        booking: String,
        technician: String,
    },
    Start {
        booking: String,
        technician: String,
    },
    RequestFinal {
        booking: String,
        technician: String,
        amount: Decimal,
    },
    VerifyFinal {
        booking: String,
        payment_id: String,
    },
    Cancel {
        booking: String,
    },
    Advance {
        minutes: i64,
    },
    Onboard {
        label: String,
        applicant: String,
        category: String,
        pay_rate: Decimal,
    },
    VerifyAccount {
        account: String,
        payment_id: String,
    },
}

/// Reads scenario steps from any buffered source, one per line.
pub struct ScenarioReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily parses steps, yielding the 1-based line number with each.
    /// A malformed line yields an error and reading carries on.
    pub fn steps(self) -> impl Iterator<Item = (usize, Result<ScenarioStep>)> {
        self.source
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let line_no = index + 1;
                match line {
                    Err(e) => Some((line_no, Err(MarketplaceError::from(e)))),
                    Ok(text) => {
                        let trimmed = text.trim();
                        if trimmed.is_empty() || trimmed.starts_with('#') {
                            None
                        } else {
                            Some((line_no, serde_json::from_str(trimmed).map_err(Into::into)))
                        }
                    }
                }
            })
    }
}

/// Drives an engine through scenario steps, playing both the client and
/// the gateway. Requests are signed with the engine's configured secrets.
pub struct ScenarioRunner {
    engine: MarketplaceEngine,
    verifier: PaymentVerifier,
    ingress: WebhookIngress,
    clock: ManualClock,
    categories: HashMap<String, Uuid>,
    bookings: HashMap<String, Uuid>,
    accounts: HashMap<String, String>,
    people: HashMap<String, Uuid>,
}

impl ScenarioRunner {
    pub fn new(engine: MarketplaceEngine, clock: ManualClock) -> Self {
        Self {
            verifier: PaymentVerifier::new(engine.clone()),
            ingress: WebhookIngress::new(engine.clone()),
            engine,
            clock,
            categories: HashMap::new(),
            bookings: HashMap::new(),
            accounts: HashMap::new(),
            people: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &MarketplaceEngine {
        &self.engine
    }

    pub async fn apply(&mut self, step: ScenarioStep) -> Result<()> {
        match step {
            ScenarioStep::Fees {
                booking_fee,
                fine_amount,
                onboarding_fee,
            } => {
                let fees = FeeConfig {
                    booking_fee: Amount::new(booking_fee)?,
                    fine_amount: Amount::new(fine_amount)?,
                    onboarding_fee: Amount::new(onboarding_fee)?,
                };
                self.engine.context().catalog.set_fees(fees).await?;
            }
            ScenarioStep::Category {
                label,
                name,
                min_pay_rate,
                max_pay_rate,
            } => {
                let category = ServiceCategory {
                    id: Uuid::new_v4(),
                    name,
                    min_pay_rate: Amount::new(min_pay_rate)?,
                    max_pay_rate: Amount::new(max_pay_rate)?,
                };
                self.categories.insert(label, category.id);
                self.engine.context().catalog.put_category(category).await?;
            }
            ScenarioStep::Book {
                label,
                customer,
                category,
            } => {
                let customer_id = self.person(&customer);
                let category_id = self.category(&category)?;
                let receipt = self.engine.bookings.create(customer_id, category_id).await?;
                info!(%label, booking_id = %receipt.booking.id, "Scenario booking created");
                self.bookings.insert(label, receipt.booking.id);
            }
            ScenarioStep::VerifyInitial {
                booking,
                payment_id,
                forge,
            } => {
                let request = self.booking_request(&booking, payment_id, forge).await?;
                self.verifier.verify_initial(&request).await?;
            }
            ScenarioStep::VerifyFinal {
                booking,
                payment_id,
            } => {
                let request = self.booking_request(&booking, payment_id, false).await?;
                self.verifier.verify_final(&request).await?;
            }
            ScenarioStep::VerifyAccount {
                account,
                payment_id,
            } => {
                let applicant = self.applicant(&account)?;
                let order_id = self.account_order(&applicant).await?;
                let request = self.signed_request(order_id, payment_id, applicant, false)?;
                self.verifier.verify_account(&request).await?;
            }
            ScenarioStep::Webhook {
                event,
                booking,
                account,
                payment_id,
                error,
            } => {
                let event = self
                    .gateway_event(&event, booking, account, payment_id, error)
                    .await?;
                self.deliver(&event).await?;
            }
            ScenarioStep::Assign {
                booking,
                technician,
            } => {
                let booking_id = self.booking(&booking)?;
                let employee_id = self.person(&technician);
                self.engine.bookings.assign(booking_id, employee_id).await?;
            }
            ScenarioStep::Accept {
                booking,
                technician,
            } => {
                let booking_id = self.booking(&booking)?;
                let employee_id = self.person(&technician);
                self.engine.bookings.accept(booking_id, employee_id).await?;
            }
            ScenarioStep::Start {
                booking,
                technician,
            } => {
                let booking_id = self.booking(&booking)?;
                let employee_id = self.person(&technician);
                self.engine.bookings.start(booking_id, employee_id).await?;
            }
            ScenarioStep::RequestFinal {
                booking,
                technician,
                amount,
            } => {
                let booking_id = self.booking(&booking)?;
                let employee_id = self.person(&technician);
                self.engine
                    .bookings
                    .request_final_payment(booking_id, employee_id, amount)
                    .await?;
            }
            ScenarioStep::Cancel { booking } => {
                let booking_id = self.booking(&booking)?;
                let customer_id = self.engine.bookings.load(booking_id).await?.customer_id;
                self.engine.cancellation.cancel(booking_id, customer_id).await?;
            }
            ScenarioStep::Advance { minutes } => {
                self.clock.advance(TimeDelta::minutes(minutes));
            }
            ScenarioStep::Onboard {
                label,
                applicant,
                category,
                pay_rate,
            } => {
                let category_id = self.category(&category)?;
                let outcome = self
                    .engine
                    .activation
                    .submit(OnboardingApplication {
                        applicant: applicant.clone(),
                        category_id,
                        pay_rate,
                        recruited_by: None,
                    })
                    .await?;
                info!(%label, account_id = %outcome.account().id, "Scenario onboarding submitted");
                self.accounts.insert(label, applicant);
            }
        }
        Ok(())
    }

    /// Signs and hands an event to the webhook ingress, as the gateway would.
    pub async fn deliver(&self, event: &GatewayEvent) -> Result<()> {
        let body = serde_json::to_vec(&event.to_envelope())?;
        let secret = &self.engine.context().policy.webhook_secret;
        let header = signature::sign(secret, &body)?;
        let ack = self.ingress.handle(&body, &header).await?;
        info!(event = event.kind(), outcome = ?ack.outcome, "Scenario webhook delivered");
        Ok(())
    }

    async fn gateway_event(
        &self,
        kind: &str,
        booking: Option<String>,
        account: Option<String>,
        payment_id: Option<String>,
        error: Option<String>,
    ) -> Result<GatewayEvent> {
        let payment = |order_id: String, amount: MinorUnits| PaymentEntity {
            id: payment_id.clone().unwrap_or_else(|| format!("pay_{order_id}")),
            order_id,
            amount,
            error_description: error.clone(),
        };

        if let Some(label) = account {
            let applicant = self.applicant(&label)?;
            let order_id = self.account_order(&applicant).await?;
            let entity = payment(order_id, MinorUnits(0));
            return decode_known(kind, serde_json::json!({ "payment": { "entity": entity } }));
        }

        let label = booking.ok_or_else(|| {
            MarketplaceError::ValidationError("Webhook step needs a booking or account".into())
        })?;
        let booking = self.engine.bookings.load(self.booking(&label)?).await?;
        if kind.starts_with("refund.") {
            let entity = RefundEntity {
                id: booking.refund.refund_id.clone().unwrap_or_default(),
                payment_id: booking.payment_id.clone().unwrap_or_default(),
                amount: booking.initial_amount.to_minor_units()?,
            };
            decode_known(kind, serde_json::json!({ "refund": { "entity": entity } }))
        } else {
            let amount = booking
                .service_amount
                .unwrap_or(booking.initial_amount)
                .to_minor_units()?;
            let entity = payment(booking.order_id, amount);
            decode_known(kind, serde_json::json!({ "payment": { "entity": entity } }))
        }
    }

    async fn booking_request(
        &self,
        label: &str,
        payment_id: String,
        forge: bool,
    ) -> Result<VerifyPaymentRequest> {
        let booking = self.engine.bookings.load(self.booking(label)?).await?;
        self.signed_request(
            booking.order_id,
            payment_id,
            booking.customer_id.to_string(),
            forge,
        )
    }

    fn signed_request(
        &self,
        order_id: String,
        payment_id: String,
        customer_identity: String,
        forge: bool,
    ) -> Result<VerifyPaymentRequest> {
        let secret = if forge {
            "forged"
        } else {
            self.engine.context().policy.payment_secret.as_str()
        };
        let message = signature::payment_message(&order_id, &payment_id);
        Ok(VerifyPaymentRequest {
            signature: signature::sign(secret, message.as_bytes())?,
            order_id,
            payment_id,
            customer_identity,
        })
    }

    async fn account_order(&self, applicant: &str) -> Result<String> {
        self.engine
            .context()
            .accounts
            .find_by_applicant(applicant)
            .await?
            .and_then(|a| a.order_id)
            .ok_or_else(|| MarketplaceError::not_found("account order", applicant))
    }

    fn person(&mut self, label: &str) -> Uuid {
        *self
            .people
            .entry(label.to_string())
            .or_insert_with(Uuid::new_v4)
    }

    fn category(&self, label: &str) -> Result<Uuid> {
        lookup(&self.categories, "category", label).copied()
    }

    fn booking(&self, label: &str) -> Result<Uuid> {
        lookup(&self.bookings, "booking", label).copied()
    }

    fn applicant(&self, label: &str) -> Result<String> {
        lookup(&self.accounts, "account", label).cloned()
    }
}

fn lookup<'a, T>(
    labels: &'a HashMap<String, T>,
    entity: &'static str,
    label: &str,
) -> Result<&'a T> {
    labels
        .get(label)
        .ok_or_else(|| MarketplaceError::not_found(entity, format!("label {label}")))
}

fn decode_known(kind: &str, payload: serde_json::Value) -> Result<GatewayEvent> {
    GatewayEvent::decode(kind, payload)?
        .ok_or_else(|| MarketplaceError::ValidationError(format!("Unsupported event {kind}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_skips_comments_and_reports_bad_lines() {
        let data = r#"# setup
{"step":"fees","booking_fee":"500","fine_amount":"100","onboarding_fee":"1000"}

{"step":"teleport"}
{"step":"advance","minutes":25}
"#;
        let steps: Vec<(usize, Result<ScenarioStep>)> =
            ScenarioReader::new(data.as_bytes()).steps().collect();

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].0, 2);
        assert_eq!(
            steps[0].1.as_ref().unwrap(),
            &ScenarioStep::Fees {
                booking_fee: dec!(500),
                fine_amount: dec!(100),
                onboarding_fee: dec!(1000),
            }
        );
        assert_eq!(steps[1].0, 4);
        assert!(steps[1].1.is_err());
        assert_eq!(steps[2].1.as_ref().unwrap(), &ScenarioStep::Advance { minutes: 25 });
    }

    #[test]
    fn test_webhook_step_defaults() {
        let step: ScenarioStep =
            serde_json::from_str(r#"{"step":"webhook","event":"payment.captured","booking":"b1"}"#)
                .unwrap();
        assert_eq!(
            step,
            ScenarioStep::Webhook {
                event: "payment.captured".to_string(),
                booking: Some("b1".to_string()),
                account: None,
                payment_id: None,
                error: None,
            }
        );
    }
}
