use super::booking::PaymentStatus;
use super::money::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A technician's onboarding record, gated by a one-time activation fee.
///
/// Mirrors the initial-payment phase of a booking: it may sit unpaid
/// indefinitely and only becomes active once the gateway confirms the fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicianAccount {
    pub id: Uuid,
    /// Identity the applicant registered with (email or phone).
    pub applicant: String,
    pub category_id: Uuid,
    pub pay_rate: Amount,
    /// Field recruiter who submitted the application, if any.
    pub recruited_by: Option<Uuid>,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub is_paid: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TechnicianAccount {
    pub fn new(
        applicant: String,
        category_id: Uuid,
        pay_rate: Amount,
        recruited_by: Option<Uuid>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            applicant,
            category_id,
            pay_rate,
            recruited_by,
            order_id: None,
            payment_id: None,
            payment_status: PaymentStatus::Pending,
            is_paid: false,
            is_active: false,
            created_at,
        }
    }

    pub fn activate(&mut self, payment_id: &str) {
        self.is_paid = true;
        self.is_active = true;
        self.payment_status = PaymentStatus::Paid;
        self.payment_id = Some(payment_id.to_string());
    }
}
