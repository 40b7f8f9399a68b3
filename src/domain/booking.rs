use super::money::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle phase of a booking. Variant order is the forward order of the
/// transition graph; `Cancelled` and `Refunded` are side exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Started,
    Completed,
    Cancelled,
    Refunded,
}

impl BookingStatus {
    /// Legal edges of the booking graph.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, InProgress)
                | (InProgress, Started)
                | (Started, Completed)
                | (Pending | Confirmed | InProgress, Cancelled | Refunded)
        )
    }

    /// Statuses from which the customer may still cancel.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::InProgress
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Refunded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in-progress",
            BookingStatus::Started => "started",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    #[default]
    None,
    Initiated,
    Processed,
    Failed,
}

impl RefundStatus {
    /// Refund confirmations may arrive in any order; once the gateway has
    /// settled the refund either way, later deliveries cannot reopen it.
    pub fn can_advance_to(self, next: RefundStatus) -> bool {
        match (self, next) {
            (RefundStatus::Processed | RefundStatus::Failed, _) => false,
            (RefundStatus::Initiated, RefundStatus::None | RefundStatus::Initiated) => false,
            (RefundStatus::None, RefundStatus::None) => false,
            _ => true,
        }
    }

    pub fn advanced_to(self, next: RefundStatus) -> RefundStatus {
        if self.can_advance_to(next) { next } else { self }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RefundStatus::None => "none",
            RefundStatus::Initiated => "initiated",
            RefundStatus::Processed => "processed",
            RefundStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RefundRecord {
    pub status: RefundStatus,
    pub refund_id: Option<String>,
    pub amount: Option<Amount>,
    pub date: Option<DateTime<Utc>>,
}

/// Which of the two payment legs of a booking an event settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentPhase {
    Initial,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub category_id: Uuid,
    pub employee_id: Option<Uuid>,
    pub status: BookingStatus,
    /// Outstanding gateway order. Reused by the final-payment phase.
    pub order_id: String,
    /// Gateway payment that settled the initial fee; refunds are issued against it.
    pub payment_id: Option<String>,
    pub final_payment_id: Option<String>,
    pub initial_payment_status: PaymentStatus,
    pub payment_status: PaymentStatus,
    pub initial_amount: Amount,
    pub service_amount: Option<Amount>,
    /// Whether `initial_amount` carries a fine surcharge.
    pub fine_applied: bool,
    pub is_active: bool,
    pub is_done: bool,
    pub refund: RefundRecord,
    pub created_at: DateTime<Utc>,
    /// Bumped by the store on every conditional update.
    #[serde(default)]
    pub version: u64,
}

impl Booking {
    pub fn new(
        customer_id: Uuid,
        category_id: Uuid,
        order_id: String,
        initial_amount: Amount,
        fine_applied: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            category_id,
            employee_id: None,
            status: BookingStatus::Pending,
            order_id,
            payment_id: None,
            final_payment_id: None,
            initial_payment_status: PaymentStatus::Pending,
            payment_status: PaymentStatus::Pending,
            initial_amount,
            service_amount: None,
            fine_applied,
            is_active: false,
            is_done: false,
            refund: RefundRecord::default(),
            created_at,
            version: 0,
        }
    }

    /// True while the booking still waits on its upfront fee. A payment event
    /// arriving for such a booking settles the initial phase; anything later
    /// settles the final phase.
    pub fn is_pre_confirmation(&self) -> bool {
        !self.is_active
            || self.initial_payment_status == PaymentStatus::Pending
            || self.status == BookingStatus::Pending
    }

    pub fn phase_for_payment_event(&self) -> PaymentPhase {
        if self.is_pre_confirmation() {
            PaymentPhase::Initial
        } else {
            PaymentPhase::Final
        }
    }

    /// Marks the upfront fee as paid and moves to `confirmed`.
    pub fn confirm_initial_payment(&mut self, payment_id: &str) {
        self.initial_payment_status = PaymentStatus::Paid;
        self.status = BookingStatus::Confirmed;
        self.is_active = true;
        self.payment_id = Some(payment_id.to_string());
    }

    pub fn confirm_final_payment(&mut self, payment_id: &str) {
        self.payment_status = PaymentStatus::Paid;
        self.status = BookingStatus::Completed;
        self.is_done = true;
        self.final_payment_id = Some(payment_id.to_string());
    }

    pub fn open_final_payment(&mut self, order_id: String, amount: Amount) {
        self.order_id = order_id;
        self.service_amount = Some(amount);
        self.payment_status = PaymentStatus::Pending;
    }
}

/// Proposed assignment of a technician to a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub employee_id: Uuid,
    pub is_accepted: bool,
    pub proposed_at: DateTime<Utc>,
}

impl Schedule {
    pub fn propose(booking_id: Uuid, employee_id: Uuid, proposed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            employee_id,
            is_accepted: false,
            proposed_at,
        }
    }
}
