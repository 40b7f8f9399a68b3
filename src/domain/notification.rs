use super::money::Amount;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Templated messages the engine asks the notification dispatcher to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum Notification {
    BookingConfirmed {
        booking_id: Uuid,
        customer_id: Uuid,
        amount: Amount,
    },
    TechnicianProposed {
        booking_id: Uuid,
        employee_id: Uuid,
    },
    AssignmentAccepted {
        booking_id: Uuid,
        customer_id: Uuid,
        employee_id: Uuid,
    },
    FinalPaymentRequested {
        booking_id: Uuid,
        customer_id: Uuid,
        amount: Amount,
    },
    ServiceCompleted {
        booking_id: Uuid,
        customer_id: Uuid,
    },
    BookingCancelled {
        booking_id: Uuid,
        customer_id: Uuid,
        refund_id: Option<String>,
        fine_imposed: bool,
    },
    AccountActivated {
        account_id: Uuid,
        applicant: String,
    },
}

impl Notification {
    pub fn template(&self) -> &'static str {
        match self {
            Notification::BookingConfirmed { .. } => "booking_confirmed",
            Notification::TechnicianProposed { .. } => "technician_proposed",
            Notification::AssignmentAccepted { .. } => "assignment_accepted",
            Notification::FinalPaymentRequested { .. } => "final_payment_requested",
            Notification::ServiceCompleted { .. } => "service_completed",
            Notification::BookingCancelled { .. } => "booking_cancelled",
            Notification::AccountActivated { .. } => "account_activated",
        }
    }
}
