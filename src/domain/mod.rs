//! Domain model: ledger records, money, gateway events and the ports the
//! engine talks to the outside world through.

pub mod account;
pub mod booking;
pub mod event;
pub mod money;
pub mod notification;
pub mod ports;
pub mod pricing;

/// Result of a conditional state transition.
///
/// `AlreadyTerminal` means another writer (a duplicate delivery, or the
/// racing verify call) already moved the record past the guarded status.
/// It is success, not a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    AlreadyTerminal,
}

impl Transition {
    pub fn is_applied(self) -> bool {
        self == Transition::Applied
    }
}
