//! Outer surfaces: the verify-payment and webhook entry points, the
//! scenario driver and CSV reporting for the simulator.

pub mod csv;
pub mod scenario;
pub mod signature;
pub mod verify;
pub mod webhook;
