//! Application layer containing the lifecycle orchestration.
//!
//! `MarketplaceEngine` is the entry point. It wires the booking state
//! machine, the cancellation orchestrator, the onboarding activation gate
//! and the webhook event classifier over one shared `EngineContext`.

pub mod activation;
pub mod booking;
pub mod cancellation;
pub mod classifier;
pub mod context;
pub mod engine;
