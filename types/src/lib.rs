//! Common types for the promolane reward engine.
//!
//! This crate holds the domain model shared by the engine and the API service:
//! catalog templates, reward instances with their lifecycle statuses, stake
//! events, the engine event feed, API view models, and the error taxonomy.
//! It performs no I/O.

pub mod api;
pub mod catalog;
pub mod error;
pub mod event;
pub mod instance;

pub use api::{InstanceView, QueueView, SettlementOutcome, SweepReport};
pub use catalog::{RewardCategory, RewardTemplate, TemplateError};
pub use error::RewardError;
pub use event::RewardEvent;
pub use instance::{InstanceStatus, PendingCredit, RewardInstance, StakeEvent, WagerProgress};
