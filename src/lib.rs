//! esledger Library
//!
//! Re-exports modules for integration testing and external use.

pub mod aggregate;
pub mod api;
pub mod audit;
pub mod codec;
pub mod context;
pub mod domain;
pub mod event_store;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod outbox;
pub mod projection;
pub mod snapshot;
pub mod transaction;

// Private modules (used only by main.rs binary)
pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use domain::{Amount, AmountError, Balance, OperationContext, DomainError};
pub use domain::{AccountEvent, TransferEvent, UserEvent};
pub use aggregate::{AggregateRepository, AggregateRoot, ReplayError};
pub use event_store::{AggregateOperation, EventEnvelope, EventStore, EventStoreError, EventStream};
pub use outbox::{Outbox, OutboxEntry, OutboxProcessor};
pub use snapshot::SnapshotStore;
pub use transaction::{TransactionCoordinator, TransactionError};
