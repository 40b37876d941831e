//! Command Handlers module
//!
//! CQRS Command handlers that orchestrate business operations.
//! Each handler coordinates aggregates, event store, and projections.

mod burn_handler;
mod commands;
mod deactivate_user_handler;
mod mint_handler;
mod transfer_handler;
mod update_user_handler;
mod user_handler;

#[cfg(test)]
mod tests;

pub use commands::*;
pub use burn_handler::{BurnCommand, BurnHandler, BurnResult};
pub use deactivate_user_handler::{DeactivateUserCommand, DeactivateUserHandler, DeactivateUserResult};
pub use mint_handler::MintHandler;
pub use transfer_handler::TransferHandler;
pub use update_user_handler::{UpdateUserCommand, UpdateUserHandler, UpdateUserResult};
pub use user_handler::CreateUserHandler;
