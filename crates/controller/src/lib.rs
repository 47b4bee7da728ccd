//! Operation controller for Bastion.
//!
//! This crate provides the guarded executor that drives an operation
//! through validation, authorization, checkpointing, execution and commit,
//! and the failure handling that restores, escalates and audits.

pub mod builder;
pub mod cancel;
pub mod executor;
pub mod failure_window;
pub mod state;

mod run;

pub use builder::ExecutorBuilder;
pub use cancel::{CancelCoordinator, CancelSignal};
pub use executor::{ExecuteOptions, OperationExecutor, OperationFailed, Outcome};
pub use failure_window::FailureWindow;
pub use state::StateTracker;
