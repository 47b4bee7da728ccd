//! Core type definitions for Bastion.
//!
//! Data shapes shared by every layer of the envelope: operations, security
//! contexts, checkpoints, audit records, metric samples and validation rules.

pub mod audit;
pub mod checkpoint;
pub mod context;
pub mod escalation;
pub mod metrics;
pub mod operation;
pub mod rules;
pub mod state;

pub use audit::*;
pub use checkpoint::*;
pub use context::*;
pub use escalation::*;
pub use metrics::*;
pub use operation::*;
pub use rules::*;
pub use state::*;
