//! Collaborator traits for Bastion.
//!
//! These traits define the seams between the executor and the surrounding
//! application: storage, audit persistence, identity, notification.

pub mod governance;
pub mod state_store;

pub use governance::*;
pub use state_store::*;
