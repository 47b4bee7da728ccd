//! Core types, traits, and error definitions for Bastion.
//!
//! This crate provides the building blocks shared by every layer of the
//! protected operation envelope: the error taxonomy and its classification,
//! the data model, collaborator traits, configuration and the operation
//! catalog.

pub mod catalog;
pub mod classify;
pub mod config;
pub mod error;
pub mod mocks;
pub mod traits;
pub mod types;

pub use catalog::{OperationCatalog, OperationProfile};
pub use classify::{Classification, ClassificationPolicy};
pub use config::BastionConfig;
pub use error::{Error, ErrorKind, FieldErrors, Result};
pub use traits::*;
pub use types::*;
