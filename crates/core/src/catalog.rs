//! Per-operation-type hooks.
//!
//! Every operation type the executor accepts is described by a profile:
//! validation rules for input and result, required capabilities, whether it
//! mutates state, and optional rate-limit and deadline overrides.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{from_yaml_str, RuleSet};

fn default_true() -> bool {
    true
}

/// Hooks for one operation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationProfile {
    pub operation_type: String,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub input_rules: RuleSet,
    #[serde(default)]
    pub result_rules: RuleSet,
    /// Mutating operations always run under a checkpoint.
    #[serde(default = "default_true")]
    pub mutating: bool,
    /// Max requests per principal per rate-limit window.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    /// Deadline for the unit of work, in milliseconds.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl OperationProfile {
    pub fn new(operation_type: impl Into<String>) -> Self {
        Self {
            operation_type: operation_type.into(),
            required_capabilities: BTreeSet::new(),
            input_rules: RuleSet::default(),
            result_rules: RuleSet::default(),
            mutating: true,
            rate_limit: None,
            deadline_ms: None,
        }
    }

    pub fn require(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    pub fn with_input_rules(mut self, rules: RuleSet) -> Self {
        self.input_rules = rules;
        self
    }

    pub fn with_result_rules(mut self, rules: RuleSet) -> Self {
        self.result_rules = rules;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.mutating = false;
        self
    }

    pub fn with_rate_limit(mut self, max_requests: u32) -> Self {
        self.rate_limit = Some(max_requests);
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    operations: Vec<OperationProfile>,
}

/// Registry of operation profiles keyed by type.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    profiles: HashMap<String, OperationProfile>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a YAML file with an `operations:` list.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::configuration(format!(
                "Failed to read operation catalog {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: CatalogFile = from_yaml_str(content)?;
        let mut catalog = Self::new();
        for profile in file.operations {
            if catalog.profiles.contains_key(&profile.operation_type) {
                return Err(Error::configuration(format!(
                    "Duplicate operation type in catalog: {}",
                    profile.operation_type
                )));
            }
            catalog.insert(profile);
        }
        Ok(catalog)
    }

    /// Add a profile, builder-style.
    pub fn with(mut self, profile: OperationProfile) -> Self {
        self.insert(profile);
        self
    }

    /// Add or replace a profile.
    pub fn insert(&mut self, profile: OperationProfile) {
        self.profiles.insert(profile.operation_type.clone(), profile);
    }

    pub fn get(&self, operation_type: &str) -> Option<&OperationProfile> {
        self.profiles.get(operation_type)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
