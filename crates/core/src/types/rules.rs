//! Validation rules as data.
//!
//! Rule sets are supplied by the caller's domain (per operation type) and
//! evaluated by a `Validator`. A rule names a field by dot path, marks it
//! required or optional, and lists composable predicates.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FieldErrors, Result};

/// Parse YAML in which enum variants with arguments are written as
/// single-key maps (`- min_length: 1`) and unit variants as plain strings.
pub fn from_yaml_str<T: DeserializeOwned>(content: &str) -> Result<T> {
    let value = serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(content))?;
    Ok(value)
}

/// Whether a field must be present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Required,
    #[default]
    Optional,
}

/// A composable predicate over a JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Minimum length of a string (chars), array, or object.
    MinLength(usize),
    MaxLength(usize),
    Min(f64),
    Max(f64),
    /// Regular expression a string must match.
    Pattern(String),
    OneOf(Vec<Value>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
    /// A named check registered on the validator.
    Custom(String),
}

/// Constraint on one field of a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Dot path into the payload; empty means the payload itself.
    pub field: String,
    #[serde(default)]
    pub presence: Presence,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    /// Message replacing the generated one on failure.
    #[serde(default)]
    pub message: Option<String>,
}

impl FieldRule {
    pub fn required(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            presence: Presence::Required,
            predicates: Vec::new(),
            message: None,
        }
    }

    pub fn optional(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            presence: Presence::Optional,
            predicates: Vec::new(),
            message: None,
        }
    }

    pub fn check(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Ordered collection of field rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub fields: Vec<FieldRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: FieldRule) -> Self {
        self.fields.push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        from_yaml_str(content)
    }
}

/// Outcome of validating a value against a rule set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: FieldErrors,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record a violation; the first one per field wins.
    pub fn add(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.errors.entry(field.into()).or_insert_with(|| reason.into());
    }

    pub fn into_errors(self) -> FieldErrors {
        self.errors
    }
}

/// Resolve a dot path inside a JSON value. Numeric segments index arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup() {
        let v = json!({"meta": {"tags": ["a", "b"]}, "title": "x"});
        assert_eq!(lookup(&v, "title"), Some(&json!("x")));
        assert_eq!(lookup(&v, "meta.tags.1"), Some(&json!("b")));
        assert_eq!(lookup(&v, "meta.missing"), None);
        assert_eq!(lookup(&v, ""), Some(&v));
    }

    #[test]
    fn test_rules_from_yaml() {
        let yaml = r#"
fields:
  - field: title
    presence: required
    predicates:
      - string
      - min_length: 3
  - field: status
    predicates:
      - one_of: ["draft", "published"]
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.fields.len(), 2);
        assert_eq!(rules.fields[0].presence, Presence::Required);
        assert_eq!(rules.fields[0].predicates[0], Predicate::String);
        assert_eq!(rules.fields[0].predicates[1], Predicate::MinLength(3));
        assert_eq!(rules.fields[1].presence, Presence::Optional);
        assert_eq!(
            rules.fields[1].predicates[0],
            Predicate::OneOf(vec![json!("draft"), json!("published")])
        );
    }

    #[test]
    fn test_nested_predicates_from_yaml() {
        let yaml = r#"
fields:
  - field: slug
    predicates:
      - all:
          - pattern: "^[a-z-]+$"
          - not:
              one_of: ["admin"]
      - any:
          - max_length: 64
          - custom: legacy_slug
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(
            rules.fields[0].predicates,
            vec![
                Predicate::All(vec![
                    Predicate::Pattern("^[a-z-]+$".to_string()),
                    Predicate::Not(Box::new(Predicate::OneOf(vec![json!("admin")]))),
                ]),
                Predicate::Any(vec![Predicate::MaxLength(64), Predicate::Custom("legacy_slug".to_string())]),
            ]
        );
    }

    #[test]
    fn test_first_violation_per_field_wins() {
        let mut result = ValidationResult::ok();
        result.add("a", "first");
        result.add("a", "second");
        assert_eq!(result.errors["a"], "first");
        assert!(!result.is_ok());
    }
}
