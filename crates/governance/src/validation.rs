//! Rule-driven payload and result validation.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;

use bastion_core::{
    traits::Validator,
    types::{lookup, Predicate, Presence, RuleSet, ValidationResult},
};

/// A named business check referenced by `Predicate::Custom`.
pub type CustomCheck = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Default [`Validator`] evaluating [`RuleSet`]s.
///
/// Compiled patterns are cached across calls. Custom checks are registered
/// by name and looked up when a rule references them; an unknown name fails
/// the field rather than passing silently.
#[derive(Default, Clone)]
pub struct RuleValidator {
    patterns: Arc<DashMap<String, Regex>>,
    checks: HashMap<String, CustomCheck>,
}

impl RuleValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named check.
    pub fn with_check<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.checks.insert(name.into(), Arc::new(check));
        self
    }

    fn pattern(&self, source: &str) -> Result<Regex, String> {
        if let Some(re) = self.patterns.get(source) {
            return Ok(re.clone());
        }
        let re = Regex::new(source).map_err(|e| format!("invalid pattern '{}': {}", source, e))?;
        self.patterns.insert(source.to_string(), re.clone());
        Ok(re)
    }

    fn eval(&self, predicate: &Predicate, value: &Value) -> Result<(), String> {
        match predicate {
            Predicate::String => expect(value.is_string(), "must be a string"),
            Predicate::Number => expect(value.is_number(), "must be a number"),
            Predicate::Integer => expect(value.is_i64() || value.is_u64(), "must be an integer"),
            Predicate::Boolean => expect(value.is_boolean(), "must be a boolean"),
            Predicate::Array => expect(value.is_array(), "must be an array"),
            Predicate::Object => expect(value.is_object(), "must be an object"),
            Predicate::MinLength(min) => {
                let len = length(value)?;
                expect(len >= *min, &format!("must have length at least {}", min))
            }
            Predicate::MaxLength(max) => {
                let len = length(value)?;
                expect(len <= *max, &format!("must have length at most {}", max))
            }
            Predicate::Min(min) => {
                let n = value.as_f64().ok_or_else(|| "must be a number".to_string())?;
                expect(n >= *min, &format!("must be at least {}", min))
            }
            Predicate::Max(max) => {
                let n = value.as_f64().ok_or_else(|| "must be a number".to_string())?;
                expect(n <= *max, &format!("must be at most {}", max))
            }
            Predicate::Pattern(source) => {
                let s = value.as_str().ok_or_else(|| "must be a string".to_string())?;
                let re = self.pattern(source)?;
                expect(re.is_match(s), &format!("must match pattern {}", source))
            }
            Predicate::OneOf(allowed) => expect(
                allowed.contains(value),
                &format!("must be one of {}", Value::Array(allowed.clone())),
            ),
            Predicate::All(inner) => inner.iter().try_for_each(|p| self.eval(p, value)),
            Predicate::Any(inner) => {
                if inner.is_empty() {
                    return Ok(());
                }
                let mut reasons = Vec::new();
                for p in inner {
                    match self.eval(p, value) {
                        Ok(()) => return Ok(()),
                        Err(reason) => reasons.push(reason),
                    }
                }
                Err(reasons.join(" or "))
            }
            Predicate::Not(inner) => match self.eval(inner, value) {
                Ok(()) => Err(format!("must not satisfy {:?}", inner)),
                Err(_) => Ok(()),
            },
            Predicate::Custom(name) => match self.checks.get(name) {
                Some(check) => check(value),
                None => Err(format!("unknown check '{}'", name)),
            },
        }
    }
}

fn expect(ok: bool, reason: &str) -> Result<(), String> {
    if ok {
        Ok(())
    } else {
        Err(reason.to_string())
    }
}

fn length(value: &Value) -> Result<usize, String> {
    match value {
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(items) => Ok(items.len()),
        Value::Object(map) => Ok(map.len()),
        _ => Err("must be a string, array, or object".to_string()),
    }
}

impl Validator for RuleValidator {
    fn validate(&self, payload: &Value, rules: &RuleSet) -> ValidationResult {
        let mut result = ValidationResult::ok();

        for rule in &rules.fields {
            let value = lookup(payload, &rule.field).filter(|v| !v.is_null());
            let Some(value) = value else {
                if rule.presence == Presence::Required {
                    result.add(
                        &rule.field,
                        rule.message.clone().unwrap_or_else(|| "is required".to_string()),
                    );
                }
                continue;
            };

            for predicate in &rule.predicates {
                if let Err(reason) = self.eval(predicate, value) {
                    result.add(&rule.field, rule.message.clone().unwrap_or(reason));
                    break;
                }
            }
        }

        if !result.is_ok() {
            tracing::debug!(violations = result.errors.len(), "Validation failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::types::FieldRule;
    use serde_json::json;

    fn article_rules() -> RuleSet {
        RuleSet::new()
            .rule(
                FieldRule::required("title")
                    .check(Predicate::String)
                    .check(Predicate::MinLength(3))
                    .check(Predicate::MaxLength(80)),
            )
            .rule(FieldRule::optional("status").check(Predicate::OneOf(vec![json!("draft"), json!("published")])))
            .rule(FieldRule::optional("meta.slug").check(Predicate::Pattern("^[a-z0-9-]+$".into())))
            .rule(FieldRule::optional("priority").check(Predicate::Integer).check(Predicate::Min(0.0)))
    }

    #[test]
    fn test_valid_payload() {
        let v = RuleValidator::new();
        let payload = json!({"title": "Hello", "status": "draft", "meta": {"slug": "hello-world"}, "priority": 2});
        assert!(v.validate(&payload, &article_rules()).is_ok());
    }

    #[test]
    fn test_reports_each_failing_field() {
        let v = RuleValidator::new();
        let payload = json!({"title": "Hi", "status": "archived", "meta": {"slug": "Bad Slug"}, "priority": -1});
        let errors = v.validate(&payload, &article_rules()).into_errors();
        assert_eq!(errors.len(), 4);
        assert!(errors["title"].contains("at least 3"));
        assert!(errors["status"].contains("one of"));
        assert!(errors["meta.slug"].contains("pattern"));
        assert!(errors["priority"].contains("at least 0"));
    }

    #[test]
    fn test_missing_required_and_null_optional() {
        let v = RuleValidator::new();
        let errors = v.validate(&json!({"status": null}), &article_rules()).into_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["title"], "is required");
    }

    #[test]
    fn test_composed_predicates() {
        let v = RuleValidator::new();
        let rules = RuleSet::new().rule(
            FieldRule::required("id")
                .check(Predicate::Any(vec![Predicate::String, Predicate::Integer]))
                .check(Predicate::Not(Box::new(Predicate::OneOf(vec![json!(0)])))),
        );
        assert!(v.validate(&json!({"id": "abc"}), &rules).is_ok());
        assert!(v.validate(&json!({"id": 7}), &rules).is_ok());
        assert!(!v.validate(&json!({"id": 0}), &rules).is_ok());
        assert!(!v.validate(&json!({"id": true}), &rules).is_ok());
    }

    #[test]
    fn test_custom_check_and_message() {
        let v = RuleValidator::new().with_check("even", |value| match value.as_i64() {
            Some(n) if n % 2 == 0 => Ok(()),
            _ => Err("must be even".to_string()),
        });
        let rules = RuleSet::new()
            .rule(FieldRule::required("n").check(Predicate::Custom("even".into())))
            .rule(
                FieldRule::optional("m")
                    .check(Predicate::Custom("missing".into()))
                    .with_message("m is not allowed"),
            );

        assert!(v.validate(&json!({"n": 4}), &rules).is_ok());

        let errors = v.validate(&json!({"n": 3, "m": 1}), &rules).into_errors();
        assert_eq!(errors["n"], "must be even");
        assert_eq!(errors["m"], "m is not allowed");
    }

    #[test]
    fn test_invalid_pattern_fails_field() {
        let v = RuleValidator::new();
        let rules = RuleSet::new().rule(FieldRule::required("s").check(Predicate::Pattern("(".into())));
        let errors = v.validate(&json!({"s": "x"}), &rules).into_errors();
        assert!(errors["s"].contains("invalid pattern"));
    }

    #[test]
    fn test_root_rule_and_result_validation() {
        let v = RuleValidator::new();
        let rules = RuleSet::new().rule(FieldRule::required("").check(Predicate::Object));
        assert!(v.validate_result(&json!({"id": 1}), &rules).is_ok());
        assert!(!v.validate_result(&json!([1]), &rules).is_ok());
    }
}
