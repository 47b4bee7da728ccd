//! Config-driven wiring, exercised end to end.

use std::sync::Arc;

use serde_json::{json, Value};

use bastion::types::{AuditStatus, Operation, SecurityContext};
use bastion::{build_executor, build_executor_with_state, BastionConfig, ErrorKind, JsonlAuditStore, VersionedStore};

const CATALOG: &str = r#"
operations:
  - operation_type: ledger.transfer
    required_capabilities: [ledger.write]
    input_rules:
      fields:
        - field: amount
          presence: required
          predicates:
            - integer
    result_rules:
      fields:
        - field: balance
          presence: required
          predicates:
            - integer
  - operation_type: ledger.balance
    mutating: false
"#;

fn config_in(dir: &std::path::Path) -> BastionConfig {
    let catalog = dir.join("catalog.yaml");
    std::fs::write(&catalog, CATALOG).unwrap();

    let mut config = BastionConfig::default();
    config.executor.catalog_path = Some(catalog.to_string_lossy().into_owned());
    config.audit.log_path = Some(dir.join("audit.jsonl").to_string_lossy().into_owned());
    config
}

fn teller() -> SecurityContext {
    SecurityContext::new("teller").with_capability("ledger.write")
}

#[tokio::test]
async fn test_transfer_commits_and_chains_audit() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let bastion = build_executor(&config).await.unwrap();

    let state = bastion.state.clone();
    let outcome = bastion
        .executor
        .execute(
            Operation::new("ledger.transfer", json!({ "amount": 40 })),
            Some(&teller()),
            move |payload: Value| async move {
                let amount = payload["amount"].as_i64().unwrap_or_default();
                state.put("balance", json!(100 - amount)).await;
                Ok(json!({ "balance": 100 - amount }))
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.value["balance"], 60);
    assert_eq!(bastion.state.get("balance").await, Some(json!(60)));

    let state = bastion.state.clone();
    let err = bastion
        .executor
        .execute(
            Operation::new("ledger.transfer", json!({ "amount": 500 })),
            Some(&teller()),
            move |_| async move {
                state.put("balance", json!(-400)).await;
                Err::<Value, _>(bastion::Error::integrity("overdraft"))
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(bastion.state.get("balance").await, Some(json!(60)));

    let log = JsonlAuditStore::open(dir.path().join("audit.jsonl")).await.unwrap();
    assert_eq!(log.verify_chain().await.unwrap(), 2);
    let records = log.records().await.unwrap();
    assert_eq!(records[0].status, AuditStatus::Success);
    assert_eq!(records[1].status, AuditStatus::Failure);
    assert!(records[1].context.escalated);
}

#[tokio::test]
async fn test_audit_log_survives_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let state = Arc::new(VersionedStore::new());

    for _ in 0..2 {
        let bastion = build_executor_with_state(&config, state.clone()).await.unwrap();
        bastion
            .executor
            .execute(Operation::new("ledger.balance", json!({})), Some(&teller()), |_| async {
                Ok(json!(0))
            })
            .await
            .unwrap();
    }

    let log = JsonlAuditStore::open(dir.path().join("audit.jsonl")).await.unwrap();
    assert_eq!(log.verify_chain().await.unwrap(), 2);
}

#[tokio::test]
async fn test_unknown_operation_type_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bastion = build_executor(&config_in(dir.path())).await.unwrap();

    let err = bastion
        .executor
        .execute(Operation::new("ledger.close", json!({})), Some(&teller()), |_| async {
            Ok(json!(null))
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_missing_catalog_is_an_error() {
    let mut config = BastionConfig::default();
    config.executor.catalog_path = Some("/nonexistent/catalog.yaml".to_string());
    assert!(build_executor(&config).await.is_err());
}

#[test]
fn test_config_loads_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("default.yaml"),
        "rate_limit:\n  window_secs: 30\n  default_max: 5\nexecutor:\n  require_registered_types: false\n",
    )
    .unwrap();

    let config = BastionConfig::load_from(dir.path()).unwrap();
    assert_eq!(config.rate_limit.window_secs, 30);
    assert_eq!(config.rate_limit.default_max, Some(5));
    assert!(!config.executor.require_registered_types);
    assert_eq!(config.escalation.failure_window_secs, 300);
}
