//! Unit tests for the security gate.

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;

#[fixture]
fn gate() -> SecurityGate {
    SecurityGate::new(
        [
            ("test", "ping"),
            ("database", "execute_immediate"),
            ("legacy", "eval_expr"),
            ("legacy", "open"),
        ],
        GateLimits::default(),
    )
}

fn nested(depth: usize) -> Value {
    (1..depth).fold(json!({}), |inner, _| json!({ "inner": inner }))
}

#[rstest]
fn accepts_whitelisted_request(gate: SecurityGate) {
    let request = gate
        .validate(&json!({"module": "test", "function": "ping", "params": {"x": 1}}))
        .expect("valid request");
    assert_eq!(request.module, "test");
    assert_eq!(request.params, json!({"x": 1}));
    assert_eq!(gate.monitor().validation_failures(), 0);
}

#[rstest]
#[case::absent(json!({"module": "test", "function": "ping"}))]
#[case::null(json!({"module": "test", "function": "ping", "params": null}))]
fn missing_params_default_to_empty_object(gate: SecurityGate, #[case] raw: Value) {
    let request = gate.validate(&raw).expect("valid request");
    assert_eq!(request.params, json!({}));
}

#[rstest]
#[case::no_module(json!({"function": "ping"}), SecurityEventKind::MissingField)]
#[case::numeric_function(json!({"module": "test", "function": 7}), SecurityEventKind::MissingField)]
#[case::empty_module(json!({"module": "", "function": "ping"}), SecurityEventKind::MissingField)]
#[case::not_an_object(json!(["test", "ping"]), SecurityEventKind::MissingField)]
#[case::dotted_module(json!({"module": "os.path", "function": "join"}), SecurityEventKind::InvalidName)]
#[case::spaced_function(json!({"module": "test", "function": "pi ng"}), SecurityEventKind::InvalidName)]
#[case::unknown_pair(json!({"module": "test", "function": "pong"}), SecurityEventKind::NotWhitelisted)]
#[case::denied_substring(json!({"module": "legacy", "function": "eval_expr"}), SecurityEventKind::DeniedFunction)]
#[case::denied_exact(json!({"module": "legacy", "function": "open"}), SecurityEventKind::DeniedFunction)]
fn rejects_bad_names(gate: SecurityGate, #[case] raw: Value, #[case] kind: SecurityEventKind) {
    let error = gate.validate(&raw).expect_err("must reject");
    assert_eq!(error.kind(), kind);
    assert_eq!(gate.monitor().count(kind), 1);
    assert_eq!(gate.monitor().validation_failures(), 1);
}

#[rstest]
fn script_parameter_records_exactly_one_event(gate: SecurityGate) {
    let raw = json!({
        "module": "test",
        "function": "ping",
        "params": {"comment": "<script>alert(1)</script>"}
    });
    let error = gate.validate(&raw).expect_err("must reject");
    assert_eq!(
        error,
        ValidationError::SuspiciousContent {
            kind: SecurityEventKind::Script,
            location: "params.comment".into(),
        }
    );
    let snapshot = gate.monitor().snapshot();
    assert_eq!(snapshot.validation_failures, 1);
    assert_eq!(snapshot.recent.len(), 1);
    assert!(!snapshot.recent[0].detail.contains("alert"));
}

#[rstest]
#[case::too_deep(nested(GateLimits::DEFAULT_MAX_DEPTH + 1))]
#[case::long_array(json!({"rows": vec![0; GateLimits::DEFAULT_MAX_ARRAY_LEN + 1]}))]
#[case::long_string(json!({"blob": "x".repeat(GateLimits::DEFAULT_MAX_STRING_BYTES + 1)}))]
#[case::too_many_params(Value::Object(
    (0..=GateLimits::DEFAULT_MAX_PARAMS).map(|i| (format!("p{i}"), json!(i))).collect()
))]
fn rejects_oversized_params(gate: SecurityGate, #[case] params: Value) {
    let raw = json!({"module": "test", "function": "ping", "params": params});
    let error = gate.validate(&raw).expect_err("must reject");
    assert_eq!(error.kind(), SecurityEventKind::StructureLimit);
}

#[rstest]
fn accepts_params_at_the_depth_limit(gate: SecurityGate) {
    let raw = json!({
        "module": "test",
        "function": "ping",
        "params": nested(GateLimits::DEFAULT_MAX_DEPTH)
    });
    assert!(gate.validate(&raw).is_ok());
}

#[rstest]
fn sql_keys_skip_only_sql_signatures(gate: SecurityGate) {
    let sql = json!({
        "module": "database",
        "function": "execute_immediate",
        "params": {"sql": "DELETE FROM audit; DROP TABLE staging"}
    });
    assert!(gate.validate(&sql).is_ok());

    let injected = json!({
        "module": "database",
        "function": "execute_immediate",
        "params": {"sql": "SELECT 1", "bind_values": ["x' OR '1'='1"]}
    });
    let error = gate.validate(&injected).expect_err("bind value screened");
    assert_eq!(error.kind(), SecurityEventKind::SqlInjection);

    let scripted = json!({
        "module": "database",
        "function": "execute_immediate",
        "params": {"statement": "<script>x</script>"}
    });
    let error = gate.validate(&scripted).expect_err("script still screened");
    assert_eq!(error.kind(), SecurityEventKind::Script);
}

#[rstest]
fn keys_and_array_elements_are_screened(gate: SecurityGate) {
    let raw = json!({
        "module": "test",
        "function": "ping",
        "params": {"files": ["ok.txt", "../../etc/shadow"]}
    });
    let error = gate.validate(&raw).expect_err("must reject");
    assert_eq!(
        error,
        ValidationError::SuspiciousContent {
            kind: SecurityEventKind::PathTraversal,
            location: "params.files[1]".into(),
        }
    );

    let raw = json!({"module": "test", "function": "ping", "params": {"<script>": 1}});
    assert!(gate.validate(&raw).is_err());
}

#[test]
fn custom_sql_keys_replace_defaults() {
    let gate = SecurityGate::new([("database", "prepare")], GateLimits::default())
        .with_sql_keys(["Query"]);
    let raw = json!({
        "module": "database",
        "function": "prepare",
        "params": {"query": "x; DROP TABLE t"}
    });
    assert!(gate.validate(&raw).is_ok());

    let raw = json!({
        "module": "database",
        "function": "prepare",
        "params": {"sql": "x; DROP TABLE t"}
    });
    assert!(gate.validate(&raw).is_err());
}
