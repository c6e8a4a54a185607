//! Integration tests for eipua-common library.

use eipua_common::{TypedValue, Value, ValueKind, coerce, parse_config};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct Snapshot {
    values: HashMap<String, Value>,
}

#[test]
fn test_untagged_values_from_json5() {
    let snapshot: Snapshot = parse_config(
        r#"{
            values: {
                conductivity_ch1: 12.5,
                status_ch1: "okay",
                watchdog: true,
            }
        }"#,
    )
    .expect("parse failed");

    assert_eq!(snapshot.values["conductivity_ch1"], Value::Float(12.5));
    assert_eq!(snapshot.values["status_ch1"], Value::from("okay"));
    assert_eq!(snapshot.values["watchdog"], Value::Bool(true));
}

#[test]
fn test_typical_bridge_writes() {
    // What the M800 address space declares for each kind of node
    let declared: HashMap<&str, ValueKind> = [
        ("conductivity_ch1", ValueKind::Float),
        ("status_ch1", ValueKind::String),
        ("watchdog", ValueKind::Boolean),
    ]
    .into_iter()
    .collect();

    assert_eq!(
        coerce(declared.get("conductivity_ch1"), &Value::Float(12.5)),
        TypedValue::Float(12.5)
    );
    assert_eq!(
        coerce(
            declared.get("status_ch1"),
            &Value::from("Calibration Data Warning")
        ),
        TypedValue::String("Calibration Data Warning".to_string())
    );
    assert_eq!(
        coerce(declared.get("watchdog"), &Value::Bool(false)),
        TypedValue::Boolean(false)
    );
    assert_eq!(
        coerce(declared.get("unbound"), &Value::Float(1.0)),
        TypedValue::Double(1.0)
    );
}
