//! Observation snapshots and tolerance-based diffing
//!
//! A snapshot is a flat mapping of field path to scalar value taken
//! from an HMI/status endpoint at one point in time. Nested JSON
//! objects are flattened with `.`-joined key paths, so
//! `{"tank": {"level": 4}}` yields the field `tank.level`. Two
//! snapshots are comparable only when fetched from the same endpoint.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Scalar value of one observed field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Does this value differ from `other` under the given numeric
    /// tolerance? Strings and booleans compare exactly; differently
    /// typed values always differ.
    ///
    /// NaN marks a number the lossy JSON conversion could not
    /// represent; a pair with exactly one NaN side always differs,
    /// since `(a - b).abs()` would otherwise swallow the change.
    pub fn differs(&self, other: &FieldValue, tolerance: f64) -> bool {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => {
                if a.is_nan() || b.is_nan() {
                    a.is_nan() != b.is_nan()
                } else {
                    (a - b).abs() > tolerance
                }
            }
            (a, b) => a != b,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One field whose value changed between two snapshots
#[derive(Debug, Clone, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub baseline: FieldValue,
    pub after: FieldValue,
}

/// A point-in-time observation of the target's externally visible state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObservationSnapshot {
    fields: BTreeMap<String, FieldValue>,
}

impl ObservationSnapshot {
    /// Flatten a parsed JSON document into a snapshot.
    ///
    /// Returns `None` when the document root is not an object.
    pub fn from_json(doc: &serde_json::Value) -> Option<Self> {
        let obj = doc.as_object()?;
        let mut fields = BTreeMap::new();
        for (key, value) in obj {
            flatten_into(&mut fields, key.clone(), value);
        }
        Some(Self { fields })
    }

    /// Look up one field by its flattened path
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Number of observed fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over field paths and values in path order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Field-by-field diff against a later snapshot.
    ///
    /// Only fields present in both snapshots are compared; each
    /// differing field yields one `FieldChange`. Numbers compare
    /// within `tolerance`, everything else exactly.
    pub fn diff(&self, after: &ObservationSnapshot, tolerance: f64) -> Vec<FieldChange> {
        self.fields
            .iter()
            .filter_map(|(field, baseline)| {
                let after_value = after.fields.get(field)?;
                baseline
                    .differs(after_value, tolerance)
                    .then(|| FieldChange {
                        field: field.clone(),
                        baseline: baseline.clone(),
                        after: after_value.clone(),
                    })
            })
            .collect()
    }
}

fn flatten_into(fields: &mut BTreeMap<String, FieldValue>, path: String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => {
            fields.insert(path, FieldValue::Null);
        }
        serde_json::Value::Bool(b) => {
            fields.insert(path, FieldValue::Bool(*b));
        }
        serde_json::Value::Number(n) => {
            // Integers outside f64's exact range are rare in HMI feeds;
            // lossy conversion keeps the comparison model uniform.
            fields.insert(path, FieldValue::Number(n.as_f64().unwrap_or(f64::NAN)));
        }
        serde_json::Value::String(s) => {
            fields.insert(path, FieldValue::Text(s.clone()));
        }
        serde_json::Value::Object(obj) => {
            for (key, nested) in obj {
                flatten_into(fields, format!("{path}.{key}"), nested);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                flatten_into(fields, format!("{path}.{index}"), nested);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_flat_object() {
        let snap = ObservationSnapshot::from_json(&json!({
            "alarm": false,
            "pressure": 4.2,
            "mode": "auto"
        }))
        .unwrap();

        assert_eq!(snap.len(), 3);
        assert_eq!(snap.get("alarm"), Some(&FieldValue::Bool(false)));
        assert_eq!(snap.get("pressure"), Some(&FieldValue::Number(4.2)));
        assert_eq!(snap.get("mode"), Some(&FieldValue::Text("auto".into())));
    }

    #[test]
    fn test_flatten_nested_object_joins_paths() {
        let snap = ObservationSnapshot::from_json(&json!({
            "tank": { "level": 10, "pumps": [true, false] }
        }))
        .unwrap();

        assert_eq!(snap.get("tank.level"), Some(&FieldValue::Number(10.0)));
        assert_eq!(snap.get("tank.pumps.0"), Some(&FieldValue::Bool(true)));
        assert_eq!(snap.get("tank.pumps.1"), Some(&FieldValue::Bool(false)));
    }

    #[test]
    fn test_non_object_root_rejected() {
        assert!(ObservationSnapshot::from_json(&json!([1, 2, 3])).is_none());
        assert!(ObservationSnapshot::from_json(&json!(42)).is_none());
    }

    #[test]
    fn test_diff_detects_flipped_bool() {
        let baseline = ObservationSnapshot::from_json(&json!({"alarm": false, "mode": "auto"}))
            .unwrap();
        let after = ObservationSnapshot::from_json(&json!({"alarm": true, "mode": "auto"}))
            .unwrap();

        let changes = baseline.diff(&after, 0.0);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "alarm");
        assert_eq!(changes[0].baseline, FieldValue::Bool(false));
        assert_eq!(changes[0].after, FieldValue::Bool(true));
    }

    #[test]
    fn test_diff_ignores_fields_missing_from_either_side() {
        let baseline = ObservationSnapshot::from_json(&json!({"a": 1, "b": 2})).unwrap();
        let after = ObservationSnapshot::from_json(&json!({"b": 2, "c": 3})).unwrap();
        assert!(baseline.diff(&after, 0.0).is_empty());
    }

    #[test]
    fn test_diff_numeric_tolerance() {
        let baseline = ObservationSnapshot::from_json(&json!({"temp": 20.0})).unwrap();
        let after = ObservationSnapshot::from_json(&json!({"temp": 20.4})).unwrap();

        assert_eq!(baseline.diff(&after, 0.5).len(), 0);
        assert_eq!(baseline.diff(&after, 0.0).len(), 1);
    }

    #[test]
    fn test_diff_nan_against_number_differs() {
        let nan = FieldValue::Number(f64::NAN);
        let num = FieldValue::Number(7.0);

        assert!(nan.differs(&num, 0.0));
        assert!(num.differs(&nan, f64::MAX));
        // two unrepresentable values cannot be told apart
        assert!(!nan.differs(&FieldValue::Number(f64::NAN), 0.0));
    }

    #[test]
    fn test_diff_type_change_always_differs() {
        let baseline = ObservationSnapshot::from_json(&json!({"state": 1})).unwrap();
        let after = ObservationSnapshot::from_json(&json!({"state": "fault"})).unwrap();
        assert_eq!(baseline.diff(&after, 1000.0).len(), 1);
    }
}
