//! # Filter Evaluation
//!
//! Re-runs a stored filter definition as an existence check scoped to one
//! record: "does record `id` match this filter right now".
//!
//! Filter objects map field names to conditions:
//!
//! - scalar: equality
//! - array: membership (`IN`)
//! - object: operators, all of which must hold
//!   (`eq`, `neq`, `gt`, `gte`, `lt`, `lte`, `in`)
//!
//! Unknown operators are errors so callers can log and skip the filter.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::{Map, Value};

use super::errors::{BroadcastError, BroadcastResult};
use crate::protocol::ModelId;

/// Scoped existence check against current data
pub trait FilterEvaluator: Send + Sync {
    /// Whether record `model_id` of `resource_type` currently matches `filter`
    fn matches(&self, resource_type: &str, filter: &Map<String, Value>, model_id: &ModelId) -> BroadcastResult<bool>;
}

/// Filter operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl FilterOp {
    pub fn from_name(name: &str) -> BroadcastResult<Self> {
        match name {
            "eq" => Ok(FilterOp::Eq),
            "neq" => Ok(FilterOp::Neq),
            "gt" => Ok(FilterOp::Gt),
            "gte" => Ok(FilterOp::Gte),
            "lt" => Ok(FilterOp::Lt),
            "lte" => Ok(FilterOp::Lte),
            "in" => Ok(FilterOp::In),
            other => Err(BroadcastError::UnknownOperator(other.to_string())),
        }
    }

    /// Apply to a field value. A missing field never matches.
    pub fn apply(&self, field: Option<&Value>, operand: &Value) -> bool {
        let Some(field) = field else {
            return false;
        };
        match self {
            FilterOp::Eq => field == operand,
            FilterOp::Neq => field != operand,
            FilterOp::Gt => compare(field, operand).map(|o| o.is_gt()).unwrap_or(false),
            FilterOp::Gte => compare(field, operand).map(|o| o.is_ge()).unwrap_or(false),
            FilterOp::Lt => compare(field, operand).map(|o| o.is_lt()).unwrap_or(false),
            FilterOp::Lte => compare(field, operand).map(|o| o.is_le()).unwrap_or(false),
            FilterOp::In => operand.as_array().map(|values| values.contains(field)).unwrap_or(false),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// Evaluate a filter object against one record
pub fn evaluate(filter: &Map<String, Value>, record: &Map<String, Value>) -> BroadcastResult<bool> {
    for (field, condition) in filter {
        let value = record.get(field);
        let holds = match condition {
            Value::Array(_) => FilterOp::In.apply(value, condition),
            Value::Object(ops) => {
                let mut all = true;
                for (name, operand) in ops {
                    // Validate every operator even after a miss
                    let op = FilterOp::from_name(name)?;
                    all &= op.apply(value, operand);
                }
                all
            }
            scalar => FilterOp::Eq.apply(value, scalar),
        };
        if !holds {
            // Remaining conditions may still carry unknown operators
            validate(filter)?;
            return Ok(false);
        }
    }
    Ok(true)
}

fn validate(filter: &Map<String, Value>) -> BroadcastResult<()> {
    for condition in filter.values() {
        if let Value::Object(ops) = condition {
            for name in ops.keys() {
                FilterOp::from_name(name)?;
            }
        }
    }
    Ok(())
}

/// In-memory records of each resource type, evaluated directly
#[derive(Debug, Default)]
pub struct RecordSetEvaluator {
    records: RwLock<HashMap<(String, ModelId), Map<String, Value>>>,
}

impl RecordSetEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace a record. Its `id` field identifies it.
    pub fn put_record(&self, resource_type: &str, record: Value) -> BroadcastResult<ModelId> {
        let Value::Object(map) = record else {
            return Err(BroadcastError::InvalidRecord("record must be an object".into()));
        };
        let id = map
            .get("id")
            .and_then(ModelId::from_value)
            .ok_or_else(|| BroadcastError::InvalidRecord("record has no id".into()))?;

        let mut records = self
            .records
            .write()
            .map_err(|_| BroadcastError::Internal("Lock poisoned".into()))?;
        records.insert((resource_type.to_string(), id.clone()), map);
        Ok(id)
    }

    pub fn remove_record(&self, resource_type: &str, model_id: &ModelId) -> bool {
        self.records
            .write()
            .map(|mut records| records.remove(&(resource_type.to_string(), model_id.clone())).is_some())
            .unwrap_or(false)
    }
}

impl FilterEvaluator for RecordSetEvaluator {
    fn matches(&self, resource_type: &str, filter: &Map<String, Value>, model_id: &ModelId) -> BroadcastResult<bool> {
        let records = self
            .records
            .read()
            .map_err(|_| BroadcastError::Internal("Lock poisoned".into()))?;
        match records.get(&(resource_type.to_string(), model_id.clone())) {
            Some(record) => evaluate(filter, record),
            None => {
                validate(filter)?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_equality_and_membership() {
        let record = object(json!({"id": 1, "status": "open", "team": 4}));

        assert!(evaluate(&object(json!({"status": "open"})), &record).unwrap());
        assert!(!evaluate(&object(json!({"status": "closed"})), &record).unwrap());
        assert!(evaluate(&object(json!({"id": [1, 2, 3]})), &record).unwrap());
        assert!(!evaluate(&object(json!({"id": [2, 3]})), &record).unwrap());
    }

    #[test]
    fn test_operator_objects() {
        let record = object(json!({"id": 1, "priority": 5, "title": "m"}));

        assert!(evaluate(&object(json!({"priority": {"gt": 3}})), &record).unwrap());
        assert!(evaluate(&object(json!({"priority": {"gte": 5, "lt": 10}})), &record).unwrap());
        assert!(!evaluate(&object(json!({"priority": {"lte": 4}})), &record).unwrap());
        assert!(evaluate(&object(json!({"title": {"gt": "a", "neq": "z"}})), &record).unwrap());
    }

    #[test]
    fn test_missing_field_never_matches() {
        let record = object(json!({"id": 1}));
        assert!(!evaluate(&object(json!({"status": {"neq": "open"}})), &record).unwrap());
    }

    #[test]
    fn test_unknown_operator_fails() {
        let record = object(json!({"id": 1, "status": "open"}));

        let result = evaluate(&object(json!({"status": {"near": "open"}})), &record);
        assert!(matches!(result, Err(BroadcastError::UnknownOperator(_))));

        // Short-circuited conditions are still validated
        let result = evaluate(&object(json!({"a_missing": 1, "status": {"near": "x"}})), &record);
        assert!(matches!(result, Err(BroadcastError::UnknownOperator(_))));
    }

    #[test]
    fn test_record_set_evaluator() {
        let evaluator = RecordSetEvaluator::new();
        let id = evaluator.put_record("Post", json!({"id": 9, "status": "open"})).unwrap();
        assert_eq!(id, ModelId::Int(9));

        let open = object(json!({"status": "open"}));
        assert!(evaluator.matches("Post", &open, &ModelId::Int(9)).unwrap());
        assert!(!evaluator.matches("Post", &open, &ModelId::Int(10)).unwrap());
        assert!(!evaluator.matches("Comment", &open, &ModelId::Int(9)).unwrap());

        assert!(evaluator.remove_record("Post", &ModelId::Int(9)));
        assert!(!evaluator.matches("Post", &open, &ModelId::Int(9)).unwrap());
    }

    #[test]
    fn test_put_record_requires_id() {
        let evaluator = RecordSetEvaluator::new();
        assert!(matches!(
            evaluator.put_record("Post", json!({"status": "open"})),
            Err(BroadcastError::InvalidRecord(_))
        ));
        assert!(evaluator.put_record("Post", json!([1])).is_err());
    }
}
