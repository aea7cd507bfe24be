//! JSON snapshots of execution results.
//!
//! The summary vocabulary is what clients see in terminal frames and output
//! retrieval: a strategy label, the execution order, the sources, and a
//! described value per sink.

use serde_json::{json, Value as Json};

use crate::engine::ExecutionReport;
use crate::value::Value;

/// Describe a node value without dumping its raw contents.
pub fn describe_value(value: &Value) -> Json {
    match value {
        Value::None => json!({"type": "none"}),
        Value::Bool(b) => json!({"type": "bool", "value": b}),
        Value::Int(i) => json!({"type": "int", "value": i}),
        Value::Float(f) => json!({"type": "float", "value": f}),
        Value::Str(s) => json!({"type": "str", "value": s}),
        Value::Record(map) => json!({
            "type": "dict",
            "keys": map.keys().collect::<Vec<_>>(),
            "size": map.len(),
        }),
        Value::Sequence(items) => json!({"type": "list", "length": items.len()}),
        Value::Tensor(t) => json!({
            "type": "ndarray",
            "shape": t.shape(),
            "dtype": t.dtype().as_str(),
            "min": t.min(),
            "max": t.max(),
            "mean": t.mean(),
        }),
    }
}

/// Produce the JSON-friendly snapshot of a finished execution.
pub fn summarize_execution(report: &ExecutionReport) -> Json {
    let mut sinks = serde_json::Map::new();
    for sink in &report.sinks {
        if let Some(value) = report.outputs.get(sink) {
            sinks.insert(sink.clone(), describe_value(value));
        }
    }
    json!({
        "strategy": report.strategy_label(),
        "order": report.order,
        "sources": report.sources,
        "sinks": sinks,
    })
}

/// Encode a summary for storage in an execution row.
pub fn encode_summary(summary: &Json) -> String {
    summary.to_string()
}

/// Decode a stored summary; malformed text is preserved under `raw`.
pub fn decode_summary(payload: Option<&str>) -> Json {
    match payload {
        None | Some("") => json!({}),
        Some(text) => serde_json::from_str(text).unwrap_or_else(|_| json!({"raw": text})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Tensor;
    use std::collections::BTreeMap;

    #[test]
    fn test_describe_scalars() {
        assert_eq!(describe_value(&Value::None), json!({"type": "none"}));
        assert_eq!(
            describe_value(&Value::Int(4)),
            json!({"type": "int", "value": 4})
        );
        assert_eq!(
            describe_value(&Value::Str("ok".to_string())),
            json!({"type": "str", "value": "ok"})
        );
    }

    #[test]
    fn test_describe_containers() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        let described = describe_value(&Value::Record(map));
        assert_eq!(described["type"], "dict");
        assert_eq!(described["size"], 1);

        let described = describe_value(&Value::Sequence(vec![Value::None, Value::None]));
        assert_eq!(described, json!({"type": "list", "length": 2}));
    }

    #[test]
    fn test_describe_tensor() {
        let t = Tensor::from_u8(vec![1, 1, 2], vec![0, 1]).unwrap();
        let described = describe_value(&Value::Tensor(t));
        assert_eq!(described["type"], "ndarray");
        assert_eq!(described["dtype"], "uint8");
        assert_eq!(described["shape"], json!([1, 1, 2]));
    }

    #[test]
    fn test_decode_summary_roundtrip_and_fallback() {
        let summary = json!({"sinks": {"log": {"type": "str"}}});
        let encoded = encode_summary(&summary);
        assert_eq!(decode_summary(Some(&encoded)), summary);
        assert_eq!(decode_summary(None), json!({}));
        assert_eq!(decode_summary(Some("{broken")), json!({"raw": "{broken"}));
    }
}
