//! Built-in node kinds.
//!
//! Each kind is a pure function over the assembled input value and the
//! node's parameter map. Deterministic inputs always produce identical
//! outputs, which is what lets the two ordering strategies be compared at
//! the sinks.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Map;

use crate::error::{PipelineError, Result};
use crate::registry::{NodeKind, NodeRegistry};
use crate::value::{Dtype, Tensor, Value};

/// Register every built-in kind on the given registry.
pub fn register_builtins(registry: &mut NodeRegistry) {
    registry.register(NodeKind::new("identity", 1, Some(1), Arc::new(identity)));
    registry.register(NodeKind::new("dataset", 0, Some(0), Arc::new(dataset)));
    registry.register(NodeKind::new("concat", 2, None, Arc::new(concat)));
    registry.register(NodeKind::new(
        "segmentation",
        1,
        Some(1),
        Arc::new(segmentation),
    ));
    registry.register(NodeKind::new("filter", 1, Some(1), Arc::new(filter)));
    registry.register(NodeKind::new(
        "structural-descriptor",
        1,
        Some(1),
        Arc::new(structural_descriptor),
    ));
    registry.register(NodeKind::new("simulation", 1, Some(1), Arc::new(simulation)));
    registry.register(NodeKind::new("figure", 1, Some(1), Arc::new(figure)));
    registry.register(NodeKind::new("text", 1, None, Arc::new(text)));
}

fn identity(input: &Value, _params: &Map<String, serde_json::Value>) -> Result<Value> {
    Ok(input.clone())
}

fn dataset(_input: &Value, params: &Map<String, serde_json::Value>) -> Result<Value> {
    let shape = shape_param(params, "shape", &[6, 64, 64])?;
    let seed = u64_param(params, "seed", 0)?;
    let count: usize = shape.iter().product();
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<f32> = (0..count).map(|_| rng.gen::<f32>()).collect();
    Tensor::from_f32(shape, data).map(Value::Tensor)
}

fn concat(input: &Value, _params: &Map<String, serde_json::Value>) -> Result<Value> {
    let items = match input {
        Value::Sequence(items) => items,
        _ => {
            return Err(PipelineError::NodeFailure(
                "concat requires multiple tensor inputs".to_string(),
            ))
        }
    };
    let mut tensors = Vec::with_capacity(items.len());
    for item in items {
        let tensor = item.as_tensor().ok_or_else(|| {
            PipelineError::NodeFailure(format!(
                "concat expects tensor inputs, got {}",
                item.type_name()
            ))
        })?;
        if tensor.shape().len() != 3 {
            return Err(PipelineError::NodeFailure(format!(
                "concat expects rank-3 tensors, got shape {:?}",
                tensor.shape()
            )));
        }
        tensors.push(tensor);
    }
    if tensors.len() < 2 {
        return Err(PipelineError::NodeFailure(
            "concat requires at least two inputs".to_string(),
        ));
    }
    let (rows, cols) = (tensors[0].shape()[1], tensors[0].shape()[2]);
    for tensor in &tensors {
        if tensor.shape()[1] != rows || tensor.shape()[2] != cols {
            return Err(PipelineError::NodeFailure(format!(
                "concat requires matching (Y, X) dimensions: ({}, {}) vs ({}, {})",
                rows,
                cols,
                tensor.shape()[1],
                tensor.shape()[2]
            )));
        }
    }
    let channels: usize = tensors.iter().map(|t| t.shape()[0]).sum();
    let shape = vec![channels, rows, cols];
    if tensors.iter().all(|t| t.dtype() == Dtype::U8) {
        let mut data = Vec::with_capacity(channels * rows * cols);
        for tensor in &tensors {
            data.extend_from_slice(tensor.as_u8().unwrap_or(&[]));
        }
        Tensor::from_u8(shape, data).map(Value::Tensor)
    } else {
        let mut data = Vec::with_capacity(channels * rows * cols);
        for tensor in &tensors {
            data.extend(tensor.to_f32());
        }
        Tensor::from_f32(shape, data).map(Value::Tensor)
    }
}

fn segmentation(input: &Value, params: &Map<String, serde_json::Value>) -> Result<Value> {
    let tensor = tensor_input(input, "segmentation")?;
    let threshold = f64_param(params, "threshold", 0.5)?;
    let data: Vec<u8> = tensor
        .to_f32()
        .iter()
        .map(|&v| u8::from(v as f64 > threshold))
        .collect();
    Tensor::from_u8(tensor.shape().to_vec(), data).map(Value::Tensor)
}

fn filter(input: &Value, params: &Map<String, serde_json::Value>) -> Result<Value> {
    let tensor = tensor_input(input, "filter")?;
    if tensor.shape().len() != 3 {
        return Err(PipelineError::NodeFailure(format!(
            "filter expects a (C, Y, X) tensor, got shape {:?}",
            tensor.shape()
        )));
    }
    let kernel = u64_param(params, "kernelSize", 3)?;
    if kernel == 0 || kernel % 2 == 0 {
        return Err(PipelineError::NodeFailure(format!(
            "kernelSize must be a positive odd integer, got {}",
            kernel
        )));
    }
    let (channels, rows, cols) = (tensor.shape()[0], tensor.shape()[1], tensor.shape()[2]);
    let src = tensor.to_f32();
    let mut out = vec![0.0f32; src.len()];
    let radius = (kernel / 2) as isize;
    let window = (kernel * kernel) as f64;
    for c in 0..channels {
        let base = c * rows * cols;
        for y in 0..rows {
            for x in 0..cols {
                let mut acc = 0.0f64;
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let sy = (y as isize + dy).clamp(0, rows as isize - 1) as usize;
                        let sx = (x as isize + dx).clamp(0, cols as isize - 1) as usize;
                        acc += src[base + sy * cols + sx] as f64;
                    }
                }
                out[base + y * cols + x] = (acc / window) as f32;
            }
        }
    }
    Tensor::from_f32(tensor.shape().to_vec(), out).map(Value::Tensor)
}

fn structural_descriptor(input: &Value, _params: &Map<String, serde_json::Value>) -> Result<Value> {
    let tensor = tensor_input(input, "structural-descriptor")?;
    if tensor.shape().len() != 3 {
        return Err(PipelineError::NodeFailure(format!(
            "structural-descriptor expects a (C, Y, X) tensor, got shape {:?}",
            tensor.shape()
        )));
    }
    let (channels, rows, cols) = (tensor.shape()[0], tensor.shape()[1], tensor.shape()[2]);
    let plane = rows * cols;
    let src = tensor.to_f32();
    let mut means = Vec::with_capacity(channels);
    let mut stds = Vec::with_capacity(channels);
    let mut maxima = Vec::with_capacity(channels);
    let mut minima = Vec::with_capacity(channels);
    for c in 0..channels {
        let slice = &src[c * plane..(c + 1) * plane];
        let mean = if slice.is_empty() {
            0.0
        } else {
            slice.iter().map(|&v| v as f64).sum::<f64>() / slice.len() as f64
        };
        let variance = if slice.is_empty() {
            0.0
        } else {
            slice
                .iter()
                .map(|&v| {
                    let d = v as f64 - mean;
                    d * d
                })
                .sum::<f64>()
                / slice.len() as f64
        };
        let max = slice.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v as f64));
        let min = slice.iter().fold(f64::INFINITY, |m, &v| m.min(v as f64));
        means.push(Value::Float(mean));
        stds.push(Value::Float(variance.sqrt()));
        maxima.push(Value::Float(if slice.is_empty() { 0.0 } else { max }));
        minima.push(Value::Float(if slice.is_empty() { 0.0 } else { min }));
    }
    let mut stats = BTreeMap::new();
    stats.insert("mean".to_string(), Value::Sequence(means));
    stats.insert("std".to_string(), Value::Sequence(stds));
    stats.insert("max".to_string(), Value::Sequence(maxima));
    stats.insert("min".to_string(), Value::Sequence(minima));
    let mut record = BTreeMap::new();
    record.insert(
        "shape".to_string(),
        Value::Sequence(tensor.shape().iter().map(|&d| Value::Int(d as i64)).collect()),
    );
    record.insert("channel_stats".to_string(), Value::Record(stats));
    Ok(Value::Record(record))
}

fn simulation(input: &Value, params: &Map<String, serde_json::Value>) -> Result<Value> {
    let tensor = tensor_input(input, "simulation")?;
    let steps = i64_param(params, "steps", 32)?.clamp(1, 256);
    let amplitude = tensor.mean();
    let series: Vec<Value> = (0..steps)
        .map(|i| Value::Float(amplitude * (1.0 + (TAU * i as f64 / steps as f64).sin())))
        .collect();
    let energy: f64 = tensor.to_f32().iter().map(|&v| (v as f64) * (v as f64)).sum();
    let mut record = BTreeMap::new();
    record.insert("steps".to_string(), Value::Int(steps));
    record.insert("series".to_string(), Value::Sequence(series));
    record.insert("energy".to_string(), Value::Float(energy));
    Ok(Value::Record(record))
}

fn figure(input: &Value, params: &Map<String, serde_json::Value>) -> Result<Value> {
    let data = input.as_record().ok_or_else(|| {
        PipelineError::NodeFailure(format!(
            "figure expects a record input, got {}",
            input.type_name()
        ))
    })?;
    let title = str_param(params, "title", "Figure")?;
    let subtitle = str_param(params, "subtitle", "pipeline output")?;
    let mut record = BTreeMap::new();
    record.insert("title".to_string(), Value::Str(title));
    record.insert("subtitle".to_string(), Value::Str(subtitle));
    record.insert("data".to_string(), Value::Record(data.clone()));
    Ok(Value::Record(record))
}

fn text(input: &Value, params: &Map<String, serde_json::Value>) -> Result<Value> {
    let prefix = str_param(params, "prefix", "LOG")?;
    let parts: Vec<String> = match input {
        Value::Sequence(items) => items.iter().map(render_text).collect::<Result<_>>()?,
        other => vec![render_text(other)?],
    };
    Ok(Value::Str(format!("{}: {}", prefix, parts.join(" | "))))
}

fn render_text(value: &Value) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => serde_json::to_string(&other.to_json())
            .map_err(|e| PipelineError::NodeFailure(format!("unserialisable input: {e}"))),
    }
}

fn tensor_input<'v>(input: &'v Value, kind: &str) -> Result<&'v Tensor> {
    input.as_tensor().ok_or_else(|| {
        PipelineError::NodeFailure(format!(
            "{} expects a tensor input, got {}",
            kind,
            input.type_name()
        ))
    })
}

fn u64_param(params: &Map<String, serde_json::Value>, key: &str, default: u64) -> Result<u64> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value.as_u64().ok_or_else(|| {
            PipelineError::NodeFailure(format!("parameter '{key}' must be a non-negative integer"))
        }),
    }
}

fn i64_param(params: &Map<String, serde_json::Value>, key: &str, default: i64) -> Result<i64> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value.as_i64().ok_or_else(|| {
            PipelineError::NodeFailure(format!("parameter '{key}' must be an integer"))
        }),
    }
}

fn f64_param(params: &Map<String, serde_json::Value>, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| {
            PipelineError::NodeFailure(format!("parameter '{key}' must be a number"))
        }),
    }
}

fn str_param(params: &Map<String, serde_json::Value>, key: &str, default: &str) -> Result<String> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default.to_string()),
        Some(value) => value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::NodeFailure(format!("parameter '{key}' must be a string"))),
    }
}

fn shape_param(
    params: &Map<String, serde_json::Value>,
    key: &str,
    default: &[usize],
) -> Result<Vec<usize>> {
    let raw = match params.get(key) {
        None | Some(serde_json::Value::Null) => return Ok(default.to_vec()),
        Some(value) => value,
    };
    let items = raw.as_array().ok_or_else(|| {
        PipelineError::NodeFailure(format!("parameter '{key}' must be an array of dimensions"))
    })?;
    if items.len() != 3 {
        return Err(PipelineError::NodeFailure(format!(
            "parameter '{key}' must have exactly 3 dimensions, got {}",
            items.len()
        )));
    }
    let mut shape = Vec::with_capacity(items.len());
    for item in items {
        let dim = item.as_u64().filter(|&d| d > 0).ok_or_else(|| {
            PipelineError::NodeFailure(format!("parameter '{key}' dimensions must be positive integers"))
        })?;
        shape.push(dim as usize);
    }
    Ok(shape)
}
