//! Dynamic values exchanged between pipeline nodes.
//!
//! Node outputs are a tagged sum: nothing, a scalar, a small owned tensor, a
//! key-sorted record, or a sequence. The engine stores and forwards these
//! values without interpreting them; only the summary layer and individual
//! node kinds look inside. Records are backed by a `BTreeMap` so any JSON
//! rendering is deterministically key-sorted.

use std::collections::BTreeMap;

use serde_json::json;

use crate::error::{PipelineError, Result};

/// Element type of a [`Tensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    /// 32-bit floats
    F32,
    /// Unsigned bytes (e.g. segmentation masks)
    U8,
}

impl Dtype {
    /// Wire name of the dtype, matching the summary vocabulary.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::F32 => "float32",
            Dtype::U8 => "uint8",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TensorData {
    F32(Vec<f32>),
    U8(Vec<u8>),
}

/// A dense row-major tensor with an explicit shape.
///
/// Pipelines work with rank-3 `(C, Y, X)` tensors, but the container itself
/// only enforces that the element count matches the shape product.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    /// Build an f32 tensor, checking the element count against the shape.
    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        Self::check_len(&shape, data.len())?;
        Ok(Self {
            shape,
            data: TensorData::F32(data),
        })
    }

    /// Build a u8 tensor, checking the element count against the shape.
    pub fn from_u8(shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        Self::check_len(&shape, data.len())?;
        Ok(Self {
            shape,
            data: TensorData::U8(data),
        })
    }

    fn check_len(shape: &[usize], len: usize) -> Result<()> {
        let expected: usize = shape.iter().product();
        if expected != len {
            return Err(PipelineError::NodeFailure(format!(
                "tensor shape {:?} expects {} elements, got {}",
                shape, expected, len
            )));
        }
        Ok(())
    }

    /// Shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type.
    pub fn dtype(&self) -> Dtype {
        match self.data {
            TensorData::F32(_) => Dtype::F32,
            TensorData::U8(_) => Dtype::U8,
        }
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        match &self.data {
            TensorData::F32(v) => v.len(),
            TensorData::U8(v) => v.len(),
        }
    }

    /// True when the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements widened to f32, copying u8 data as needed.
    pub fn to_f32(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F32(v) => v.clone(),
            TensorData::U8(v) => v.iter().map(|&b| b as f32).collect(),
        }
    }

    /// Borrow the f32 payload when the tensor already holds floats.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            TensorData::U8(_) => None,
        }
    }

    /// Borrow the u8 payload when the tensor holds bytes.
    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.data {
            TensorData::U8(v) => Some(v),
            TensorData::F32(_) => None,
        }
    }

    /// Minimum element, 0.0 for an empty tensor.
    pub fn min(&self) -> f64 {
        self.fold(f64::INFINITY, f64::min)
    }

    /// Maximum element, 0.0 for an empty tensor.
    pub fn max(&self) -> f64 {
        self.fold(f64::NEG_INFINITY, f64::max)
    }

    /// Arithmetic mean, 0.0 for an empty tensor.
    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let sum = self.fold_sum();
        sum / self.len() as f64
    }

    fn fold(&self, init: f64, f: fn(f64, f64) -> f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        match &self.data {
            TensorData::F32(v) => v.iter().fold(init, |acc, &x| f(acc, x as f64)),
            TensorData::U8(v) => v.iter().fold(init, |acc, &x| f(acc, x as f64)),
        }
    }

    fn fold_sum(&self) -> f64 {
        match &self.data {
            TensorData::F32(v) => v.iter().map(|&x| x as f64).sum(),
            TensorData::U8(v) => v.iter().map(|&x| x as f64).sum(),
        }
    }
}

/// A dynamic node value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The "no input" sentinel for source nodes
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tensor(Tensor),
    /// Key-sorted mapping
    Record(BTreeMap<String, Value>),
    /// Ordered list, also used to pass multiple predecessor outputs
    Sequence(Vec<Value>),
}

impl Value {
    /// Python-style type name used in summaries and log strings.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tensor(_) => "ndarray",
            Value::Record(_) => "dict",
            Value::Sequence(_) => "list",
        }
    }

    /// Borrow the tensor payload, if any.
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Borrow the record payload, if any.
    pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Render the value as JSON.
    ///
    /// Scalars, records and sequences map to their natural JSON forms
    /// (record keys come out sorted); tensors render as their descriptive
    /// form since raw element dumps are never sent over the wire.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => json!(f),
            Value::Str(s) => json!(s),
            Value::Tensor(t) => json!({
                "type": "ndarray",
                "shape": t.shape(),
                "dtype": t.dtype().as_str(),
                "min": t.min(),
                "max": t.max(),
                "mean": t.mean(),
            }),
            Value::Record(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
            Value::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}
