//! Model parameters exchanged between coordinator and clients
//!
//! Parameters are an ordered list of dense `f32` tensors. They are never
//! mutated after construction; aggregation always builds a new value.
//!
//! # Byte layout
//!
//! [`Parameters::encode`] writes a self-describing little-endian blob:
//!
//! ```text
//! u32                 tensor count
//! per tensor:
//!   u32               rank
//!   u64 * rank        dimensions
//!   f32 * product     values, row-major
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A dense tensor: shape plus flat row-major values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorParts")]
pub struct Tensor {
    shape: Vec<usize>,
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct TensorParts {
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl TryFrom<TensorParts> for Tensor {
    type Error = Error;

    fn try_from(parts: TensorParts) -> Result<Self> {
        Tensor::new(parts.shape, parts.values)
    }
}

impl Tensor {
    /// Create a tensor, checking that the shape matches the value count
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected = element_count(&shape)?;
        if expected != values.len() {
            return Err(Error::InvalidParameters {
                message: format!(
                    "shape {:?} needs {} values, got {}",
                    shape,
                    expected,
                    values.len()
                ),
            });
        }
        Ok(Self { shape, values })
    }

    /// One-dimensional tensor over the given values
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    /// Tensor of the given shape filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let len = element_count(&shape)?;
        Ok(Self {
            shape,
            values: vec![0.0; len],
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| Error::InvalidParameters {
            message: format!("shape {:?} overflows", shape),
        })
}

/// Immutable ordered sequence of tensors forming a model's weights
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    tensors: Vec<Tensor>,
}

impl Parameters {
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self { tensors }
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Shapes of all tensors, in order
    pub fn shape_signature(&self) -> Vec<Vec<usize>> {
        self.tensors.iter().map(|t| t.shape.clone()).collect()
    }

    /// Returns true if both values have identical tensor shapes
    pub fn same_shape(&self, other: &Parameters) -> bool {
        self.tensors.len() == other.tensors.len()
            && self
                .tensors
                .iter()
                .zip(&other.tensors)
                .all(|(a, b)| a.shape == b.shape)
    }

    /// Total number of scalar values across all tensors
    pub fn num_elements(&self) -> usize {
        self.tensors.iter().map(Tensor::len).sum()
    }

    /// Size of the encoded blob in bytes
    pub fn encoded_len(&self) -> usize {
        4 + self
            .tensors
            .iter()
            .map(|t| 4 + 8 * t.shape.len() + 4 * t.values.len())
            .sum::<usize>()
    }

    /// Serialize to the declared byte layout
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32_le(self.tensors.len() as u32);
        for tensor in &self.tensors {
            buf.put_u32_le(tensor.shape.len() as u32);
            for &dim in &tensor.shape {
                buf.put_u64_le(dim as u64);
            }
            for &value in &tensor.values {
                buf.put_f32_le(value);
            }
        }
        buf.freeze()
    }

    /// Parse a blob produced by [`Parameters::encode`]
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let count = read_u32(&mut buf, "tensor count")? as usize;
        let mut tensors = Vec::with_capacity(count.min(1024));

        for index in 0..count {
            let rank = read_u32(&mut buf, "tensor rank")? as usize;
            if buf.remaining() < rank * 8 {
                return Err(truncated(index, "dimensions"));
            }
            let shape: Vec<usize> = (0..rank).map(|_| buf.get_u64_le() as usize).collect();

            let len = element_count(&shape)?;
            if len.checked_mul(4).map_or(true, |bytes| buf.remaining() < bytes) {
                return Err(truncated(index, "values"));
            }
            let values = (0..len).map(|_| buf.get_f32_le()).collect();
            tensors.push(Tensor { shape, values });
        }

        if buf.has_remaining() {
            return Err(Error::InvalidParameters {
                message: format!("{} trailing bytes after {} tensors", buf.remaining(), count),
            });
        }

        Ok(Self { tensors })
    }
}

impl From<Vec<Tensor>> for Parameters {
    fn from(tensors: Vec<Tensor>) -> Self {
        Self::new(tensors)
    }
}

fn read_u32(buf: &mut &[u8], field: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::InvalidParameters {
            message: format!("truncated blob while reading {}", field),
        });
    }
    Ok(buf.get_u32_le())
}

fn truncated(index: usize, section: &str) -> Error {
    Error::InvalidParameters {
        message: format!("truncated blob in tensor {} {}", index, section),
    }
}
