//! Owned numeric buffers exchanged by collective operations.
//!
//! A [`TensorBuffer`] is a contiguous block of little-endian elements plus a
//! shape. The engine only looks inside a buffer in the stock reduce and
//! gather implementations; the generic collective moves buffers around
//! without inspecting them.

use crate::error::{LockstepError, Result};
use crate::reduce::{accumulate, Element};
use crate::types::DataType;

/// An ownable block of numeric data with a fixed element type and shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuffer {
    dtype: DataType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

macro_rules! typed_accessors {
    ($($from:ident / $to:ident: $ty:ty => $dtype:expr),* $(,)?) => {
        $(
            /// Build a 1-D buffer from typed values.
            pub fn $from(values: Vec<$ty>) -> Self {
                let mut data = Vec::with_capacity(values.len() * <$ty as Element>::SIZE);
                for v in &values {
                    data.extend_from_slice(&v.to_le_bytes());
                }
                Self {
                    dtype: $dtype,
                    shape: vec![values.len()],
                    data,
                }
            }

            /// Extract the buffer's elements as typed values.
            pub fn $to(&self) -> Result<Vec<$ty>> {
                if self.dtype != $dtype {
                    return Err(LockstepError::DTypeMismatch {
                        expected: $dtype,
                        actual: self.dtype,
                    });
                }
                Ok(self
                    .data
                    .chunks_exact(<$ty as Element>::SIZE)
                    .map(|c| <$ty>::from_le_bytes(c.try_into().expect("chunk size matches")))
                    .collect())
            }
        )*
    };
}

impl TensorBuffer {
    typed_accessors!(
        from_f32 / to_f32: f32 => DataType::F32,
        from_f64 / to_f64: f64 => DataType::F64,
        from_i32 / to_i32: i32 => DataType::I32,
        from_i64 / to_i64: i64 => DataType::I64,
    );

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements in the buffer.
    pub fn element_count(&self) -> usize {
        self.data.len() / self.dtype.size_in_bytes()
    }

    /// Reinterpret the buffer under a new shape holding the same elements.
    pub fn reshape(mut self, shape: Vec<usize>) -> Result<Self> {
        let elements: usize = shape.iter().product();
        if elements != self.element_count() {
            return Err(LockstepError::ShapeMismatch {
                shape,
                elements: self.element_count(),
            });
        }
        self.shape = shape;
        Ok(self)
    }

    /// Split into `n` contiguous 1-D parts along the flattened element
    /// sequence.
    ///
    /// When the element count is not divisible by `n`, the first
    /// `count % n` parts receive one extra element. The rule is stable:
    /// total element count is always conserved and the same inputs always
    /// produce the same part sizes.
    pub fn split_parts(&self, n: usize) -> Vec<TensorBuffer> {
        let count = self.element_count();
        let esize = self.dtype.size_in_bytes();
        let base = count / n;
        let extra = count % n;

        let mut parts = Vec::with_capacity(n);
        let mut offset = 0;
        for i in 0..n {
            let part_count = base + usize::from(i < extra);
            let bytes = part_count * esize;
            parts.push(TensorBuffer {
                dtype: self.dtype,
                shape: vec![part_count],
                data: self.data[offset..offset + bytes].to_vec(),
            });
            offset += bytes;
        }
        parts
    }

    /// Concatenate parts along the flattened element sequence, in order.
    pub fn concat(parts: &[TensorBuffer]) -> Result<TensorBuffer> {
        let first = parts.first().ok_or(LockstepError::EmptyBufferSet {
            operation: "concat",
        })?;
        let mut data = Vec::new();
        for p in parts {
            if p.dtype != first.dtype {
                return Err(LockstepError::DTypeMismatch {
                    expected: first.dtype,
                    actual: p.dtype,
                });
            }
            data.extend_from_slice(&p.data);
        }
        let count = data.len() / first.dtype.size_in_bytes();
        Ok(TensorBuffer {
            dtype: first.dtype,
            shape: vec![count],
            data,
        })
    }

    /// Concatenate identically-shaped parts along `axis`.
    ///
    /// Used by the native all-gather layout transform: a backend that
    /// assembles along the leading axis is re-interleaved here into the
    /// caller's requested concatenation axis.
    pub fn concat_along(parts: &[TensorBuffer], axis: usize) -> Result<TensorBuffer> {
        let first = parts.first().ok_or(LockstepError::EmptyBufferSet {
            operation: "concat_along",
        })?;
        if axis >= first.shape.len() {
            return Err(LockstepError::AxisOutOfRange {
                axis,
                shape: first.shape.clone(),
            });
        }
        for p in parts {
            if p.dtype != first.dtype {
                return Err(LockstepError::DTypeMismatch {
                    expected: first.dtype,
                    actual: p.dtype,
                });
            }
            if p.shape != first.shape {
                return Err(LockstepError::BufferSizeMismatch {
                    expected: first.element_count(),
                    actual: p.element_count(),
                });
            }
        }

        // Bytes per part within one outer index: everything from `axis` in.
        let esize = first.dtype.size_in_bytes();
        let outer: usize = first.shape[..axis].iter().product();
        let block: usize = first.shape[axis..].iter().product::<usize>() * esize;

        let mut data = Vec::with_capacity(first.data.len() * parts.len());
        for o in 0..outer {
            for p in parts {
                data.extend_from_slice(&p.data[o * block..(o + 1) * block]);
            }
        }

        let mut shape = first.shape.clone();
        shape[axis] *= parts.len();
        Ok(TensorBuffer {
            dtype: first.dtype,
            shape,
            data,
        })
    }

    /// Element-wise reduction of same-sized parts into a single buffer.
    pub fn reduce_parts(parts: Vec<TensorBuffer>, op: crate::types::ReduceOp) -> Result<TensorBuffer> {
        let mut iter = parts.into_iter();
        let mut acc = iter.next().ok_or(LockstepError::EmptyBufferSet {
            operation: "reduce",
        })?;
        for p in iter {
            if p.dtype != acc.dtype {
                return Err(LockstepError::DTypeMismatch {
                    expected: acc.dtype,
                    actual: p.dtype,
                });
            }
            accumulate(&mut acc.data, &p.data, acc.dtype, op)?;
        }
        Ok(acc)
    }
}
