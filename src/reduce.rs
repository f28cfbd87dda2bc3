//! Element-wise reduction over little-endian byte slices.
//!
//! Shared by the stock reduce/gather implementations and the host-memory
//! native backend.

use crate::error::{LockstepError, Result};
use crate::types::{DataType, ReduceOp};

/// An element that can be loaded from and stored to little-endian bytes and
/// combined with another element under a [`ReduceOp`].
pub(crate) trait Element: Copy + 'static {
    const SIZE: usize;
    fn load(bytes: &[u8]) -> Self;
    fn store(self, out: &mut [u8]);
    fn combine(self, other: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_element {
    (int: $($ty:ty),*) => {
        $(
            impl Element for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn load(bytes: &[u8]) -> Self {
                    Self::from_le_bytes(bytes.try_into().expect("slice length matches type size"))
                }

                #[inline]
                fn store(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn combine(self, other: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => self.wrapping_add(other),
                        ReduceOp::Prod => self.wrapping_mul(other),
                        ReduceOp::Min => self.min(other),
                        ReduceOp::Max => self.max(other),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Element for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn load(bytes: &[u8]) -> Self {
                    Self::from_le_bytes(bytes.try_into().expect("slice length matches type size"))
                }

                #[inline]
                fn store(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn combine(self, other: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => self + other,
                        ReduceOp::Prod => self * other,
                        ReduceOp::Min => self.min(other),
                        ReduceOp::Max => self.max(other),
                    }
                }
            }
        )*
    };
}

impl_element!(int: i32, i64);
impl_element!(float: f32, f64);

/// In-place fold: `dst[i] = op(dst[i], src[i])` for each element.
///
/// `dst` and `src` must hold the same number of whole `dtype` elements.
pub(crate) fn accumulate(dst: &mut [u8], src: &[u8], dtype: DataType, op: ReduceOp) -> Result<()> {
    if dst.len() != src.len() {
        return Err(LockstepError::BufferSizeMismatch {
            expected: dst.len() / dtype.size_in_bytes(),
            actual: src.len() / dtype.size_in_bytes(),
        });
    }
    match dtype {
        DataType::F32 => accumulate_typed::<f32>(dst, src, op),
        DataType::F64 => accumulate_typed::<f64>(dst, src, op),
        DataType::I32 => accumulate_typed::<i32>(dst, src, op),
        DataType::I64 => accumulate_typed::<i64>(dst, src, op),
    }
    Ok(())
}

fn accumulate_typed<T: Element>(dst: &mut [u8], src: &[u8], op: ReduceOp) {
    let count = dst.len() / T::SIZE;
    for i in 0..count {
        let off = i * T::SIZE;
        let a = T::load(&dst[off..off + T::SIZE]);
        let b = T::load(&src[off..off + T::SIZE]);
        a.combine(b, op).store(&mut dst[off..off + T::SIZE]);
    }
}
