//! Typed views over the raw byte storage backing a fixed-ring edge.
//!
//! The ring and object queue move opaque bytes; block authors work with
//! typed slices instead. These casts are the only `unsafe` in the crate
//! outside the scheduler's panic boundary, and are bounded by an explicit
//! length/alignment check the way `bytemuck`-style helpers are in the rest
//! of the ecosystem.

use crate::types::Complex32;

fn check_cast<T>(bytes: &[u8]) -> usize {
    let elem = std::mem::size_of::<T>();
    assert_eq!(
        bytes.len() % elem,
        0,
        "byte slice length is not a multiple of the element size"
    );
    assert_eq!(
        (bytes.as_ptr() as usize) % std::mem::align_of::<T>(),
        0,
        "byte slice is not correctly aligned for this element type"
    );
    bytes.len() / elem
}

/// Reinterprets a byte slice as a slice of `f32` samples.
///
/// # Safety invariants upheld by the caller
/// The slice must come from a ring allocated for the `real32` type, which
/// guarantees 4-byte alignment and a length that is a multiple of 4.
pub fn as_f32_slice(bytes: &[u8]) -> &[f32] {
    let n = check_cast::<f32>(bytes);
    // SAFETY: length and alignment were just checked above, and `f32` has
    // no padding or validity invariants stricter than any bit pattern.
    unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<f32>(), n) }
}

/// Mutable counterpart of [`as_f32_slice`].
pub fn as_f32_slice_mut(bytes: &mut [u8]) -> &mut [f32] {
    let n = check_cast::<f32>(bytes);
    // SAFETY: see `as_f32_slice`; exclusive access is upheld because we
    // hold `&mut [u8]`.
    unsafe { std::slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<f32>(), n) }
}

/// Reinterprets a byte slice as a slice of [`Complex32`] samples.
pub fn as_complex32_slice(bytes: &[u8]) -> &[Complex32] {
    let n = check_cast::<Complex32>(bytes);
    // SAFETY: see `as_f32_slice`; `Complex32` is `#[repr(C)]` of two `f32`s.
    unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<Complex32>(), n) }
}

/// Mutable counterpart of [`as_complex32_slice`].
pub fn as_complex32_slice_mut(bytes: &mut [u8]) -> &mut [Complex32] {
    let n = check_cast::<Complex32>(bytes);
    // SAFETY: see `as_complex32_slice`; exclusive access via `&mut [u8]`.
    unsafe { std::slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<Complex32>(), n) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_round_trip() {
        let mut bytes = vec![0u8; 8];
        as_f32_slice_mut(&mut bytes)[0] = 1.5;
        as_f32_slice_mut(&mut bytes)[1] = -2.5;
        let view = as_f32_slice(&bytes);
        assert_eq!(view, &[1.5, -2.5]);
    }
}
