//! IEEE-754 binary16 conversions, needed only by protocol-version-3
//! feature-kv embedding export.

pub use half::f16;

pub fn f32_slice_to_f16(src: &[f32]) -> Vec<f16> {
    src.iter().map(|&v| f16::from_f32(v)).collect()
}

pub fn f16_slice_to_f32(src: &[f16]) -> Vec<f32> {
    src.iter().map(|v| v.to_f32()).collect()
}
