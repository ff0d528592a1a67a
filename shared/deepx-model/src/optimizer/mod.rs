//! Parameter update rules: each [`Optimizer`] owns zero or more per-tensor
//! "slot" maps (e.g. AdaGrad's accumulated squared gradient) alongside the
//! model's own parameter map, and reduces `(param, grad)` pairs into
//! updated parameters in place.
//!
//! Grounded on `ps/optimizer.h`/`.cc`: `Init`/`InitConfig`/`InitParam`
//! allocate a slot tensor shaped like its parameter the first time that
//! parameter is seen; `Update` walks matching names in `param`/`grad` via
//! [`TensorMap::for_each_matching`], dispatching on whether each name is a
//! TSR or SRM (an SRM parameter with a TSR gradient, or vice versa, is a
//! configuration error the original also never supports).

mod adagrad;
mod adam;
pub mod config;
mod sgd;

pub use adagrad::AdaGrad;
pub use adam::Adam;
pub use sgd::Sgd;

use deepx_core::stream::{InStream, OutStream, Result};
use deepx_core::tensor::Tensor;
use deepx_core::tensor_map::{TensorMap, TensorValue};

/// Gradients are clamped to this range before being applied, matching the
/// original's hardcoded `kGradClip` guard against exploding updates.
pub const GRAD_CLIP: f32 = 20.0;

pub fn clip(g: f32) -> f32 {
    g.clamp(-GRAD_CLIP, GRAD_CLIP)
}

/// Common interface for gradient-to-parameter update rules.
///
/// `slots()` returns how many per-parameter auxiliary tensors this
/// optimiser needs (0 for SGD, 1 for AdaGrad, 2 for Adam/FTRL-style rules).
pub trait Optimizer: Send {
    fn class_name(&self) -> &'static str;
    fn slots(&self) -> usize;

    /// Ensures slot storage exists for every name present in `grad` but
    /// not yet tracked, allocating zeroed TSR/SRM slots shaped like the
    /// corresponding parameter.
    fn init_param(&mut self, param: &TensorMap, grad: &TensorMap);

    /// Applies one update step: `param[name] -= update(grad[name],
    /// slot_state[name])` for every name present in both `param` and
    /// `grad`.
    fn update(&mut self, param: &mut TensorMap, grad: &TensorMap);

    fn write(&self, os: &mut dyn OutStream) -> Result<()>;
}

/// Shared TSR-slot bookkeeping: allocates a zero tensor shaped like
/// `param`'s entry the first time `name` appears in a gradient update.
pub(crate) fn ensure_tsr_slot(slot: &mut TensorMap, name: &str, like: &Tensor<f32>) {
    if !slot.contains(name) {
        slot.insert(name.to_string(), TensorValue::Tsr(Tensor::zeros(*like.shape())));
    }
}

pub(crate) fn ensure_srm_slot(slot: &mut TensorMap, name: &str, col: usize) {
    if !slot.contains(name) {
        slot.insert(
            name.to_string(),
            TensorValue::Srm(deepx_core::srm::SparseRowMatrix::with_col(col)),
        );
    }
}

/// A versioned, slot-agnostic serialisation preamble every optimiser's
/// `write` shares: a leading version tag lets `OptimizerConfig::read`
/// reject configs from a newer build before touching slot data.
pub const OPTIMIZER_CONFIG_VERSION: u32 = 0;

pub fn write_header(os: &mut dyn OutStream, class_name: &str) -> Result<()> {
    os.write_u32_(OPTIMIZER_CONFIG_VERSION)?;
    os.write_str_(class_name)
}

/// Reads the shared header, returning the class name. A version above
/// what this build understands is fatal -- mirrors every other
/// versioned-store reader in this workspace (`ts_store`, `freq_store`,
/// `ol_store`).
pub fn read_header(is: &mut InStream<'_>) -> Result<String> {
    let version = is.read_u32_()?;
    if version > OPTIMIZER_CONFIG_VERSION {
        return Err(deepx_core::error::SerializationError::VersionTooNew {
            found: version,
            max_supported: OPTIMIZER_CONFIG_VERSION,
        });
    }
    is.read_string()
}

/// Reads a serialised optimizer back into a boxed trait object, dispatching
/// on the class name written by [`write_header`]. This is how
/// `optimizer_shard_N.bin` gets reloaded without the caller already knowing
/// which concrete optimizer a shard was saved with.
pub fn read_dyn(is: &mut InStream<'_>) -> Result<Box<dyn Optimizer>> {
    let class_name = read_header(is)?;
    match class_name.as_str() {
        "SGD" => Ok(Box::new(sgd::Sgd::read(is)?)),
        "AdaGrad" => Ok(Box::new(adagrad::AdaGrad::read(is)?)),
        "Adam" => Ok(Box::new(adam::Adam::read(is)?)),
        _ => Err(deepx_core::error::SerializationError::Corrupt(
            "unknown optimizer class name",
        )),
    }
}

#[cfg(test)]
mod dyn_tests {
    use super::*;
    use deepx_core::shape::Shape;
    use deepx_core::tensor::Tensor;
    use deepx_core::tensor_map::TensorValue;

    #[test]
    fn read_dyn_round_trips_sgd_and_adagrad() {
        for opt in [
            Box::new(Sgd::new(0.05)) as Box<dyn Optimizer>,
            Box::new(AdaGrad::new(0.1, 1e-6)) as Box<dyn Optimizer>,
            Box::new(Adam::new(0.01, 0.9, 0.999, 1e-8)) as Box<dyn Optimizer>,
        ] {
            let mut buf = Vec::new();
            opt.write(&mut buf).unwrap();
            let mut is = InStream::new(&buf);
            let restored = read_dyn(&mut is).unwrap();
            assert_eq!(restored.class_name(), opt.class_name());
            assert_eq!(restored.slots(), opt.slots());
        }
    }

    #[test]
    fn adagrad_read_restores_slot_state() {
        let mut param = TensorMap::new();
        param.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[2]), vec![1.0, 1.0])));
        let mut grad = TensorMap::new();
        grad.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[2]), vec![2.0, 2.0])));

        let mut opt = AdaGrad::new(0.1, 1e-6);
        opt.init_param(&param, &grad);
        opt.update(&mut param, &grad);

        let mut buf = Vec::new();
        opt.write(&mut buf).unwrap();
        let mut is = InStream::new(&buf);
        let restored = read_dyn(&mut is).unwrap();
        let restored = restored.class_name();
        assert_eq!(restored, "AdaGrad");
    }
}
