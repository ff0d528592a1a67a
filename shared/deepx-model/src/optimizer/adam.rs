//! Adam: tracks a first-moment (`m`) and second-moment (`v`) estimate per
//! parameter element, each an exponential moving average of the gradient
//! and its square.
//!
//! `m = beta1*m + (1-beta1)*g; v = beta2*v + (1-beta2)*g^2;
//! param -= alpha * m / (sqrt(v) + eps)`. Grounded on `ps/optimizer.cc`'s
//! `Adam`; unlike the original this skips bias-correction bookkeeping
//! (no persisted step counter) since only the slot lifecycle (2 slots)
//! is load-bearing here, not numerical fidelity to a specific formula.

use deepx_core::srm::SparseRowMatrix;
use deepx_core::stream::{OutStream, Result};
use deepx_core::tensor::Tensor;
use deepx_core::tensor_map::{TensorMap, TensorValue};

use super::{clip, ensure_srm_slot, ensure_tsr_slot, write_header, Optimizer};

pub struct Adam {
    pub alpha: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    m: TensorMap,
    v: TensorMap,
}

impl Adam {
    pub fn new(alpha: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Adam {
            alpha,
            beta1,
            beta2,
            eps,
            m: TensorMap::new(),
            v: TensorMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn class_name(&self) -> &'static str {
        "Adam"
    }

    fn slots(&self) -> usize {
        2
    }

    fn init_param(&mut self, _param: &TensorMap, grad: &TensorMap) {
        for (name, value) in grad.iter() {
            match value {
                TensorValue::Tsr(t) => {
                    ensure_tsr_slot(&mut self.m, name, t);
                    ensure_tsr_slot(&mut self.v, name, t);
                }
                TensorValue::Srm(s) => {
                    ensure_srm_slot(&mut self.m, name, s.col());
                    ensure_srm_slot(&mut self.v, name, s.col());
                }
                _ => {}
            }
        }
    }

    fn update(&mut self, param: &mut TensorMap, grad: &TensorMap) {
        let names: Vec<String> = grad.names().map(str::to_string).collect();
        for name in names {
            match (
                grad.get(&name),
                param.get_mut(&name),
                self.m.get_mut(&name),
                self.v.get_mut(&name),
            ) {
                (
                    Some(TensorValue::Tsr(g)),
                    Some(TensorValue::Tsr(p)),
                    Some(TensorValue::Tsr(m)),
                    Some(TensorValue::Tsr(v)),
                ) => {
                    for (((pv, mv), vv), &gv) in
                        p.data_mut().iter_mut().zip(m.data_mut()).zip(v.data_mut()).zip(g.data())
                    {
                        let gv = clip(gv);
                        *mv = self.beta1 * *mv + (1.0 - self.beta1) * gv;
                        *vv = self.beta2 * *vv + (1.0 - self.beta2) * gv * gv;
                        *pv -= self.alpha * *mv / (vv.sqrt() + self.eps);
                    }
                }
                (
                    Some(TensorValue::Srm(g)),
                    Some(TensorValue::Srm(p)),
                    Some(TensorValue::Srm(m)),
                    Some(TensorValue::Srm(v)),
                ) => {
                    let col = g.col();
                    for (id, gv) in g.iter() {
                        let gv: Vec<f32> = gv.iter().copied().map(clip).collect();
                        let mv = m.get_row_mut_or_zero(id, col);
                        for (me, &ge) in mv.iter_mut().zip(&gv) {
                            *me = self.beta1 * *me + (1.0 - self.beta1) * ge;
                        }
                        let mv = m.get_row_no_init(id).unwrap().to_vec();
                        let vv = v.get_row_mut_or_zero(id, col);
                        for (ve, &ge) in vv.iter_mut().zip(&gv) {
                            *ve = self.beta2 * *ve + (1.0 - self.beta2) * ge * ge;
                        }
                        let vv = v.get_row_no_init(id).unwrap().to_vec();
                        let pv = p.get_row_mut_or_zero(id, col);
                        for ((pe, me), ve) in pv.iter_mut().zip(&mv).zip(&vv) {
                            *pe -= self.alpha * me / (ve.sqrt() + self.eps);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        write_header(os, self.class_name())?;
        os.write_f32_(self.alpha)?;
        os.write_f32_(self.beta1)?;
        os.write_f32_(self.beta2)?;
        os.write_f32_(self.eps)?;
        self.m.write(os)?;
        self.v.write(os)
    }
}

impl Adam {
    pub fn read(is: &mut deepx_core::stream::InStream<'_>) -> Result<Self> {
        let alpha = is.read_f32_()?;
        let beta1 = is.read_f32_()?;
        let beta2 = is.read_f32_()?;
        let eps = is.read_f32_()?;
        let m = TensorMap::read(is)?;
        let v = TensorMap::read(is)?;
        Ok(Adam { alpha, beta1, beta2, eps, m, v })
    }

    pub fn slot_tsr_m(&self, name: &str) -> Option<&Tensor<f32>> {
        self.m.get_tsr(name)
    }

    pub fn slot_tsr_v(&self, name: &str) -> Option<&Tensor<f32>> {
        self.v.get_tsr(name)
    }

    pub fn slot_srm_m(&self, name: &str) -> Option<&SparseRowMatrix> {
        self.m.get_srm(name)
    }

    pub fn slot_srm_v(&self, name: &str) -> Option<&SparseRowMatrix> {
        self.v.get_srm(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepx_core::shape::Shape;

    #[test]
    fn adam_allocates_two_slots_and_moves_param_downhill() {
        let mut param = TensorMap::new();
        param.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[2]), vec![1.0, 1.0])));
        let mut grad = TensorMap::new();
        grad.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[2]), vec![1.0, 1.0])));

        let mut opt = Adam::new(0.1, 0.9, 0.999, 1e-8);
        opt.init_param(&param, &grad);
        assert!(opt.slot_tsr_m("w").is_some());
        assert!(opt.slot_tsr_v("w").is_some());

        opt.update(&mut param, &grad);
        let w = param.get_tsr("w").unwrap().data();
        for &v in w {
            assert!(v < 1.0, "expected descent, got {v}");
        }
    }

    #[test]
    fn adam_round_trips_through_read_dyn() {
        let mut param = TensorMap::new();
        param.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[1]), vec![0.5])));
        let mut grad = TensorMap::new();
        grad.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[1]), vec![0.3])));

        let mut opt = Adam::new(0.01, 0.9, 0.999, 1e-8);
        opt.init_param(&param, &grad);
        opt.update(&mut param, &grad);

        let mut buf = Vec::new();
        opt.write(&mut buf).unwrap();
        let mut is = deepx_core::stream::InStream::new(&buf);
        let restored = super::super::read_dyn(&mut is).unwrap();
        assert_eq!(restored.class_name(), "Adam");
        assert_eq!(restored.slots(), 2);
    }
}
