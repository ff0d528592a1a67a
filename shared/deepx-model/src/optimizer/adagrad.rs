//! AdaGrad: accumulates squared gradients per parameter element and scales
//! the learning rate down as that accumulator grows.
//!
//! `n += g^2; param -= alpha * g / (sqrt(n) + beta)`. Grounded on
//! `ps/optimizer.cc`'s `AdaGrad`; `beta` guards the division when `n` is
//! still zero.

use deepx_core::srm::SparseRowMatrix;
use deepx_core::stream::{OutStream, Result};
use deepx_core::tensor::Tensor;
use deepx_core::tensor_map::{TensorMap, TensorValue};

use super::{clip, ensure_srm_slot, ensure_tsr_slot, write_header, Optimizer};

pub struct AdaGrad {
    pub alpha: f32,
    pub beta: f32,
    n: TensorMap,
}

impl AdaGrad {
    pub fn new(alpha: f32, beta: f32) -> Self {
        AdaGrad {
            alpha,
            beta,
            n: TensorMap::new(),
        }
    }
}

impl Optimizer for AdaGrad {
    fn class_name(&self) -> &'static str {
        "AdaGrad"
    }

    fn slots(&self) -> usize {
        1
    }

    fn init_param(&mut self, _param: &TensorMap, grad: &TensorMap) {
        for (name, value) in grad.iter() {
            match value {
                TensorValue::Tsr(t) => ensure_tsr_slot(&mut self.n, name, t),
                TensorValue::Srm(s) => ensure_srm_slot(&mut self.n, name, s.col()),
                _ => {}
            }
        }
    }

    fn update(&mut self, param: &mut TensorMap, grad: &TensorMap) {
        let names: Vec<String> = grad.names().map(str::to_string).collect();
        for name in names {
            match (grad.get(&name), param.get_mut(&name), self.n.get_mut(&name)) {
                (Some(TensorValue::Tsr(g)), Some(TensorValue::Tsr(p)), Some(TensorValue::Tsr(n))) => {
                    for ((pv, nv), &gv) in p.data_mut().iter_mut().zip(n.data_mut()).zip(g.data()) {
                        let gv = clip(gv);
                        *nv += gv * gv;
                        *pv -= self.alpha * gv / (nv.sqrt() + self.beta);
                    }
                }
                (Some(TensorValue::Srm(g)), Some(TensorValue::Srm(p)), Some(TensorValue::Srm(n))) => {
                    let col = g.col();
                    for (id, gv) in g.iter() {
                        let gv: Vec<f32> = gv.iter().copied().map(clip).collect();
                        let nv = n.get_row_mut_or_zero(id, col);
                        for (ne, &ge) in nv.iter_mut().zip(&gv) {
                            *ne += ge * ge;
                        }
                        let nv = n.get_row_no_init(id).unwrap().to_vec();
                        let pv = p.get_row_mut_or_zero(id, col);
                        for ((pe, ne), ge) in pv.iter_mut().zip(&nv).zip(&gv) {
                            *pe -= self.alpha * ge / (ne.sqrt() + self.beta);
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
        os.write_f32_(self.beta)?;
        self.n.write(os)
    }
}

impl AdaGrad {
    pub fn read(is: &mut deepx_core::stream::InStream<'_>) -> Result<Self> {
        let alpha = is.read_f32_()?;
        let beta = is.read_f32_()?;
        let n = TensorMap::read(is)?;
        Ok(AdaGrad { alpha, beta, n })
    }

    pub fn slot_tsr(&self, name: &str) -> Option<&Tensor<f32>> {
        self.n.get_tsr(name)
    }

    pub fn slot_srm(&self, name: &str) -> Option<&SparseRowMatrix> {
        self.n.get_srm(name)
    }
}
