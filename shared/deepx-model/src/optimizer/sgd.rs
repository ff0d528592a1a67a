//! Plain stochastic gradient descent: `param -= alpha * clip(grad)`, no
//! auxiliary slot state. Grounded on `ps/optimizer.cc`'s `SGD`.

use deepx_core::stream::{InStream, OutStream, Result};
use deepx_core::tensor_map::TensorMap;

use super::{clip, write_header, Optimizer};

pub struct Sgd {
    pub alpha: f32,
}

impl Sgd {
    pub fn new(alpha: f32) -> Self {
        Sgd { alpha }
    }

    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        let alpha = is.read_f32_()?;
        Ok(Sgd { alpha })
    }
}

impl Optimizer for Sgd {
    fn class_name(&self) -> &'static str {
        "SGD"
    }

    fn slots(&self) -> usize {
        0
    }

    fn init_param(&mut self, _param: &TensorMap, _grad: &TensorMap) {}

    fn update(&mut self, param: &mut TensorMap, grad: &TensorMap) {
        let names: Vec<String> = grad.names().map(str::to_string).collect();
        for name in names {
            match (param.get_mut(&name), grad.get(&name)) {
                (Some(p), Some(g)) => {
                    use deepx_core::tensor_map::TensorValue::*;
                    match (p, g) {
                        (Tsr(p), Tsr(g)) => {
                            for (pv, &gv) in p.data_mut().iter_mut().zip(g.data()) {
                                *pv -= self.alpha * clip(gv);
                            }
                        }
                        (Srm(p), Srm(g)) => {
                            let col = g.col();
                            for (id, gv) in g.iter() {
                                let pv = p.get_row_mut_or_zero(id, col);
                                for (pe, &ge) in pv.iter_mut().zip(gv) {
                                    *pe -= self.alpha * clip(ge);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        write_header(os, self.class_name())?;
        os.write_f32_(self.alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepx_core::shape::Shape;
    use deepx_core::tensor::Tensor;
    use deepx_core::tensor_map::TensorValue;

    #[test]
    fn sgd_step_matches_alpha_times_grad() {
        let mut param = TensorMap::new();
        param.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[3]), vec![1.0, 1.0, 1.0])));
        let mut grad = TensorMap::new();
        grad.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[3]), vec![2.0, 2.0, 2.0])));

        let mut sgd = Sgd::new(0.1);
        sgd.update(&mut param, &grad);
        let w = param.get_tsr("w").unwrap().data();
        for &v in w {
            approx::assert_abs_diff_eq!(v, 0.8, epsilon = 1e-6);
        }
    }

    #[test]
    fn sgd_clips_large_gradients() {
        let mut param = TensorMap::new();
        param.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[1]), vec![0.0])));
        let mut grad = TensorMap::new();
        grad.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[1]), vec![1000.0])));

        let mut sgd = Sgd::new(1.0);
        sgd.update(&mut param, &grad);
        assert_eq!(param.get_tsr("w").unwrap().data(), &[-20.0]);
    }
}
