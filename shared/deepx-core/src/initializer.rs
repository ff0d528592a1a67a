//! Parameter initialiser descriptors shared by dense parameters and by
//! sparse-row-matrix rows generated lazily on first pull.
//!
//! Requires the `rand` feature; without it an [`Initializer`] can still be
//! constructed and (de)serialised, just not sampled.

use crate::stream::{InStream, OutStream, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Initializer {
    Zeros,
    Ones,
    Constant(f32),
    Rand(f32, f32),
    Randn(f32, f32),
    RandLecun,
    RandnLecun,
    RandXavier,
    RandnXavier,
    RandHe,
    RandnHe,
    RandInt(i64, i64),
    Arange,
}

impl Initializer {
    fn tag(self) -> u8 {
        match self {
            Initializer::Zeros => 0,
            Initializer::Ones => 1,
            Initializer::Constant(_) => 2,
            Initializer::Rand(..) => 3,
            Initializer::Randn(..) => 4,
            Initializer::RandLecun => 5,
            Initializer::RandnLecun => 6,
            Initializer::RandXavier => 7,
            Initializer::RandnXavier => 8,
            Initializer::RandHe => 9,
            Initializer::RandnHe => 10,
            Initializer::RandInt(..) => 11,
            Initializer::Arange => 12,
        }
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_u8_(self.tag())?;
        match *self {
            Initializer::Constant(c) => os.write_f32_(c),
            Initializer::Rand(a, b) | Initializer::Randn(a, b) => {
                os.write_f32_(a)?;
                os.write_f32_(b)
            }
            Initializer::RandInt(lo, hi) => {
                os.write_i64_(lo)?;
                os.write_i64_(hi)
            }
            _ => Ok(()),
        }
    }

    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        use crate::error::SerializationError;
        let tag = is.read_u8_()?;
        Ok(match tag {
            0 => Initializer::Zeros,
            1 => Initializer::Ones,
            2 => Initializer::Constant(is.read_f32_()?),
            3 => Initializer::Rand(is.read_f32_()?, is.read_f32_()?),
            4 => Initializer::Randn(is.read_f32_()?, is.read_f32_()?),
            5 => Initializer::RandLecun,
            6 => Initializer::RandnLecun,
            7 => Initializer::RandXavier,
            8 => Initializer::RandnXavier,
            9 => Initializer::RandHe,
            10 => Initializer::RandnHe,
            11 => Initializer::RandInt(is.read_i64_()?, is.read_i64_()?),
            12 => Initializer::Arange,
            _ => return Err(SerializationError::Corrupt("unknown initializer tag")),
        })
    }
}

#[cfg(feature = "rand")]
mod sampling {
    use super::Initializer;
    use rand::Rng;

    fn lecun_bound(fan_in: usize) -> f32 {
        (1.0 / fan_in.max(1) as f32).sqrt()
    }
    fn xavier_bound(fan_in: usize, fan_out: usize) -> f32 {
        (6.0 / (fan_in.max(1) + fan_out.max(1)) as f32).sqrt()
    }
    fn he_std(fan_in: usize) -> f32 {
        (2.0 / fan_in.max(1) as f32).sqrt()
    }

    impl Initializer {
        /// Fills `len` float elements, where `fan_in`/`fan_out` describe
        /// the enclosing tensor shape (used only by the `*_lecun`,
        /// `*_xavier`, `*_he` variants).
        pub fn fill_f32<R: Rng + ?Sized>(
            self,
            rng: &mut R,
            len: usize,
            fan_in: usize,
            fan_out: usize,
        ) -> Vec<f32> {
            match self {
                Initializer::Zeros => vec![0.0; len],
                Initializer::Ones => vec![1.0; len],
                Initializer::Constant(c) => vec![c; len],
                Initializer::Rand(a, b) => (0..len).map(|_| rng.random_range(a..b)).collect(),
                Initializer::Randn(mu, sigma) => {
                    (0..len).map(|_| mu + sigma * sample_normal(rng)).collect()
                }
                Initializer::RandLecun => {
                    let b = lecun_bound(fan_in);
                    (0..len).map(|_| rng.random_range(-b..b)).collect()
                }
                Initializer::RandnLecun => {
                    let sigma = lecun_bound(fan_in);
                    (0..len).map(|_| sigma * sample_normal(rng)).collect()
                }
                Initializer::RandXavier => {
                    let b = xavier_bound(fan_in, fan_out);
                    (0..len).map(|_| rng.random_range(-b..b)).collect()
                }
                Initializer::RandnXavier => {
                    let sigma = xavier_bound(fan_in, fan_out) / 1.732_050_8;
                    (0..len).map(|_| sigma * sample_normal(rng)).collect()
                }
                Initializer::RandHe => {
                    let b = he_std(fan_in) * 1.732_050_8;
                    (0..len).map(|_| rng.random_range(-b..b)).collect()
                }
                Initializer::RandnHe => {
                    let sigma = he_std(fan_in);
                    (0..len).map(|_| sigma * sample_normal(rng)).collect()
                }
                Initializer::RandInt(lo, hi) => (0..len)
                    .map(|_| rng.random_range(lo..hi) as f32)
                    .collect(),
                Initializer::Arange => (0..len).map(|i| i as f32).collect(),
            }
        }
    }

    /// Box-Muller standard normal sample.
    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
        let u1: f32 = rng.random_range(f32::EPSILON..1.0);
        let u2: f32 = rng.random_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
    }
}

#[cfg(all(test, feature = "rand"))]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn zeros_and_ones_are_deterministic() {
        let mut rng = rand_chacha_test_rng();
        assert_eq!(Initializer::Zeros.fill_f32(&mut rng, 3, 1, 1), vec![0.0; 3]);
        assert_eq!(Initializer::Ones.fill_f32(&mut rng, 3, 1, 1), vec![1.0; 3]);
    }

    #[test]
    fn rand_stays_within_bounds() {
        let mut rng = rand_chacha_test_rng();
        let v = Initializer::Rand(-1.0, 1.0).fill_f32(&mut rng, 100, 1, 1);
        assert!(v.iter().all(|&x| (-1.0..1.0).contains(&x)));
    }

    fn rand_chacha_test_rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(42)
    }
}
