//! `k1=v1,k2=v2` key-value config parsing, the convention optimisers and
//! instance readers use for `InitConfig` (`common/group_config.h` in the
//! original). A bare `HashMap<String, String>` with typed getters that
//! return a `ConfigError` (§7 taxonomy) instead of the original's
//! `false`-returning `InitConfig`.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required key {0:?}")]
    Missing(String),
    #[error("key {key:?} has invalid value {value:?}")]
    Invalid { key: String, value: String },
}

/// Parses `"alpha=0.1,beta=1e-6"` into a lookup map. Empty segments (a
/// leading/trailing/doubled comma) are skipped rather than rejected,
/// matching the original parser's leniency.
pub fn parse(s: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((k, v)) = part.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

pub fn get_f32(map: &HashMap<String, String>, key: &str) -> Result<f32, ConfigError> {
    let raw = map.get(key).ok_or_else(|| ConfigError::Missing(key.to_string()))?;
    raw.parse::<f32>().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.clone(),
    })
}

pub fn get_f32_or(map: &HashMap<String, String>, key: &str, default: f32) -> Result<f32, ConfigError> {
    match map.get(key) {
        Some(raw) => raw.parse::<f32>().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

use super::{Adam, AdaGrad, Sgd};

impl Sgd {
    /// `InitConfig` equivalent: requires `alpha`.
    pub fn from_config(s: &str) -> Result<Self, ConfigError> {
        let map = parse(s);
        Ok(Sgd::new(get_f32(&map, "alpha")?))
    }
}

impl AdaGrad {
    /// `InitConfig` equivalent: requires `alpha`, `beta` defaults to `1e-6`.
    pub fn from_config(s: &str) -> Result<Self, ConfigError> {
        let map = parse(s);
        let alpha = get_f32(&map, "alpha")?;
        let beta = get_f32_or(&map, "beta", 1e-6)?;
        Ok(AdaGrad::new(alpha, beta))
    }
}

impl Adam {
    /// `InitConfig` equivalent: requires `alpha`, `beta1`/`beta2`/`eps`
    /// default to the values the original hardcodes.
    pub fn from_config(s: &str) -> Result<Self, ConfigError> {
        let map = parse(s);
        let alpha = get_f32(&map, "alpha")?;
        let beta1 = get_f32_or(&map, "beta1", 0.9)?;
        let beta2 = get_f32_or(&map, "beta2", 0.999)?;
        let eps = get_f32_or(&map, "eps", 1e-8)?;
        Ok(Adam::new(alpha, beta1, beta2, eps))
    }
}
