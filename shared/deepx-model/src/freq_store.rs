//! Per-id saturating frequency counters used to filter cold/rare sparse
//! ids out of pull requests and gradients.
//!
//! Grounded on `ps/freq_store.h`/`.cc`. `Filter(pull_request)` accumulates
//! `pull_request.id_freq_map` into the running counters (saturating at
//! `u32::MAX`) then drops, from each SRM id-set, ids whose accumulated
//! frequency is still below `freq_filter_threshold` -- once an id crosses
//! the threshold it only ever accumulates further, so it can never drop
//! back out (§8 property 7). Guarded by a single RW lock (§4.9); `Filter`
//! itself needs the write lock since it both reads and updates counters,
//! so both "locked"/"unlocked" entry points here just route to the same
//! write-locked implementation -- there is no reader-only variant of a
//! mutating filter.

use std::collections::HashMap;

use parking_lot::RwLock;

use deepx_core::error::SerializationError;
use deepx_core::srm::Id;
use deepx_core::stream::{InStream, OutStream, Result};
use deepx_core::tensor_map::TensorMap;

use crate::pull_request::PullRequest;

pub const FREQ_STORE_VERSION: u32 = 0;

pub struct FreqStore {
    map: RwLock<HashMap<Id, u32>>,
    threshold: u32,
}

impl FreqStore {
    pub fn new(threshold: u32) -> Self {
        FreqStore {
            map: RwLock::new(HashMap::new()),
            threshold,
        }
    }

    fn accumulate(&self, id_freq_map: &HashMap<Id, u32>) {
        let mut map = self.map.write();
        for (&id, &delta) in id_freq_map {
            let entry = map.entry(id).or_insert(0);
            *entry = entry.saturating_add(delta);
        }
    }

    /// Accumulates `pull_request.id_freq_map` then drops any SRM id below
    /// `freq_filter_threshold` from `pull_request.srm_map`.
    pub fn filter_pull_request(&self, pull_request: &mut PullRequest) {
        self.accumulate(&pull_request.id_freq_map);
        let map = self.map.read();
        for ids in pull_request.srm_map.values_mut() {
            ids.retain(|id| map.get(id).copied().unwrap_or(0) >= self.threshold);
        }
    }

    /// Drops SRM rows keyed on ids below threshold, in place.
    pub fn filter_grad(&self, grad: &mut TensorMap) {
        let map = self.map.read();
        for (_, value) in grad.iter_mut() {
            if let Some(srm) = value.as_srm_mut() {
                let threshold = self.threshold;
                srm.remove_if(|id, _| map.get(&id).copied().unwrap_or(0) < threshold);
            }
        }
    }

    pub fn frequency(&self, id: Id) -> u32 {
        self.map.read().get(&id).copied().unwrap_or(0)
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_u32_(FREQ_STORE_VERSION)?;
        let map = self.map.read();
        os.write_container_len(map.len())?;
        for (&id, &freq) in map.iter() {
            os.write_i64_(id)?;
            os.write_u32_(freq)?;
        }
        Ok(())
    }

    pub fn read(is: &mut InStream<'_>, threshold: u32) -> Result<Self> {
        let version = is.read_u32_()?;
        if version > FREQ_STORE_VERSION {
            return Err(SerializationError::VersionTooNew {
                found: version,
                max_supported: FREQ_STORE_VERSION,
            });
        }
        let n = is.read_container_len()?;
        let mut map = HashMap::with_capacity(n);
        for _ in 0..n {
            let id = is.read_i64_()?;
            let freq = is.read_u32_()?;
            map.insert(id, freq);
        }
        Ok(FreqStore {
            map: RwLock::new(map),
            threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_drops_ids_below_threshold_but_keeps_crossed_ones() {
        let store = FreqStore::new(3);
        let mut pr = PullRequest::new(true);
        pr.add_srm_ids("emb", [1, 2]);
        pr.id_freq_map.insert(1, 5);
        pr.id_freq_map.insert(2, 1);

        store.filter_pull_request(&mut pr);
        assert!(pr.srm_map["emb"].contains(&1));
        assert!(!pr.srm_map["emb"].contains(&2));

        // A later pull request referencing id 2 sees its still-low total.
        let mut pr2 = PullRequest::new(true);
        pr2.add_srm_ids("emb", [2]);
        pr2.id_freq_map.insert(2, 1);
        store.filter_pull_request(&mut pr2);
        assert!(!pr2.srm_map.get("emb").map(|s| s.contains(&2)).unwrap_or(false));

        // id 2 crossing the threshold now stays present on every later filter.
        let mut pr3 = PullRequest::new(true);
        pr3.add_srm_ids("emb", [2]);
        pr3.id_freq_map.insert(2, 5);
        store.filter_pull_request(&mut pr3);
        assert!(pr3.srm_map["emb"].contains(&2));

        let mut pr4 = PullRequest::new(true);
        pr4.add_srm_ids("emb", [2]);
        store.filter_pull_request(&mut pr4);
        assert!(pr4.srm_map["emb"].contains(&2));
    }

    #[test]
    fn saturating_add_does_not_overflow() {
        let store = FreqStore::new(1);
        let mut map = HashMap::new();
        map.insert(1, u32::MAX);
        store.accumulate(&map);
        store.accumulate(&map);
        assert_eq!(store.frequency(1), u32::MAX);
    }
}
