//! Online-learning delta tracking: which sparse rows have drifted enough
//! from a snapshot (by update count or by embedding distance) to be worth
//! pushing out-of-band.
//!
//! Grounded on `ps/ol_store.h`/`.cc`: `Update(param)` increments a
//! per-name, per-id update counter for every SRM row present in `param`;
//! `Collect()` returns every id whose counter exceeds `update_threshold`
//! OR whose current row has drifted from its last-collected snapshot by
//! more than `distance_threshold` (L2). Collected ids have their snapshot
//! row refreshed and their counter reset to 0 (the collected set is
//! "removed from the pending set" by no longer satisfying either
//! condition until it drifts or updates again).

use std::collections::{HashMap, HashSet};

use deepx_core::error::SerializationError;
use deepx_core::srm::{Id, SparseRowMatrix};
use deepx_core::stream::{InStream, OutStream, Result};
use deepx_core::tensor_map::TensorMap;

pub const OL_STORE_VERSION: u32 = 0;

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

pub struct OlStore {
    update_threshold: u32,
    distance_threshold: f32,
    counts: HashMap<String, HashMap<Id, u32>>,
    snapshot: TensorMap,
}

impl OlStore {
    pub fn new(update_threshold: u32, distance_threshold: f32) -> Self {
        OlStore {
            update_threshold,
            distance_threshold,
            counts: HashMap::new(),
            snapshot: TensorMap::new(),
        }
    }

    /// Increments the update counter for every SRM row present in `param`.
    pub fn update(&mut self, param: &TensorMap) {
        for (name, value) in param.iter() {
            let Some(srm) = value.as_srm() else { continue };
            let entry = self.counts.entry(name.to_string()).or_default();
            for id in srm.ids() {
                *entry.entry(id).or_insert(0) += 1;
            }
        }
    }

    /// Returns every `(name, id)` pair ready to be collected, refreshing
    /// each collected id's snapshot row and resetting its counter.
    pub fn collect(&mut self, param: &TensorMap) -> HashSet<(String, Id)> {
        let mut collected = HashSet::new();
        let names: Vec<String> = self.counts.keys().cloned().collect();
        for name in names {
            let Some(current) = param.get_srm(&name) else {
                continue;
            };
            let mut snap = self
                .snapshot
                .get_srm(&name)
                .cloned()
                .unwrap_or_else(|| SparseRowMatrix::with_col(current.col()));

            let ids: Vec<Id> = self.counts[&name].keys().copied().collect();
            let mut name_collected = Vec::new();
            for id in ids {
                let count = self.counts[&name][&id];
                let drifted = match (current.get_row_no_init(id), snap.get_row_no_init(id)) {
                    (Some(cur), Some(base)) => l2_distance(cur, base) > self.distance_threshold,
                    (Some(_), None) => true,
                    _ => false,
                };
                if count > self.update_threshold || drifted {
                    name_collected.push(id);
                }
            }

            if name_collected.is_empty() {
                continue;
            }
            let counts = self.counts.get_mut(&name).unwrap();
            for id in name_collected {
                if let Some(row) = current.get_row_no_init(id) {
                    snap.assign(id, row);
                }
                counts.remove(&id);
                collected.insert((name.clone(), id));
            }
            self.snapshot.insert(name.clone(), deepx_core::tensor_map::TensorValue::Srm(snap));
        }
        collected
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_u32_(OL_STORE_VERSION)?;
        os.write_container_len(self.counts.len())?;
        for (name, ids) in &self.counts {
            os.write_str_(name)?;
            os.write_container_len(ids.len())?;
            for (&id, &count) in ids {
                os.write_i64_(id)?;
                os.write_u32_(count)?;
            }
        }
        self.snapshot.write(os)
    }

    pub fn read(is: &mut InStream<'_>, update_threshold: u32, distance_threshold: f32) -> Result<Self> {
        let version = is.read_u32_()?;
        if version > OL_STORE_VERSION {
            return Err(SerializationError::VersionTooNew {
                found: version,
                max_supported: OL_STORE_VERSION,
            });
        }
        let n_names = is.read_container_len()?;
        let mut counts = HashMap::with_capacity(n_names);
        for _ in 0..n_names {
            let name = is.read_string()?;
            let n_ids = is.read_container_len()?;
            let mut ids = HashMap::with_capacity(n_ids);
            for _ in 0..n_ids {
                let id = is.read_i64_()?;
                let count = is.read_u32_()?;
                ids.insert(id, count);
            }
            counts.insert(name, ids);
        }
        let snapshot = TensorMap::read(is)?;
        Ok(OlStore {
            update_threshold,
            distance_threshold,
            counts,
            snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepx_core::tensor_map::TensorValue;

    #[test]
    fn collect_returns_ids_past_update_threshold() {
        let mut store = OlStore::new(2, 1000.0);
        let mut param = TensorMap::new();
        let mut srm = SparseRowMatrix::new();
        srm.assign(1, &[1.0, 2.0]);
        param.insert("emb", TensorValue::Srm(srm));

        store.update(&param);
        store.update(&param);
        store.update(&param);
        let collected = store.collect(&param);
        assert!(collected.contains(&("emb".to_string(), 1)));
    }

    #[test]
    fn collect_returns_ids_past_distance_threshold() {
        let mut store = OlStore::new(1000, 0.5);
        let mut param = TensorMap::new();
        let mut srm = SparseRowMatrix::new();
        srm.assign(1, &[0.0, 0.0]);
        param.insert("emb", TensorValue::Srm(srm));
        store.update(&param);
        // first collect establishes the snapshot baseline
        let _ = store.collect(&param);

        let mut moved = TensorMap::new();
        let mut srm2 = SparseRowMatrix::new();
        srm2.assign(1, &[10.0, 10.0]);
        moved.insert("emb", TensorValue::Srm(srm2));
        store.update(&moved);
        let collected = store.collect(&moved);
        assert!(collected.contains(&("emb".to_string(), 1)));
    }
}
