//! Per-id freshness timestamps over sparse parameters.
//!
//! Grounded on `ps/ts_store.h`/`.cc`: `Update` stamps every id referenced
//! in any SRM gradient with the current unix time; `Expire` sweeps and
//! returns ids whose stamp predates `now - expire_threshold`. Guarded by a
//! single mutex (§4.9's "TSStore has a mutex on its id->ts map"), modelled
//! here with `parking_lot::Mutex` around the map, matching the rest of the
//! workspace's locking style.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use deepx_core::error::SerializationError;
use deepx_core::srm::Id;
use deepx_core::stream::{InStream, OutStream, Result};
use deepx_core::tensor_map::TensorMap;

pub const TS_STORE_VERSION: u32 = 0;

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct TsStore {
    map: Mutex<HashMap<Id, u64>>,
}

impl Default for TsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TsStore {
    pub fn new() -> Self {
        TsStore {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Stamps every id referenced by an SRM entry in `grad` with `now`.
    pub fn update(&self, grad: &TensorMap, now: u64) {
        let mut map = self.map.lock();
        for (_, value) in grad.iter() {
            if let Some(srm) = value.as_srm() {
                for id in srm.ids() {
                    map.insert(id, now);
                }
            }
        }
    }

    /// Removes and returns every id whose stamp is older than
    /// `now - expire_threshold`.
    pub fn expire(&self, now: u64, expire_threshold: u64) -> HashSet<Id> {
        let cutoff = now.saturating_sub(expire_threshold);
        let mut map = self.map.lock();
        let expired: Vec<Id> = map
            .iter()
            .filter(|&(_, &ts)| ts < cutoff)
            .map(|(&id, _)| id)
            .collect();
        for id in &expired {
            map.remove(id);
        }
        expired.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_u32_(TS_STORE_VERSION)?;
        let map = self.map.lock();
        os.write_container_len(map.len())?;
        for (&id, &ts) in map.iter() {
            os.write_i64_(id)?;
            os.write_u64_(ts)?;
        }
        Ok(())
    }

    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        let version = is.read_u32_()?;
        if version > TS_STORE_VERSION {
            return Err(SerializationError::VersionTooNew {
                found: version,
                max_supported: TS_STORE_VERSION,
            });
        }
        let n = is.read_container_len()?;
        let mut map = HashMap::with_capacity(n);
        for _ in 0..n {
            let id = is.read_i64_()?;
            let ts = is.read_u64_()?;
            map.insert(id, ts);
        }
        Ok(TsStore { map: Mutex::new(map) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepx_core::srm::SparseRowMatrix;
    use deepx_core::stream::to_bytes;
    use deepx_core::tensor_map::TensorValue;

    #[test]
    fn update_then_expire_returns_stale_ids() {
        let store = TsStore::new();
        let mut grad = TensorMap::new();
        let mut srm = SparseRowMatrix::new();
        srm.assign(1, &[1.0]);
        srm.assign(2, &[1.0]);
        grad.insert("emb", TensorValue::Srm(srm));

        store.update(&grad, 100);
        let expired = store.expire(200, 50);
        assert_eq!(expired, [1, 2].into_iter().collect());
        assert!(store.is_empty());
    }

    #[test]
    fn expire_keeps_recent_ids() {
        let store = TsStore::new();
        let mut grad = TensorMap::new();
        let mut srm = SparseRowMatrix::new();
        srm.assign(1, &[1.0]);
        grad.insert("emb", TensorValue::Srm(srm));
        store.update(&grad, 190);
        assert!(store.expire(200, 50).is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn write_then_read_round_trips() {
        let store = TsStore::new();
        let mut grad = TensorMap::new();
        let mut srm = SparseRowMatrix::new();
        srm.assign(5, &[1.0]);
        grad.insert("emb", TensorValue::Srm(srm));
        store.update(&grad, 42);

        let bytes = to_bytes(|os| store.write(os));
        let mut is = InStream::new(&bytes);
        let back = TsStore::read(&mut is).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.expire(42, 0).len(), 0);
        assert_eq!(back.expire(100, 10), [5].into_iter().collect());
    }
}
