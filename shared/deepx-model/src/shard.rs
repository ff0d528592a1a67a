//! Routes tensor names and sparse ids to a shard index, and splits pull
//! requests/gradients/parameters across shards accordingly.
//!
//! Grounded on `ps/shard.cc`: default routing is `MurmurHash2(name) %
//! shard_size` for dense tensors and `id % shard_size` for sparse ids
//! (non-negative via `rem_euclid`, since ids may be negative hashes).

use std::collections::HashSet;

use deepx_core::srm::Id;
use deepx_core::tensor_map::{TensorMap, TensorValue};

use crate::pull_request::PullRequest;

/// Public-domain 32-bit MurmurHash2 (Austin Appleby), used verbatim so
/// routing stays compatible with any externally produced shard layout.
pub fn murmur_hash2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h: u32 = seed ^ (data.len() as u32);
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }
    let rest = chunks.remainder();
    if rest.len() >= 3 {
        h ^= (rest[2] as u32) << 16;
    }
    if rest.len() >= 2 {
        h ^= (rest[1] as u32) << 8;
    }
    if !rest.is_empty() {
        h ^= rest[0] as u32;
        h = h.wrapping_mul(M);
    }
    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

pub fn default_tsr_shard_fn(name: &str, shard_size: usize) -> usize {
    (murmur_hash2(name.as_bytes(), 0) as usize) % shard_size
}

pub fn default_srm_shard_fn(id: Id, shard_size: usize) -> usize {
    id.rem_euclid(shard_size as i64) as usize
}

/// Describes a TSR/SRM routing policy. Defaults match `ps/shard.cc`;
/// callers may plug in alternative functions (e.g. consistent hashing).
pub struct Shard {
    pub shard_id: usize,
    pub shard_size: usize,
    pub tsr_shard_fn: fn(&str, usize) -> usize,
    pub srm_shard_fn: fn(Id, usize) -> usize,
}

impl Shard {
    pub fn new(shard_id: usize, shard_size: usize) -> Self {
        Shard {
            shard_id,
            shard_size,
            tsr_shard_fn: default_tsr_shard_fn,
            srm_shard_fn: default_srm_shard_fn,
        }
    }

    pub fn tsr_shard(&self, name: &str) -> usize {
        (self.tsr_shard_fn)(name, self.shard_size)
    }

    pub fn srm_shard(&self, id: Id) -> usize {
        (self.srm_shard_fn)(id, self.shard_size)
    }

    /// Partitions a pull request into `shard_size` disjoint subrequests
    /// whose union is the original (§8 property 6): each TSR name goes to
    /// exactly one shard; each SRM name's id set is split by
    /// `srm_shard_fn`; id-frequency entries are routed identically to
    /// whichever shard owns that id's SRM row.
    pub fn split_pull_request(&self, pr: &PullRequest) -> Vec<PullRequest> {
        let mut out: Vec<PullRequest> = (0..self.shard_size).map(|_| PullRequest::new(pr.is_train)).collect();

        for name in &pr.tsr_set {
            out[(self.tsr_shard_fn)(name, self.shard_size)].add_tsr(name);
        }
        for (name, ids) in &pr.srm_map {
            for &id in ids {
                out[(self.srm_shard_fn)(id, self.shard_size)].add_srm_ids(name, [id]);
            }
        }
        for (&id, &freq) in &pr.id_freq_map {
            out[(self.srm_shard_fn)(id, self.shard_size)]
                .id_freq_map
                .insert(id, freq);
        }
        out
    }

    /// Splits a gradient TensorMap into one map per shard. TSR gradients
    /// are handed to their owning shard as zero-copy views; SRM gradients
    /// are partitioned row-wise, each contributing shard receiving a
    /// zero-copy view over the source row. The source gradient map is
    /// reset afterward (rows cleared, `col` preserved) per §4.7.
    pub fn split_grad(&self, grad: &mut TensorMap) -> Vec<TensorMap> {
        let mut out: Vec<TensorMap> = (0..self.shard_size).map(|_| TensorMap::new()).collect();

        let names: Vec<String> = grad.names().map(str::to_string).collect();
        for name in names {
            match grad.get_mut(&name).unwrap() {
                TensorValue::Tsr(t) => {
                    let shard = (self.tsr_shard_fn)(&name, self.shard_size);
                    out[shard].insert(name, TensorValue::Tsr(t.get_view()));
                }
                TensorValue::Srm(s) => {
                    let col = s.col();
                    let mut per_shard: Vec<deepx_core::srm::SparseRowMatrix> =
                        (0..self.shard_size).map(|_| deepx_core::srm::SparseRowMatrix::with_col(col)).collect();
                    let ids: Vec<Id> = s.ids().collect();
                    for id in ids {
                        let shard = (self.srm_shard_fn)(id, self.shard_size);
                        let row = s.row_arc(id).expect("id came from s.ids()");
                        per_shard[shard].assign_view(id, row);
                    }
                    for (shard, srm) in per_shard.into_iter().enumerate() {
                        if !srm.is_empty() {
                            out[shard].insert(name.clone(), TensorValue::Srm(srm));
                        }
                    }
                    s.zeros();
                }
                _ => {}
            }
        }
        out
    }

    /// Same routing as [`Self::split_grad`] but over a full parameter
    /// snapshot (no source reset).
    pub fn split_param(&self, param: &TensorMap) -> Vec<TensorMap> {
        let mut out: Vec<TensorMap> = (0..self.shard_size).map(|_| TensorMap::new()).collect();
        for (name, value) in param.iter() {
            match value {
                TensorValue::Tsr(t) => {
                    let shard = (self.tsr_shard_fn)(name, self.shard_size);
                    out[shard].insert(name.to_string(), TensorValue::Tsr(t.get_view()));
                }
                TensorValue::Srm(s) => {
                    let col = s.col();
                    let mut per_shard: Vec<deepx_core::srm::SparseRowMatrix> =
                        (0..self.shard_size).map(|_| deepx_core::srm::SparseRowMatrix::with_col(col)).collect();
                    for (id, row) in s.iter() {
                        let shard = (self.srm_shard_fn)(id, self.shard_size);
                        per_shard[shard].assign(id, row);
                    }
                    for (shard, srm) in per_shard.into_iter().enumerate() {
                        if !srm.is_empty() {
                            out[shard].insert(name.to_string(), TensorValue::Srm(srm));
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }
}

/// Union of a set of split pull requests should reconstruct the original
/// id/name sets -- used by tests exercising §8 property 6.
pub fn union_srm_ids(requests: &[PullRequest], name: &str) -> HashSet<Id> {
    requests
        .iter()
        .filter_map(|pr| pr.srm_map.get(name))
        .flatten()
        .copied()
        .collect()
}
