//! The description, built from an operator chain's forward pass, of which
//! parameters a worker needs pulled before its next forward pass.

use std::collections::{HashMap, HashSet};

use deepx_core::stream::{InStream, OutStream, Result};
use indexmap::{IndexMap, IndexSet};

#[derive(Clone, Default)]
pub struct PullRequest {
    pub is_train: bool,
    pub tsr_set: IndexSet<String>,
    pub srm_map: IndexMap<String, HashSet<i64>>,
    pub id_freq_map: HashMap<i64, u32>,
}

impl PullRequest {
    pub fn new(is_train: bool) -> Self {
        PullRequest {
            is_train,
            ..Default::default()
        }
    }

    pub fn clear(&mut self) {
        self.tsr_set.clear();
        self.srm_map.clear();
        self.id_freq_map.clear();
    }

    pub fn add_tsr(&mut self, name: &str) {
        self.tsr_set.insert(name.to_string());
    }

    pub fn add_srm_ids(&mut self, name: &str, ids: impl IntoIterator<Item = i64>) {
        self.srm_map.entry(name.to_string()).or_default().extend(ids);
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_u8_(self.is_train as u8)?;
        os.write_container_len(self.tsr_set.len())?;
        for name in &self.tsr_set {
            os.write_str_(name)?;
        }
        os.write_container_len(self.srm_map.len())?;
        for (name, ids) in &self.srm_map {
            os.write_str_(name)?;
            os.write_container_len(ids.len())?;
            for &id in ids {
                os.write_i64_(id)?;
            }
        }
        os.write_container_len(self.id_freq_map.len())?;
        for (&id, &freq) in &self.id_freq_map {
            os.write_i64_(id)?;
            os.write_u32_(freq)?;
        }
        Ok(())
    }

    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        let is_train = is.read_u8_()? != 0;
        let n_tsr = is.read_container_len()?;
        let mut tsr_set = IndexSet::with_capacity(n_tsr);
        for _ in 0..n_tsr {
            tsr_set.insert(is.read_string()?);
        }
        let n_srm = is.read_container_len()?;
        let mut srm_map = IndexMap::with_capacity(n_srm);
        for _ in 0..n_srm {
            let name = is.read_string()?;
            let n_ids = is.read_container_len()?;
            let mut ids = HashSet::with_capacity(n_ids);
            for _ in 0..n_ids {
                ids.insert(is.read_i64_()?);
            }
            srm_map.insert(name, ids);
        }
        let n_freq = is.read_container_len()?;
        let mut id_freq_map = HashMap::with_capacity(n_freq);
        for _ in 0..n_freq {
            let id = is.read_i64_()?;
            let freq = is.read_u32_()?;
            id_freq_map.insert(id, freq);
        }
        Ok(PullRequest {
            is_train,
            tsr_set,
            srm_map,
            id_freq_map,
        })
    }
}
