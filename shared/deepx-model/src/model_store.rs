//! On-disk model directory layout (§6): `graph.bin`, one
//! `model_shard_N.bin`/`optimizer_shard_N.bin`/`ts_store_shard_N.bin`/
//! `freq_store_shard_N.bin` quartet per shard, `shard_info.bin`, and an
//! empty `SUCCESS_shard_N` marker written only once every other file for
//! that shard has landed.
//!
//! Grounded on `ps/model_shard.cc`'s `Save`/`Load`: every `.bin` file is a
//! versioned stream (the same `OutStream`/`InStream` contract as
//! everything else); an existing file is renamed to `<file>.<timestamp>`
//! before being overwritten rather than truncated in place.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use deepx_core::stream::{InStream, OutStream};
use deepx_core::tensor_map::TensorMap;

use crate::graph::Graph;
use crate::model::Model;
use crate::model_shard::ModelShard;
use crate::shard::Shard;

pub const SHARD_INFO_VERSION: u32 = 0;

pub struct ShardInfo {
    pub shard_size: usize,
}

impl ShardInfo {
    pub fn write(&self, os: &mut dyn OutStream) -> deepx_core::stream::Result<()> {
        os.write_u32_(SHARD_INFO_VERSION)?;
        os.write_u32_(self.shard_size as u32)
    }

    pub fn read(is: &mut InStream<'_>) -> deepx_core::stream::Result<Self> {
        let version = is.read_u32_()?;
        if version > SHARD_INFO_VERSION {
            return Err(deepx_core::error::SerializationError::VersionTooNew {
                found: version,
                max_supported: SHARD_INFO_VERSION,
            });
        }
        Ok(ShardInfo { shard_size: is.read_u32_()? as usize })
    }
}

fn graph_path(dir: &Path) -> PathBuf {
    dir.join("graph.bin")
}
fn shard_info_path(dir: &Path) -> PathBuf {
    dir.join("shard_info.bin")
}
fn model_shard_path(dir: &Path, shard_id: usize) -> PathBuf {
    dir.join(format!("model_shard_{shard_id}.bin"))
}
fn optimizer_shard_path(dir: &Path, shard_id: usize) -> PathBuf {
    dir.join(format!("optimizer_shard_{shard_id}.bin"))
}
fn ts_store_shard_path(dir: &Path, shard_id: usize) -> PathBuf {
    dir.join(format!("ts_store_shard_{shard_id}.bin"))
}
fn freq_store_shard_path(dir: &Path, shard_id: usize) -> PathBuf {
    dir.join(format!("freq_store_shard_{shard_id}.bin"))
}
fn success_marker_path(dir: &Path, shard_id: usize) -> PathBuf {
    dir.join(format!("SUCCESS_shard_{shard_id}"))
}

/// Writes `path`, first renaming any existing file at that path to
/// `<file>.<timestamp>` (§6's backup-on-overwrite rule).
fn backup_and_write(path: &Path, write: impl FnOnce(&mut dyn OutStream) -> deepx_core::stream::Result<()>) -> Result<()> {
    if path.exists() {
        let ts = chrono::Utc::now().timestamp();
        let file_name = path
            .file_name()
            .context("model store path has no file name")?
            .to_string_lossy()
            .into_owned();
        let backup = path.with_file_name(format!("{file_name}.{ts}"));
        fs::rename(path, &backup).with_context(|| format!("backing up {}", path.display()))?;
    }
    let mut buf = Vec::new();
    write(&mut buf).with_context(|| format!("serialising {}", path.display()))?;
    fs::write(path, buf).with_context(|| format!("writing {}", path.display()))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Persists `graph.bin` and `shard_info.bin` at the directory root.
pub fn save_graph_and_info(dir: &Path, graph: &Graph, shard_size: usize) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    backup_and_write(&graph_path(dir), |os| graph.write(os))?;
    backup_and_write(&shard_info_path(dir), |os| ShardInfo { shard_size }.write(os))?;
    Ok(())
}

pub fn load_graph(dir: &Path) -> Result<Graph> {
    let bytes = read_file(&graph_path(dir))?;
    let mut is = InStream::new(&bytes);
    Graph::read(&mut is).with_context(|| format!("parsing {}", graph_path(dir).display()))
}

pub fn load_shard_info(dir: &Path) -> Result<ShardInfo> {
    let bytes = read_file(&shard_info_path(dir))?;
    let mut is = InStream::new(&bytes);
    ShardInfo::read(&mut is).with_context(|| format!("parsing {}", shard_info_path(dir).display()))
}

/// Writes one shard's four files, then its success marker. The marker is
/// written last so a reader never observes a `SUCCESS_shard_N` for a shard
/// whose other files are still mid-write.
pub fn save_shard(dir: &Path, shard_id: usize, shard: &ModelShard) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    backup_and_write(&model_shard_path(dir, shard_id), |os| shard.model.param.write(os))?;
    backup_and_write(&optimizer_shard_path(dir, shard_id), |os| shard.model.write_optimizer(os))?;
    backup_and_write(&ts_store_shard_path(dir, shard_id), |os| shard.ts_store.write(os))?;
    backup_and_write(&freq_store_shard_path(dir, shard_id), |os| shard.freq_store.write(os))?;
    fs::write(success_marker_path(dir, shard_id), []).context("writing SUCCESS marker")?;
    Ok(())
}

/// Loads one shard's four files back into a fresh [`ModelShard`]. The
/// optimiser's concrete type comes from whatever class name
/// `optimizer_shard_N.bin` was written with, not from `freq_filter_threshold`
/// or any other caller-supplied config -- that's the point of
/// [`crate::optimizer::read_dyn`].
pub fn load_shard(dir: &Path, shard_id: usize, shard_size: usize, freq_filter_threshold: u32) -> Result<ModelShard> {
    let param_bytes = read_file(&model_shard_path(dir, shard_id))?;
    let param = TensorMap::read(&mut InStream::new(&param_bytes))
        .with_context(|| format!("parsing {}", model_shard_path(dir, shard_id).display()))?;

    let optimizer_bytes = read_file(&optimizer_shard_path(dir, shard_id))?;
    let optimizer = crate::optimizer::read_dyn(&mut InStream::new(&optimizer_bytes))
        .with_context(|| format!("parsing {}", optimizer_shard_path(dir, shard_id).display()))?;

    let ts_bytes = read_file(&ts_store_shard_path(dir, shard_id))?;
    let ts_store = crate::ts_store::TsStore::read(&mut InStream::new(&ts_bytes))
        .with_context(|| format!("parsing {}", ts_store_shard_path(dir, shard_id).display()))?;

    let freq_bytes = read_file(&freq_store_shard_path(dir, shard_id))?;
    let freq_store = crate::freq_store::FreqStore::read(&mut InStream::new(&freq_bytes), freq_filter_threshold)
        .with_context(|| format!("parsing {}", freq_store_shard_path(dir, shard_id).display()))?;

    let mut model = Model::new(optimizer);
    model.param = param;

    Ok(ModelShard {
        shard: Shard::new(shard_id, shard_size),
        model,
        ts_store,
        freq_store,
    })
}
