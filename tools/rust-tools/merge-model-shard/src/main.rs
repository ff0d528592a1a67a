//! Loads every shard of a saved model directory and merges their
//! parameters into a single shardless `TensorMap`: each dense tensor
//! lives on exactly one shard and is copied across unchanged; each
//! sparse row matrix is partitioned row-wise across shards and is
//! reassembled by merging rows back into one matrix (§6 CLI surface;
//! grounded on `src/tools/merge_model_shard_main.cc`).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use deepx_core::stream::OutStream;
use deepx_core::tensor_map::{TensorMap, TensorValue};
use deepx_model::model_store;

#[derive(Parser, Debug)]
#[command(name = "merge-model-shard")]
#[command(about = "Merges a sharded model directory into a single parameter snapshot")]
struct Args {
    /// Saved model directory (§6 on-disk layout)
    #[arg(long = "in_model")]
    in_model: PathBuf,

    /// Where to write the merged `TensorMap` stream; prints a summary to
    /// stdout instead if omitted
    #[arg(long = "out_model")]
    out_model: Option<PathBuf>,
}

fn merge(in_model: &PathBuf) -> Result<TensorMap> {
    let info = model_store::load_shard_info(in_model)?;
    let mut merged = TensorMap::new();

    for shard_id in 0..info.shard_size {
        let shard = model_store::load_shard(in_model, shard_id, info.shard_size, 0)
            .with_context(|| format!("loading shard {shard_id}"))?;
        for (name, value) in shard.model.param.iter() {
            match value {
                TensorValue::Tsr(_) => {
                    merged.insert(name, value.clone());
                }
                TensorValue::Srm(srm) => match merged.get_mut(name) {
                    Some(TensorValue::Srm(existing)) => existing.merge(srm),
                    Some(_) => anyhow::bail!("tensor {name} has mismatched types across shards"),
                    None => merged.insert(name, value.clone()),
                },
                _ => merged.insert(name, value.clone()),
            }
        }
    }
    Ok(merged)
}

fn run(args: Args) -> Result<()> {
    let merged = merge(&args.in_model)?;

    match args.out_model {
        Some(path) => {
            let mut buf = Vec::new();
            merged.write(&mut buf).context("serialising merged model")?;
            std::fs::write(&path, buf).with_context(|| format!("writing {}", path.display()))?;
            println!("wrote {} tensors to {}", merged.len(), path.display());
        }
        None => {
            println!("{} tensors merged:", merged.len());
            for (name, value) in merged.iter() {
                let kind = match value {
                    TensorValue::Tsr(_) => "tsr",
                    TensorValue::Srm(_) => "srm",
                    TensorValue::Csr(_) => "csr",
                    TensorValue::Tsri(_) => "tsri",
                    TensorValue::Tsrs(_) => "tsrs",
                };
                println!("  {name}: {kind}");
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
