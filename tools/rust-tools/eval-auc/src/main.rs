//! Reads `<label> <probability>` pairs and reports AUC, log loss, and the
//! predictive/statistical CTR gap used to sanity-check an offline eval
//! (§6 CLI surface; grounded on `src/tools/eval_auc_main.cc`).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "eval-auc")]
#[command(about = "Computes AUC/loss/CTR from a <label> <probability> file")]
struct Args {
    /// Path to a file of whitespace-separated `<label> <probability>` lines
    #[arg(long = "in")]
    input: PathBuf,
}

struct Sample {
    label: f64,
    prob: f64,
}

fn read_samples(path: &PathBuf) -> Result<Vec<Sample>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut samples = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", lineno + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let label: f64 = parts
            .next()
            .with_context(|| format!("line {}: missing label", lineno + 1))?
            .parse()
            .with_context(|| format!("line {}: bad label", lineno + 1))?;
        let prob: f64 = parts
            .next()
            .with_context(|| format!("line {}: missing probability", lineno + 1))?
            .parse()
            .with_context(|| format!("line {}: bad probability", lineno + 1))?;
        samples.push(Sample { label, prob });
    }
    if samples.is_empty() {
        bail!("no samples read from {}", path.display());
    }
    Ok(samples)
}

/// Rank-sum AUC: sort by score ascending, average tied ranks, then apply
/// the Mann-Whitney U relation `AUC = (sum_ranks(pos) - n_pos*(n_pos+1)/2)
/// / (n_pos*n_neg)`.
fn auc(samples: &[Sample]) -> Option<f64> {
    let n_pos = samples.iter().filter(|s| s.label > 0.5).count();
    let n_neg = samples.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..samples.len()).collect();
    order.sort_by(|&a, &b| samples[a].prob.total_cmp(&samples[b].prob));

    let mut ranks = vec![0.0f64; samples.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && samples[order[j + 1]].prob == samples[order[i]].prob {
            j += 1;
        }
        let avg_rank = ((i + 1) + (j + 1)) as f64 / 2.0;
        for idx in &order[i..=j] {
            ranks[*idx] = avg_rank;
        }
        i = j + 1;
    }

    let rank_sum_pos: f64 = samples
        .iter()
        .zip(ranks.iter())
        .filter(|(s, _)| s.label > 0.5)
        .map(|(_, r)| r)
        .sum();

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

fn log_loss(samples: &[Sample]) -> f64 {
    const EPS: f64 = 1e-12;
    let sum: f64 = samples
        .iter()
        .map(|s| {
            let p = s.prob.clamp(EPS, 1.0 - EPS);
            -(s.label * p.ln() + (1.0 - s.label) * (1.0 - p).ln())
        })
        .sum();
    sum / samples.len() as f64
}

fn run(args: Args) -> Result<()> {
    let samples = read_samples(&args.input)?;
    let n = samples.len() as f64;
    let predictive_ctr = samples.iter().map(|s| s.prob).sum::<f64>() / n;
    let statistical_ctr = samples.iter().map(|s| s.label).sum::<f64>() / n;
    let loss = log_loss(&samples);

    println!("count: {}", samples.len());
    match auc(&samples) {
        Some(value) => println!("auc: {value:.6}"),
        None => println!("auc: n/a (single-class input)"),
    }
    println!("loss: {loss:.6}");
    println!("predictive_ctr: {predictive_ctr:.6}");
    println!("statistical_ctr: {statistical_ctr:.6}");
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

#[cfg(test)]
mod tests {
    use super::*;

    fn s(label: f64, prob: f64) -> Sample {
        Sample { label, prob }
    }

    #[test]
    fn perfect_separation_gives_auc_one() {
        let samples = vec![s(0.0, 0.1), s(0.0, 0.2), s(1.0, 0.8), s(1.0, 0.9)];
        assert_eq!(auc(&samples), Some(1.0));
    }

    #[test]
    fn reversed_separation_gives_auc_zero() {
        let samples = vec![s(1.0, 0.1), s(1.0, 0.2), s(0.0, 0.8), s(0.0, 0.9)];
        assert_eq!(auc(&samples), Some(0.0));
    }

    #[test]
    fn single_class_has_no_auc() {
        let samples = vec![s(1.0, 0.1), s(1.0, 0.9)];
        assert_eq!(auc(&samples), None);
    }

    #[test]
    fn tied_scores_split_auc_credit() {
        let samples = vec![s(0.0, 0.5), s(1.0, 0.5)];
        assert_eq!(auc(&samples), Some(0.5));
    }

    #[test]
    fn log_loss_of_confident_correct_predictions_is_near_zero() {
        let samples = vec![s(1.0, 0.999), s(0.0, 0.001)];
        assert!(log_loss(&samples) < 0.01);
    }
}
