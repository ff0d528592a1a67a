//! Filesystem diagnostics used to sanity-check a training node's storage
//! before a run: read back a file as text, probe that a path is writable,
//! and list a directory (optionally recursively) (§6 CLI surface;
//! grounded on `src/tools/fs_tool_main.cc`).

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "fs-tool")]
#[command(about = "Filesystem diagnostics")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a file's contents as UTF-8 text
    Text { path: PathBuf },
    /// Write a small marker file under `path` then remove it
    Testwr { path: PathBuf },
    /// List a directory's immediate entries
    Ls { path: PathBuf },
    /// List a directory's entries recursively
    Lsr { path: PathBuf },
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Text { path } => {
            let contents = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            print!("{contents}");
        }
        Command::Testwr { path } => {
            let marker = path.join(".fs_tool_testwr");
            let mut file =
                fs::File::create(&marker).with_context(|| format!("creating {}", marker.display()))?;
            file.write_all(b"ok").context("writing marker contents")?;
            drop(file);
            fs::remove_file(&marker).with_context(|| format!("removing {}", marker.display()))?;
            println!("{} is writable", path.display());
        }
        Command::Ls { path } => {
            let mut entries: Vec<_> = fs::read_dir(&path)
                .with_context(|| format!("reading directory {}", path.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            entries.sort();
            for entry in entries {
                println!("{entry}");
            }
        }
        Command::Lsr { path } => {
            let mut entries: Vec<_> = WalkDir::new(&path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path() != path)
                .map(|e| e.path().to_string_lossy().into_owned())
                .collect();
            entries.sort();
            for entry in entries {
                println!("{entry}");
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    match run(args.command) {
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

    #[test]
    fn testwr_leaves_no_marker_behind() {
        let tmp = tempfile::tempdir().unwrap();
        run(Command::Testwr { path: tmp.path().to_path_buf() }).unwrap();
        assert!(!tmp.path().join(".fs_tool_testwr").exists());
    }

    #[test]
    fn ls_lists_immediate_entries_only() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), "hi").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub").join("b.txt"), "hi").unwrap();

        let mut entries: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["a.txt".to_string(), "sub".to_string()]);
    }

    #[test]
    fn lsr_recurses_into_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub").join("b.txt"), "hi").unwrap();

        let entries: Vec<_> = WalkDir::new(tmp.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path() != tmp.path())
            .map(|e| e.path().to_path_buf())
            .collect();
        assert!(entries.contains(&tmp.path().join("sub")));
        assert!(entries.contains(&tmp.path().join("sub").join("b.txt")));
    }
}
