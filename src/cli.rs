//! Operator command line.
//!
//! Agents talk to the library. This binary covers the chores an operator
//! runs by hand against a proof directory; every command prints one JSON
//! envelope (or JSON lines for `log`).

use crate::core::error::TrellisError;
use crate::proof::service::ProofService;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "trellis",
    version = env!("CARGO_PKG_VERSION"),
    about = "Inspect and maintain a shared proof directory."
)]
pub struct Cli {
    /// Proof directory (defaults to the current directory).
    #[clap(long, short = 'd', global = true, default_value = ".")]
    pub dir: PathBuf,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new proof with the given conjecture as node 1
    Init {
        #[clap(long)]
        conjecture: String,
        #[clap(long, default_value = "operator")]
        author: String,
    },
    /// Node counts by workflow, epistemic and taint state
    Status,
    /// Strict replay with content-hash verification
    Verify,
    /// Print every event as one JSON line
    Log {
        /// Only events after this seq
        #[clap(long, default_value_t = 0)]
        after: u64,
    },
    /// Discard projection snapshots and write a fresh one
    RebuildSnapshot,
}

fn envelope(cmd: &str, data: serde_json::Value) -> serde_json::Value {
    json!({
        "cmd": cmd,
        "status": "ok",
        "ts": chrono::Utc::now().to_rfc3339(),
        "data": data,
    })
}

fn print(value: &serde_json::Value) -> Result<(), TrellisError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn run(cli: Cli) -> Result<(), TrellisError> {
    let service = ProofService::open(&cli.dir)?;

    match cli.command {
        Command::Init { conjecture, author } => {
            service.init(&conjecture, &author)?;
            print(&envelope(
                "init",
                json!({
                    "root": service.store().root().display().to_string(),
                    "conjecture": conjecture,
                }),
            ))
        }
        Command::Status => {
            let status = service.status()?;
            print(&envelope("status", serde_json::to_value(status)?))
        }
        Command::Verify => {
            let state = service.verify()?;
            print(&envelope(
                "verify",
                json!({ "verified": true, "last_seq": state.last_seq, "nodes": state.nodes.len() }),
            ))
        }
        Command::Log { after } => {
            for event in service.events()?.into_iter().filter(|e| e.seq > after) {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
        Command::RebuildSnapshot => {
            let seq = service.rebuild_snapshot()?;
            print(&envelope("rebuild-snapshot", json!({ "seq": seq })))
        }
    }
}
