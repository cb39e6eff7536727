//! Trellis: shared-directory coordination for collaborative proofs.
//!
//! Many independent agent processes, provers and verifiers, build one
//! hierarchical proof at the same time. There is no server; the only shared
//! thing is a directory.
//!
//! # Architecture
//!
//! - **Ledger** (`core::ledger`): append-only, totally ordered event files.
//!   It is the single source of truth.
//! - **Replay** (`proof::replay`): a deterministic fold of the ledger into a
//!   `State`. Any process can rebuild the full view at any time.
//! - **Lifecycle** (`proof::node`, `proof::state`): every node has a workflow,
//!   an epistemic and a derived taint state; replay rejects illegal moves.
//! - **Leases** (`proof::lease`): claims expire lazily; no daemon reaps them.
//! - **Scopes** (`proof::scope`): nested local assumptions and their discharge.
//! - **Taint** (`proof::taint`): admission without proof flows to everything
//!   resting on the admitted node.
//! - **Facade** (`proof::service`): the only write path. Check, append one
//!   event, fold.
//!
//! # Example
//!
//! ```no_run
//! use trellis::proof::node::{InferenceType, NodeId};
//! use trellis::proof::service::{ChildSpec, ProofService};
//!
//! # fn main() -> Result<(), trellis::core::error::TrellisError> {
//! let svc = ProofService::open("./proof")?;
//! svc.init("There are infinitely many primes", "alice")?;
//! svc.claim(&NodeId::root(), "prover-1", None)?;
//! let step = svc.refine(
//!     &NodeId::root(),
//!     "prover-1",
//!     ChildSpec::claim("Assume finitely many primes p1..pn", InferenceType::Contradiction),
//! )?;
//! svc.release(&NodeId::root(), "prover-1")?;
//! println!("created {}", step);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod core;
pub mod proof;
