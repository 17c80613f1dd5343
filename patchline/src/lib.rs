//! Incremental patcher-pipeline orchestrator.
//!
//! This crate coordinates externally-authored patcher programs that each
//! transform a shared set of versioned input files into an output artifact,
//! deciding on every run whether regeneration is needed at all. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (invalidation axes, version
//!   encoding, dependency comparison, job ordering). No I/O, fully testable
//!   in isolation.
//! - **[`io`]**: Side-effecting operations (persisted state, package
//!   discovery, catalog access, process execution). Isolated to enable
//!   scripted fakes in tests.
//!
//! Orchestration modules ([`run`], [`worker`], [`policy`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod policy;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod worker;
