//! Dependence verification and race detection for recorded task-runtime
//! traces.
//!
//! A task-based runtime decides, for every pair of operations launched in
//! the same task, whether the later one must wait for the earlier one. This
//! crate re-derives those decisions from a recorded trace and checks them
//! against what the runtime actually enforced:
//! - The logical check recomputes the dependences every task's children
//!   need from their region requirements and compares them with the
//!   dependences the runtime claimed. Missing ones are errors, superfluous
//!   ones warnings.
//! - The data-flow check follows every claimed true dependence backwards
//!   through the event graph, across copies, to the producer's instance.
//! - The race check proves that every two conflicting accesses to one
//!   instance field are ordered by the event graph.
//!
//! Key modules:
//! - `state`: `TraceState`, the ingestion facade with one record call per
//!   trace fact.
//! - `region_tree`: index spaces, partitions, field spaces and region trees;
//!   answers aliasing queries.
//! - `dependence`: the privilege and coherence algebra.
//! - `operation`: operations, their requirements and logical dependences.
//! - `event`: the event graph and its generation-stamped traversal.
//! - `verifier`: the three checks.
//!
//! Quick start:
//! 1. Feed every trace fact to a `TraceState`, in trace order.
//! 2. Build a `Verifier` over the state with a `VerifierConfig`.
//! 3. Run `check_logical`, `check_data_flow` and
//!    `check_instance_dependences`, or `check_all`, and inspect the reports.

/// Verifier configuration.
///
/// Holds `VerifierConfig` and the `FencePolicy` choosing whether fences
/// take part in the logical dependence diff.
pub mod config;
/// The privilege and coherence dependence algebra.
pub mod dependence;
/// Typed errors returned by record calls.
pub mod error;
/// The event graph: events, operation start and terminate points, copies.
///
/// Contains the generation-stamped traversal engine, the visitor interface
/// it drives and connected-component extraction.
pub mod event;
/// Physical and reduction instances with per-field user tables.
pub mod instance;
/// Processors, memories and their affinities.
pub mod machine;
/// Operations, logical dependences and the claimed-versus-required diff.
pub mod operation;
/// Index spaces, partitions, field spaces and region trees.
///
/// Region-tree nodes live in one arena keyed by index node and tree id;
/// aliasing is decided on the index tree.
pub mod region_tree;
/// Region requirements: what an operation accesses and how.
pub mod requirement;
/// The ingestion facade.
pub mod state;
mod sync;
/// Identifiers and collection aliases used across the crate.
pub mod types;
mod utils;
/// The three batch checks and their reports.
pub mod verifier;
