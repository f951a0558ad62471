//! Path- and value-sensitive nullness dataflow.
//!
//! The lattice tracks whether each frame slot is definitely null,
//! definitely not null, or null on some subset of paths, with enough
//! provenance (null checks seen, dereferences survived, exception paths
//! taken) to rank the findings derived from it.

pub(crate) mod analysis;
pub(crate) mod decision;
pub(crate) mod finder;
pub(crate) mod frame;
pub(crate) mod lattice;
pub(crate) mod transfer;
