//! InfiniBand fabric discovery over directed-route SMPs.
//!
//! Starting from a local (or caller-supplied) port, [`Fabric::discover`]
//! walks the fabric breadth-first over switch hops, issuing Subnet Management
//! Packets along directed-route paths and assembling a typed graph of nodes
//! (HCAs, switches, routers), their ports, and the links between them.
//!
//! The resulting [`Fabric`] is queryable by node GUID or by directed-route
//! string, iterable globally or per node kind, and supports refreshing a
//! single node's attributes in place with [`Fabric::update_node`].
//!
//! The MAD transport itself is out of tree: callers hand in anything that
//! implements [`mad::MadTransport`]. The [`sim`] module provides an
//! in-memory fabric simulation of that contract for tests.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

pub mod chassis;
pub mod config;
pub mod discovery;
pub mod dr;
pub mod enums;
pub mod fabric;
pub mod mad;
pub mod node;
pub mod sim;

pub use config::DiscoverConfig;
pub use discovery::DiscoveryError;
pub use dr::DrPath;
pub use enums::IbNodeType;
pub use fabric::Fabric;
pub use node::{Node, NodeRef, Port, PortRef};

/// Bound on directed-route depth, and the number of distance buckets a
/// fabric keeps. Non-switch nodes are bucketed at `MAXHOPS` itself.
pub const MAXHOPS: usize = 63;

static DEBUG_LEVEL: AtomicU8 = AtomicU8::new(0);
static SHOW_PROGRESS: AtomicBool = AtomicBool::new(false);

/// Raise or clear the diagnostic verbosity of the discovery walk.
///
/// Level 0 silences the per-probe dumps; higher levels enable them. This
/// only gates extra `tracing` output, never semantics.
pub fn set_debug(level: u8) {
    DEBUG_LEVEL.store(level, Ordering::Relaxed);
}

/// Toggle progress reporting of endnodes as they are reached.
pub fn set_progress(on: bool) {
    SHOW_PROGRESS.store(on, Ordering::Relaxed);
}

pub(crate) fn debug_enabled() -> bool {
    DEBUG_LEVEL.load(Ordering::Relaxed) > 0
}

pub(crate) fn progress_enabled() -> bool {
    SHOW_PROGRESS.load(Ordering::Relaxed)
}
