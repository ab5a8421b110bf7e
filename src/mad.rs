//! MAD transport contract and the SMP client adapter.
//!
//! The transport itself (umad device handling, class-agent registration,
//! wire I/O) lives outside this crate. Discovery talks to it through
//! [`MadTransport`], and [`SmpClient`] layers retries, transaction ids and
//! counters on top of that contract.

pub mod smp;

use thiserror::Error;
use tracing::debug;

use crate::dr::DrPath;

pub const IB_MGMT_CLASS_LID_ROUTED_SMP: u8 = 0x01;
pub const IB_MGMT_CLASS_DIRECT_ROUTED_SMP: u8 = 0x81;

/// Size of the SMP attribute data field.
pub const IB_SMP_DATA_SIZE: usize = 64;

/// One raw SMP attribute block.
pub type SmpData = [u8; IB_SMP_DATA_SIZE];

/// The attributes the discovery walk fetches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SmpAttrId {
    NodeDesc,
    NodeInfo,
    SwitchInfo,
    PortInfo,
}

impl SmpAttrId {
    pub fn to_wire(self) -> u16 {
        match self {
            SmpAttrId::NodeDesc => 0x10,
            SmpAttrId::NodeInfo => 0x11,
            SmpAttrId::SwitchInfo => 0x12,
            SmpAttrId::PortInfo => 0x15,
        }
    }
}

/// Opaque protocol failure of one SMP RPC. There are no recovery semantics
/// at this layer; the walk decides whether to skip or abort.
#[derive(Debug, Error)]
pub enum MadError {
    #[error("transport has no agent for management class {0:#04x}")]
    NoClassAgent(u8),
    #[error("SMP timed out after {0} ms")]
    Timeout(u32),
    #[error("remote unreachable along {0}")]
    Unreachable(String),
    #[error("malformed SMP response: {0}")]
    Malformed(String),
}

/// Contract with the out-of-tree MAD transport.
///
/// Implementations must answer [`class_agent`] for both the LID-routed and
/// the directed-route SMP classes before discovery will run, and perform a
/// single synchronous attribute fetch in [`smp_query_via`] (any per-RPC
/// retry internal to the transport is its own business).
///
/// [`class_agent`]: MadTransport::class_agent
/// [`smp_query_via`]: MadTransport::smp_query_via
pub trait MadTransport: Send {
    /// Agent id registered for a management class, if any.
    fn class_agent(&self, mgmt_class: u8) -> Option<u8>;

    /// Fetch one attribute along a directed-route path. The modifier carries
    /// the port number for PortInfo queries and is zero otherwise.
    fn smp_query_via(
        &mut self,
        path: &DrPath,
        attr: SmpAttrId,
        modifier: u32,
        timeout_ms: u32,
        tid: u64,
    ) -> Result<SmpData, MadError>;
}

/// Counters over the lifetime of one client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MadStats {
    pub mads_sent: u64,
    pub mad_errors: u64,
    pub mad_timeouts: u64,
}

/// Issues typed SMP queries against a directed-route path.
pub struct SmpClient {
    transport: Box<dyn MadTransport>,
    pub timeout_ms: u32,
    pub retries: u32,
    tid: u64,
    pub stats: MadStats,
}

impl std::fmt::Debug for SmpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmpClient")
            .field("timeout_ms", &self.timeout_ms)
            .field("retries", &self.retries)
            .field("tid", &self.tid)
            .field("stats", &self.stats)
            .finish()
    }
}

impl SmpClient {
    /// Wrap a transport, verifying it carries active agents for both the
    /// directed-route and the LID-routed SMP class.
    pub fn new(
        transport: Box<dyn MadTransport>,
        timeout_ms: u32,
        retries: u32,
    ) -> Result<Self, MadError> {
        for class in [IB_MGMT_CLASS_LID_ROUTED_SMP, IB_MGMT_CLASS_DIRECT_ROUTED_SMP] {
            if transport.class_agent(class).is_none() {
                return Err(MadError::NoClassAgent(class));
            }
        }
        Ok(SmpClient {
            transport,
            timeout_ms,
            retries,
            tid: 0,
            stats: MadStats::default(),
        })
    }

    /// One attribute fetch, retried up to `retries` times before the last
    /// failure is surfaced.
    pub fn query(
        &mut self,
        path: &DrPath,
        attr: SmpAttrId,
        modifier: u32,
    ) -> Result<SmpData, MadError> {
        let attempts = self.retries.saturating_add(1);
        let mut last = MadError::Timeout(self.timeout_ms);
        for attempt in 0..attempts {
            self.tid = self.tid.wrapping_add(1);
            self.stats.mads_sent += 1;
            match self
                .transport
                .smp_query_via(path, attr, modifier, self.timeout_ms, self.tid)
            {
                Ok(data) => return Ok(data),
                Err(e) => {
                    if matches!(e, MadError::Timeout(_)) {
                        self.stats.mad_timeouts += 1;
                    } else {
                        self.stats.mad_errors += 1;
                    }
                    debug!(%path, ?attr, modifier, attempt, "SMP query failed: {e}");
                    last = e;
                }
            }
        }
        Err(last)
    }
}
