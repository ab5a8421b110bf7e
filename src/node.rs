//! Node and port records, and the peer linker.
//!
//! The fabric owns its nodes, each node owns its ports, and everything that
//! points back up or across (a port's parent, a port's peer) is a weak
//! reference, so dropping the fabric releases the whole graph.

use std::sync::{Arc, RwLock, Weak};

use tracing::debug;

use crate::dr::DrPath;
use crate::enums::{IbNodeType, IbPortLinkLayerState, IbPortPhyState};
use crate::mad::smp::{NodeInfo, PortInfo, SwitchInfo};

pub type NodeRef = Arc<RwLock<Node>>;
pub type PortRef = Arc<RwLock<Port>>;

/// One IB endpoint: HCA, switch or router.
#[derive(Debug)]
pub struct Node {
    pub guid: u64,
    pub node_type: IbNodeType,
    pub nports: u8,
    /// Raw NodeInfo block as last fetched.
    pub info: NodeInfo,
    pub description: String,
    /// Raw SwitchInfo block; switches only, and only when the query worked.
    pub switch_info: Option<SwitchInfo>,
    /// Switch management LID and LMC, reported through port 0.
    pub smalid: u16,
    pub smalmc: u8,
    /// Enhanced port 0 capability.
    pub smaenhsp0: bool,
    /// Switch hops from the discovery root.
    pub dist: usize,
    /// Directed route this node was first reached by.
    pub path: DrPath,
    /// Port table indexed by physical port number. Sized nports+1 on first
    /// insertion; empty until then.
    pub ports: Vec<Option<PortRef>>,
}

impl Node {
    pub fn is_switch(&self) -> bool {
        self.node_type == IbNodeType::Switch
    }

    pub fn port(&self, portnum: u8) -> Option<PortRef> {
        self.ports.get(portnum as usize).and_then(|slot| slot.clone())
    }
}

/// One physical port of a node.
#[derive(Debug)]
pub struct Port {
    pub number: u8,
    /// HCA/router ports carry their own GUID; every port of a switch shares
    /// the node's port-0 GUID.
    pub guid: u64,
    /// Raw PortInfo block as last fetched.
    pub info: PortInfo,
    pub base_lid: u16,
    pub lmc: u8,
    pub link_state: IbPortLinkLayerState,
    pub phys_state: IbPortPhyState,
    pub link_width_active: u8,
    pub link_speed_active: u8,
    /// External port label, assigned by chassis grouping.
    pub ext_portnum: u8,
    pub remote_port: Option<Weak<RwLock<Port>>>,
    pub parent: Weak<RwLock<Node>>,
}

impl Port {
    /// Build a port from a freshly fetched PortInfo block.
    pub fn from_info(number: u8, info: PortInfo) -> Self {
        let mut port = Port {
            number,
            guid: 0,
            info,
            base_lid: 0,
            lmc: 0,
            link_state: IbPortLinkLayerState::Down,
            phys_state: IbPortPhyState::Unknown,
            link_width_active: 0,
            link_speed_active: 0,
            ext_portnum: 0,
            remote_port: None,
            parent: Weak::new(),
        };
        port.decode_info();
        port
    }

    /// Re-decode the scalar fields from the raw PortInfo block.
    pub fn decode_info(&mut self) {
        self.base_lid = self.info.lid();
        self.lmc = self.info.lmc();
        self.link_state = IbPortLinkLayerState::from_wire(self.info.port_state());
        self.phys_state = IbPortPhyState::from_wire(self.info.phys_state());
        self.link_width_active = self.info.link_width_active();
        self.link_speed_active = self.info.link_speed_active();
    }

    pub fn remote(&self) -> Option<PortRef> {
        self.remote_port.as_ref().and_then(|weak| weak.upgrade())
    }

    pub fn node(&self) -> Option<NodeRef> {
        self.parent.upgrade()
    }
}

/// Symmetric peer linkage. A prior peer on either side has its back-link
/// severed first, so re-walking a link keeps the graph consistent.
pub fn link_ports(local: &PortRef, remote: &PortRef) {
    if let (Ok(a), Ok(b)) = (local.read(), remote.read()) {
        debug!(
            "linking {:#018x}:{} and {:#018x}:{}",
            a.guid, a.number, b.guid, b.number
        );
    }
    for side in [local, remote] {
        let prior = side.read().ok().and_then(|p| p.remote());
        if let Some(prior) = prior {
            if let Ok(mut prior) = prior.write() {
                prior.remote_port = None;
            }
        }
    }
    if let Ok(mut p) = local.write() {
        p.remote_port = Some(Arc::downgrade(remote));
    }
    if let Ok(mut p) = remote.write() {
        p.remote_port = Some(Arc::downgrade(local));
    }
}
