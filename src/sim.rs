//! In-memory fabric simulation of the MAD transport contract.
//!
//! `SimFabric` answers SMP queries by walking its own topology along the
//! directed-route path, the way a real fabric would, and synthesizes the
//! attribute blocks from per-node state. Handles are cloneable, so a test
//! can keep one and mutate the simulated fabric after discovery has taken
//! the transport. Per-query failure injection covers the flaky-port cases.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::dr::DrPath;
use crate::enums::{IbNodeType, IbPortLinkLayerState, IbPortPhyState};
use crate::mad::smp::{NodeInfo, PortInfo, SwitchInfo, node_desc_from_str};
use crate::mad::{
    IB_MGMT_CLASS_DIRECT_ROUTED_SMP, IB_MGMT_CLASS_LID_ROUTED_SMP, MadError, MadTransport,
    SmpAttrId, SmpData,
};

#[derive(Clone, Debug)]
pub struct SimPort {
    pub guid: u64,
    pub lid: u16,
    pub lmc: u8,
    pub state: IbPortLinkLayerState,
    pub phys_state: IbPortPhyState,
    /// Far end as (node GUID, port number).
    pub remote: Option<(u64, u8)>,
}

#[derive(Clone, Debug)]
pub struct SimNode {
    pub guid: u64,
    pub node_type: IbNodeType,
    pub nports: u8,
    pub system_guid: u64,
    pub description: String,
    /// Management LID (port 0 for switches).
    pub lid: u16,
    pub lmc: u8,
    pub enhanced_port0: bool,
    pub ports: HashMap<u8, SimPort>,
}

#[derive(Debug)]
struct SimState {
    nodes: HashMap<u64, SimNode>,
    root: u64,
    root_port: u8,
    fail: HashSet<(u64, SmpAttrId, u32)>,
    agents: bool,
}

/// Cloneable handle onto one simulated fabric.
#[derive(Clone)]
pub struct SimFabric {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl SimFabric {
    pub fn new() -> Self {
        SimFabric {
            state: Arc::new(Mutex::new(SimState {
                nodes: HashMap::new(),
                root: 0,
                root_port: 0,
                fail: HashSet::new(),
                agents: true,
            })),
        }
    }

    /// Drop the class agents, for exercising the configuration-error path.
    pub fn without_agents(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.agents = false;
        }
        self
    }

    pub fn add_hca(&self, guid: u64, nports: u8, description: &str) {
        self.add_node(guid, IbNodeType::CA, nports, description, 0, false);
    }

    pub fn add_switch(&self, guid: u64, nports: u8, description: &str, lid: u16, enhanced: bool) {
        self.add_node(guid, IbNodeType::Switch, nports, description, lid, enhanced);
    }

    pub fn add_router(&self, guid: u64, nports: u8, description: &str) {
        self.add_node(guid, IbNodeType::Router, nports, description, 0, false);
    }

    fn add_node(
        &self,
        guid: u64,
        node_type: IbNodeType,
        nports: u8,
        description: &str,
        lid: u16,
        enhanced: bool,
    ) {
        let Ok(mut state) = self.state.lock() else { return };
        state.nodes.insert(
            guid,
            SimNode {
                guid,
                node_type,
                nports,
                system_guid: 0,
                description: description.to_string(),
                lid,
                lmc: 0,
                enhanced_port0: enhanced,
                ports: HashMap::new(),
            },
        );
        if state.root == 0 {
            state.root = guid;
            state.root_port = if node_type == IbNodeType::Switch { 0 } else { 1 };
        }
    }

    /// Cable two ports together, both ends LinkUp/Active.
    pub fn link(&self, a_guid: u64, a_port: u8, b_guid: u64, b_port: u8) {
        let Ok(mut state) = self.state.lock() else { return };
        for (guid, portnum, rguid, rport) in
            [(a_guid, a_port, b_guid, b_port), (b_guid, b_port, a_guid, a_port)]
        {
            let Some(node) = state.nodes.get_mut(&guid) else { continue };
            let lid = node.lid;
            node.ports.insert(
                portnum,
                SimPort {
                    guid,
                    lid,
                    lmc: 0,
                    state: IbPortLinkLayerState::Active,
                    phys_state: IbPortPhyState::LinkUp,
                    remote: Some((rguid, rport)),
                },
            );
        }
    }

    /// Give a node an unconnected port in the Polling/Down state.
    pub fn port_down(&self, guid: u64, portnum: u8) {
        let Ok(mut state) = self.state.lock() else { return };
        let Some(node) = state.nodes.get_mut(&guid) else { return };
        node.ports.insert(
            portnum,
            SimPort {
                guid,
                lid: 0,
                lmc: 0,
                state: IbPortLinkLayerState::Down,
                phys_state: IbPortPhyState::Polling,
                remote: None,
            },
        );
    }

    /// Pick where discovery enters the fabric. Defaults to the first node
    /// added.
    pub fn set_root(&self, guid: u64, portnum: u8) {
        let Ok(mut state) = self.state.lock() else { return };
        state.root = guid;
        state.root_port = portnum;
    }

    /// Make one attribute query against one node fail from now on.
    pub fn fail_query(&self, guid: u64, attr: SmpAttrId, modifier: u32) {
        let Ok(mut state) = self.state.lock() else { return };
        state.fail.insert((guid, attr, modifier));
    }

    pub fn set_description(&self, guid: u64, description: &str) {
        let Ok(mut state) = self.state.lock() else { return };
        if let Some(node) = state.nodes.get_mut(&guid) {
            node.description = description.to_string();
        }
    }

    pub fn set_lid(&self, guid: u64, lid: u16) {
        let Ok(mut state) = self.state.lock() else { return };
        if let Some(node) = state.nodes.get_mut(&guid) {
            node.lid = lid;
            for port in node.ports.values_mut() {
                port.lid = lid;
            }
        }
    }

    pub fn set_system_guid(&self, guid: u64, system_guid: u64) {
        let Ok(mut state) = self.state.lock() else { return };
        if let Some(node) = state.nodes.get_mut(&guid) {
            node.system_guid = system_guid;
        }
    }
}

impl SimState {
    /// Walk the path from the root; yields the answering node and the port
    /// the SMP arrived on.
    fn resolve(&self, path: &DrPath, timeout_ms: u32) -> Result<(u64, u8), MadError> {
        let mut cur = self.root;
        let mut arrival = self.root_port;
        for &hop in path.hops() {
            if hop == 0 {
                continue;
            }
            let node = self
                .nodes
                .get(&cur)
                .ok_or_else(|| MadError::Unreachable(path.to_string()))?;
            let port = node
                .ports
                .get(&hop)
                .ok_or_else(|| MadError::Unreachable(path.to_string()))?;
            if port.phys_state != IbPortPhyState::LinkUp {
                return Err(MadError::Timeout(timeout_ms));
            }
            let Some((rguid, rport)) = port.remote else {
                return Err(MadError::Timeout(timeout_ms));
            };
            cur = rguid;
            arrival = rport;
        }
        if !self.nodes.contains_key(&cur) {
            return Err(MadError::Unreachable(path.to_string()));
        }
        Ok((cur, arrival))
    }

    fn port_info(&self, node: &SimNode, modifier: u32, arrival: u8) -> Result<SmpData, MadError> {
        let mut pi = PortInfo::default();
        pi.set_link_width_active(2);
        pi.set_link_speed_active(2);

        if modifier == 0 && node.node_type == IbNodeType::Switch {
            // management port: where the switch reports its LID
            pi.set_lid(node.lid);
            pi.set_lmc(node.lmc);
            pi.set_port_state(IbPortLinkLayerState::Active.to_wire());
            pi.set_phys_state(IbPortPhyState::LinkUp.to_wire());
            return Ok(pi.data);
        }

        let pnum = if modifier == 0 { arrival } else { modifier as u8 };
        if pnum == 0 || pnum > node.nports {
            return Err(MadError::Malformed(format!(
                "port {pnum} out of range on {:#018x}",
                node.guid
            )));
        }
        match node.ports.get(&pnum) {
            Some(port) => {
                pi.set_lid(port.lid);
                pi.set_lmc(port.lmc);
                pi.set_port_state(port.state.to_wire());
                pi.set_phys_state(port.phys_state.to_wire());
            }
            None => {
                // nothing cabled here
                pi.set_port_state(IbPortLinkLayerState::Down.to_wire());
                pi.set_phys_state(IbPortPhyState::Polling.to_wire());
            }
        }
        Ok(pi.data)
    }
}

impl MadTransport for SimFabric {
    fn class_agent(&self, mgmt_class: u8) -> Option<u8> {
        let state = self.state.lock().ok()?;
        if !state.agents {
            return None;
        }
        match mgmt_class {
            IB_MGMT_CLASS_LID_ROUTED_SMP => Some(0),
            IB_MGMT_CLASS_DIRECT_ROUTED_SMP => Some(1),
            _ => None,
        }
    }

    fn smp_query_via(
        &mut self,
        path: &DrPath,
        attr: SmpAttrId,
        modifier: u32,
        timeout_ms: u32,
        _tid: u64,
    ) -> Result<SmpData, MadError> {
        let state = self
            .state
            .lock()
            .map_err(|_| MadError::Malformed("sim state lock".to_string()))?;
        let (guid, arrival) = state.resolve(path, timeout_ms)?;
        if state.fail.contains(&(guid, attr, modifier)) {
            return Err(MadError::Timeout(timeout_ms));
        }
        let node = state
            .nodes
            .get(&guid)
            .ok_or_else(|| MadError::Unreachable(path.to_string()))?;

        match attr {
            SmpAttrId::NodeInfo => {
                let mut ni = NodeInfo::default();
                ni.set_node_type(node.node_type.to_wire());
                ni.set_nports(node.nports);
                ni.set_system_guid(node.system_guid);
                ni.set_node_guid(node.guid);
                let port_guid = if node.node_type == IbNodeType::Switch {
                    node.guid
                } else {
                    node.ports.get(&arrival).map(|p| p.guid).unwrap_or(node.guid)
                };
                ni.set_port_guid(port_guid);
                ni.set_local_port(arrival);
                Ok(ni.data)
            }
            SmpAttrId::NodeDesc => Ok(node_desc_from_str(&node.description)),
            SmpAttrId::PortInfo => state.port_info(node, modifier, arrival),
            SmpAttrId::SwitchInfo => {
                if node.node_type != IbNodeType::Switch {
                    return Err(MadError::Malformed(format!(
                        "SwitchInfo on non-switch {:#018x}",
                        node.guid
                    )));
                }
                let mut si = SwitchInfo::default();
                si.set_enhanced_port0(node.enhanced_port0);
                Ok(si.data)
            }
        }
    }
}
