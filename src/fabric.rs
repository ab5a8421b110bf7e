//! The fabric store: node and port ownership, indices, and the query
//! surface over a discovered graph.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::MAXHOPS;
use crate::chassis::Chassis;
use crate::dr::DrPath;
use crate::enums::IbNodeType;
use crate::mad::SmpClient;
use crate::node::{Node, NodeRef, Port, PortRef};

/// Round-trip timing of one NodeInfo query.
#[derive(Clone, Debug)]
pub struct NiTiming {
    pub path: String,
    pub guid: u64,
    pub sent_at: DateTime<Utc>,
    pub rtt_us: i64,
}

/// A discovered fabric: every node and port reached from the root, plus the
/// indices discovery maintains over them.
///
/// Dropping the fabric releases the whole graph; peer and parent links are
/// weak, so no references survive.
#[derive(Debug)]
pub struct Fabric {
    pub client: SmpClient,
    /// The discovery root.
    pub from_node: Option<NodeRef>,
    /// Every node, in discovery-insertion order.
    pub nodes: Vec<NodeRef>,
    pub ch_adapters: Vec<NodeRef>,
    pub switches: Vec<NodeRef>,
    pub routers: Vec<NodeRef>,
    /// Distance buckets: switches at their hop distance from the root,
    /// everything else at `MAXHOPS`.
    pub nodesdist: Vec<Vec<NodeRef>>,
    pub node_map: HashMap<u64, NodeRef>,
    /// Port GUID index. Every port of a switch shares the node's port-0
    /// GUID, hence the list per key.
    pub port_map: HashMap<u64, Vec<PortRef>>,
    /// Deepest directed route successfully extended during discovery.
    pub maxhops_discovered: usize,
    pub chassis: Vec<Chassis>,
    pub ni_timings: Vec<NiTiming>,
}

impl Fabric {
    pub(crate) fn with_client(client: SmpClient) -> Self {
        Fabric {
            client,
            from_node: None,
            nodes: Vec::new(),
            ch_adapters: Vec::new(),
            switches: Vec::new(),
            routers: Vec::new(),
            nodesdist: vec![Vec::new(); MAXHOPS + 1],
            node_map: HashMap::new(),
            port_map: HashMap::new(),
            maxhops_discovered: 0,
            chassis: Vec::new(),
            ni_timings: Vec::new(),
        }
    }

    pub fn find_node_by_guid(&self, guid: u64) -> Option<NodeRef> {
        self.node_map.get(&guid).cloned()
    }

    /// First port registered under a port GUID.
    pub fn find_port_by_guid(&self, guid: u64) -> Option<PortRef> {
        self.port_map.get(&guid).and_then(|ports| ports.first().cloned())
    }

    /// Walk a directed-route string from the root, hop by hop through the
    /// peer links. Zero hops are skipped; any missing port or peer along
    /// the way yields `None`.
    pub fn find_node_by_dr(&self, dr_str: &str) -> Option<NodeRef> {
        let path: DrPath = dr_str.parse().ok()?;
        let mut cur = self.from_node.clone()?;
        for &hop in path.hops() {
            if hop == 0 {
                continue;
            }
            let port = {
                let node = cur.read().ok()?;
                node.port(hop)?
            };
            let remote = port.read().ok()?.remote()?;
            cur = remote.read().ok()?.node()?;
        }
        Some(cur)
    }

    /// Every node, most recently discovered first.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.iter().rev()
    }

    /// Nodes of one kind, most recently discovered first.
    pub fn iter_nodes_of_kind(&self, kind: IbNodeType) -> impl Iterator<Item = &NodeRef> {
        let list = match kind {
            IbNodeType::CA => &self.ch_adapters,
            IbNodeType::Switch => &self.switches,
            IbNodeType::Router => &self.routers,
        };
        list.iter().rev()
    }

    /// Install a freshly queried node in every index: the global list, its
    /// kind list, its distance bucket and the GUID map.
    pub(crate) fn register_node(&mut self, mut node: Node, path: &DrPath, dist: usize) -> NodeRef {
        node.dist = dist;
        node.path = path.clone();
        let guid = node.guid;
        let node_type = node.node_type;
        let nref: NodeRef = Arc::new(RwLock::new(node));

        self.node_map.insert(guid, nref.clone());
        self.nodes.push(nref.clone());
        match node_type {
            IbNodeType::CA => self.ch_adapters.push(nref.clone()),
            IbNodeType::Switch => self.switches.push(nref.clone()),
            IbNodeType::Router => self.routers.push(nref.clone()),
        }
        let bucket = if node_type == IbNodeType::Switch { dist } else { MAXHOPS };
        self.nodesdist[bucket].push(nref.clone());

        nref
    }

    pub(crate) fn find_port_on_node(&self, node: &NodeRef, portnum: u8) -> Option<PortRef> {
        node.read().ok().and_then(|n| n.port(portnum))
    }

    /// Install a port in its node's table (sized nports+1 on first use) and
    /// in the port-GUID index.
    pub(crate) fn add_port_to_node(&mut self, node: &NodeRef, mut port: Port) -> Option<PortRef> {
        port.parent = Arc::downgrade(node);
        port.ext_portnum = 0;
        let portnum = port.number as usize;
        let guid = port.guid;
        let pref: PortRef = Arc::new(RwLock::new(port));
        {
            let Ok(mut n) = node.write() else {
                return None;
            };
            if n.ports.is_empty() {
                n.ports = vec![None; n.nports as usize + 1];
            }
            if portnum >= n.ports.len() {
                warn!(
                    "port {portnum} out of range for node {:#018x} with {} ports",
                    n.guid, n.nports
                );
                return None;
            }
            n.ports[portnum] = Some(pref.clone());
        }
        self.port_map.entry(guid).or_default().push(pref.clone());
        Some(pref)
    }
}
