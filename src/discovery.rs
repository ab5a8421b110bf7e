//! The discovery walk: probe nodes over directed routes, materialize
//! records, link peers.
//!
//! The walk is breadth-first over switch distance. Each layer probes every
//! physical port of its switches; a probe extends the shared path cursor by
//! one egress port, queries whatever answers there, and retracts the cursor
//! again on every exit path.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chassis;
use crate::config::DiscoverConfig;
use crate::dr::DrPath;
use crate::enums::{IbNodeType, IbPortPhyState};
use crate::fabric::{Fabric, NiTiming};
use crate::mad::smp::{NodeInfo, PortInfo, SwitchInfo, node_desc_to_string};
use crate::mad::{MadError, MadTransport, SmpAttrId, SmpClient};
use crate::node::{Node, NodeRef, Port, PortRef, link_ports};
use crate::{MAXHOPS, debug_enabled, progress_enabled};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Mad(#[from] MadError),
    #[error("can't reach node at {0}")]
    RootUnreachable(String),
}

impl Fabric {
    /// Discover the fabric reachable from `from` (default: the local port),
    /// walking at most `max_hops` switch layers (default: everything).
    pub fn discover(
        transport: Box<dyn MadTransport>,
        timeout_ms: u32,
        from: Option<&DrPath>,
        max_hops: Option<usize>,
    ) -> Result<Fabric, DiscoveryError> {
        let config = DiscoverConfig {
            timeout_ms,
            max_hops,
            ..DiscoverConfig::default()
        };
        Self::discover_with(transport, &config, from)
    }

    /// [`discover`] with the full configuration surface.
    ///
    /// [`discover`]: Fabric::discover
    pub fn discover_with(
        transport: Box<dyn MadTransport>,
        config: &DiscoverConfig,
        from: Option<&DrPath>,
    ) -> Result<Fabric, DiscoveryError> {
        let client = SmpClient::new(transport, config.timeout_ms, config.retries)?;
        let mut fabric = Fabric::with_client(client);
        let max_hops = config.max_hops.unwrap_or(MAXHOPS - 1).min(MAXHOPS - 1);

        let mut path = from.cloned().unwrap_or_default();
        debug!(from = %path, max_hops, "discovering fabric");

        let (node_tmpl, port_tmpl) = fabric.query_node(&path).map_err(|e| {
            warn!("can't reach node at {path}: {e}");
            DiscoveryError::RootUnreachable(path.to_string())
        })?;
        let local_port = node_tmpl.info.local_port();
        let is_switch = node_tmpl.is_switch();

        let node = fabric.register_node(node_tmpl, &path, 0);
        fabric.from_node = Some(node.clone());
        let port = fabric.add_port_to_node(&node, port_tmpl);

        if !is_switch {
            // A non-switch root cannot forward directed-route traffic
            // itself; reach through its one connected port, and settle for
            // the single-node fabric when even that fails.
            let Some(port) = port else {
                return Ok(fabric);
            };
            if !fabric.probe_remote(&node, &port, &mut path, local_port, 0) {
                return Ok(fabric);
            }
        }

        for dist in 0..=max_hops {
            let mut idx = fabric.nodesdist[dist].len();
            while idx > 0 {
                idx -= 1;
                let node = fabric.nodesdist[dist][idx].clone();
                fabric.expand_node(&node, dist);
            }
        }

        fabric.chassis = chassis::group_nodes(&fabric);
        Ok(fabric)
    }

    /// Probe every port of one node, linking whatever answers behind them.
    fn expand_node(&mut self, node: &NodeRef, dist: usize) {
        let (mut path, nports, local_port, node_port_guid, is_switch, guid) = {
            let Ok(n) = node.read() else { return };
            (
                n.path.clone(),
                n.nports,
                n.info.local_port(),
                n.info.port_guid(),
                n.is_switch(),
                n.guid,
            )
        };
        if progress_enabled() {
            info!("processing {guid:#018x} at {path} dist {dist}");
        }

        for i in 1..=nports {
            if i == local_port {
                continue;
            }
            let info = match self.client.query(&path, SmpAttrId::PortInfo, u32::from(i)) {
                Ok(data) => PortInfo { data },
                Err(e) => {
                    warn!("can't reach node {path} port {i}: {e}");
                    continue;
                }
            };
            if self.find_port_on_node(node, i).is_some() {
                // already visited via some other walk
                continue;
            }
            let mut port = Port::from_info(i, info);
            if is_switch {
                port.guid = node_port_guid;
            }
            let Some(port) = self.add_port_to_node(node, port) else {
                continue;
            };
            self.probe_remote(node, &port, &mut path, i, dist);
        }
    }

    /// Extend the path by `portnum`, query the far end, and stitch the two
    /// ports together. Returns false when no peer was linked; the path is
    /// restored on every exit.
    fn probe_remote(
        &mut self,
        node: &NodeRef,
        port: &PortRef,
        path: &mut DrPath,
        portnum: u8,
        dist: usize,
    ) -> bool {
        if debug_enabled() {
            let guid = node.read().map(|n| n.guid).unwrap_or(0);
            debug!("handle node {guid:#018x} port {portnum} dist {dist}");
        }

        let phys_state = port
            .read()
            .map(|p| p.phys_state)
            .unwrap_or(IbPortPhyState::Unknown);
        if phys_state != IbPortPhyState::LinkUp {
            return false;
        }

        if self.extend_dpath(path, portnum).is_err() {
            warn!("directed route on {path} full, cannot probe port {portnum}");
            return false;
        }

        let (remote_tmpl, rport_tmpl) = match self.query_node(path) {
            Ok(templates) => templates,
            Err(e) => {
                warn!("NodeInfo on {path} failed, skipping port: {e}");
                path.retract();
                return false;
            }
        };

        let rguid = remote_tmpl.guid;
        let known = self.find_node_by_guid(rguid);
        let remote_node = match &known {
            Some(existing) => existing.clone(),
            None => self.register_node(remote_tmpl, path, dist + 1),
        };

        let remote_port = match self.find_port_on_node(&remote_node, rport_tmpl.number) {
            Some(existing) => existing,
            None => match self.add_port_to_node(&remote_node, rport_tmpl) {
                Some(added) => added,
                None => {
                    path.retract();
                    return false;
                }
            },
        };

        self.dump_endnode(
            if known.is_some() { "known remote" } else { "new remote" },
            &remote_node,
            &remote_port,
        );

        link_ports(port, &remote_port);
        path.retract();
        true
    }

    /// Fetch the identity of whatever answers at `path`: its NodeInfo,
    /// description, and the PortInfo of the port the SMP arrived on. For
    /// switches this also captures the management LID/LMC and the enhanced
    /// port 0 flag.
    fn query_node(&mut self, path: &DrPath) -> Result<(Node, Port), MadError> {
        let sent_at = Utc::now();
        let ni = NodeInfo {
            data: self.client.query(path, SmpAttrId::NodeInfo, 0)?,
        };
        let rtt_us = (Utc::now() - sent_at).num_microseconds().unwrap_or(i64::MAX);

        let node_type = IbNodeType::from_wire(ni.node_type()).ok_or_else(|| {
            MadError::Malformed(format!("unknown node type {} at {path}", ni.node_type()))
        })?;
        self.ni_timings.push(NiTiming {
            path: path.to_string(),
            guid: ni.node_guid(),
            sent_at,
            rtt_us,
        });

        let nd = self.client.query(path, SmpAttrId::NodeDesc, 0)?;

        let mut port = Port::from_info(
            ni.local_port(),
            PortInfo {
                data: self.client.query(path, SmpAttrId::PortInfo, 0)?,
            },
        );
        port.guid = ni.port_guid();

        let mut node = Node {
            guid: ni.node_guid(),
            node_type,
            nports: ni.nports(),
            info: ni,
            description: node_desc_to_string(&nd),
            switch_info: None,
            smalid: 0,
            smalmc: 0,
            smaenhsp0: false,
            dist: 0,
            path: DrPath::new(),
            ports: Vec::new(),
        };

        if node_type != IbNodeType::Switch {
            return Ok((node, port));
        }

        node.smalid = port.base_lid;
        node.smalmc = port.lmc;

        // The mod-0 query answered for the management port; now get the
        // physical state of the port the SMP actually arrived on.
        port.info = PortInfo {
            data: self
                .client
                .query(path, SmpAttrId::PortInfo, u32::from(port.number))?,
        };
        port.decode_info();
        // LID is still defined by port 0.
        port.base_lid = node.smalid;
        port.lmc = node.smalmc;

        match self.client.query(path, SmpAttrId::SwitchInfo, 0) {
            Ok(data) => {
                let si = SwitchInfo { data };
                node.smaenhsp0 = si.enhanced_port0();
                node.switch_info = Some(si);
            }
            Err(_) => {
                // assume base SP0
                node.smaenhsp0 = false;
            }
        }

        debug!(
            "got switch node {:#018x} '{}' at {path}",
            node.guid, node.description
        );
        Ok((node, port))
    }

    fn extend_dpath(&mut self, path: &mut DrPath, portnum: u8) -> Result<(), crate::dr::DrPathError> {
        let cnt = path.extend(portnum)?;
        if cnt > self.maxhops_discovered {
            self.maxhops_discovered = cnt;
        }
        Ok(())
    }

    fn dump_endnode(&self, prompt: &str, node: &NodeRef, port: &PortRef) {
        if !progress_enabled() {
            return;
        }
        let (Ok(n), Ok(p)) = (node.read(), port.read()) else {
            return;
        };
        let portnum = if n.is_switch() { 0 } else { p.number };
        info!(
            "{prompt} {} {{{:016x}}} portnum {} base lid {}-{} \"{}\"",
            n.node_type,
            n.guid,
            portnum,
            p.base_lid,
            p.base_lid + (1u16 << p.lmc) - 1,
            n.description
        );
    }

    /// Refresh one node's attributes in place: NodeInfo, description, the
    /// PortInfo of every known port, and for switches the management
    /// LID/LMC and SwitchInfo. Graph structure never changes here.
    pub fn update_node(&mut self, node: &NodeRef) -> Result<(), DiscoveryError> {
        let (path, nports, is_switch) = {
            let Ok(n) = node.read() else { return Ok(()) };
            (n.path.clone(), n.nports, n.is_switch())
        };

        let ni = NodeInfo {
            data: self.client.query(&path, SmpAttrId::NodeInfo, 0)?,
        };
        let nd = self.client.query(&path, SmpAttrId::NodeDesc, 0)?;
        if let Ok(mut n) = node.write() {
            n.info = ni;
            n.description = node_desc_to_string(&nd);
        }

        // update all the port info's
        for p in 1..=nports {
            let Some(pref) = self.find_port_on_node(node, p) else {
                continue;
            };
            match self.client.query(&path, SmpAttrId::PortInfo, u32::from(p)) {
                Ok(data) => {
                    if let Ok(mut port) = pref.write() {
                        port.info = PortInfo { data };
                        port.decode_info();
                    }
                }
                Err(e) => {
                    warn!("can't reach node {path} port {p}: {e}");
                }
            }
        }

        if !is_switch {
            return Ok(());
        }

        let pi0 = PortInfo {
            data: self.client.query(&path, SmpAttrId::PortInfo, 0)?,
        };
        let (smalid, smalmc) = (pi0.lid(), pi0.lmc());

        let switch_info = match self.client.query(&path, SmpAttrId::SwitchInfo, 0) {
            Ok(data) => Some(SwitchInfo { data }),
            Err(_) => None,
        };

        if let Ok(mut n) = node.write() {
            n.smalid = smalid;
            n.smalmc = smalmc;
            n.smaenhsp0 = switch_info.is_some_and(|si| si.enhanced_port0());
            if let Some(si) = switch_info {
                n.switch_info = Some(si);
            }
        }

        // Switch ports report LID through port 0; keep them consistent with
        // the refreshed management values.
        for p in 1..=nports {
            let Some(pref) = self.find_port_on_node(node, p) else {
                continue;
            };
            if let Ok(mut port) = pref.write() {
                port.base_lid = smalid;
                port.lmc = smalmc;
            }
        }

        Ok(())
    }
}
