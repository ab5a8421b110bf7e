//! Chassis grouping over a discovered fabric.
//!
//! Vendor-specific slot and external-port assignment is left to the caller;
//! the pass here groups switches that report a common SystemImageGUID,
//! which is what multi-switch chassis advertise.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tracing::debug;

use crate::fabric::Fabric;
use crate::node::Node;

/// One physical chassis: the switches sharing a SystemImageGUID.
#[derive(Clone, Debug)]
pub struct Chassis {
    pub chassis_guid: u64,
    pub nodes: Vec<Weak<RwLock<Node>>>,
}

/// Group the fabric's switches into chassis descriptors.
pub fn group_nodes(fabric: &Fabric) -> Vec<Chassis> {
    let mut groups: HashMap<u64, Vec<Weak<RwLock<Node>>>> = HashMap::new();
    for node in &fabric.switches {
        let Ok(n) = node.read() else { continue };
        let sysguid = n.info.system_guid();
        if sysguid == 0 {
            continue;
        }
        groups.entry(sysguid).or_default().push(Arc::downgrade(node));
    }

    let mut chassis: Vec<Chassis> = groups
        .into_iter()
        .map(|(chassis_guid, nodes)| Chassis { chassis_guid, nodes })
        .collect();
    chassis.sort_by_key(|c| c.chassis_guid);
    debug!("grouped {} chassis", chassis.len());
    chassis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dr::DrPath;
    use crate::enums::IbNodeType;
    use crate::mad::smp::NodeInfo;
    use crate::mad::{MadError, MadTransport, SmpAttrId, SmpClient, SmpData};

    struct NullTransport;

    impl MadTransport for NullTransport {
        fn class_agent(&self, _mgmt_class: u8) -> Option<u8> {
            Some(0)
        }

        fn smp_query_via(
            &mut self,
            path: &DrPath,
            _attr: SmpAttrId,
            _modifier: u32,
            _timeout_ms: u32,
            _tid: u64,
        ) -> Result<SmpData, MadError> {
            Err(MadError::Unreachable(path.to_string()))
        }
    }

    fn switch_node(guid: u64, sysguid: u64) -> Node {
        let mut info = NodeInfo::default();
        info.set_node_guid(guid);
        info.set_node_type(IbNodeType::Switch.to_wire());
        info.set_nports(8);
        info.set_system_guid(sysguid);
        Node {
            guid,
            node_type: IbNodeType::Switch,
            nports: 8,
            info,
            description: format!("sw-{guid:x}"),
            switch_info: None,
            smalid: 0,
            smalmc: 0,
            smaenhsp0: false,
            dist: 0,
            path: DrPath::new(),
            ports: Vec::new(),
        }
    }

    #[test]
    fn switches_group_by_system_guid() {
        let client =
            SmpClient::new(Box::new(NullTransport), 100, 0).expect("agents present");
        let mut fabric = Fabric::with_client(client);
        let path = DrPath::new();
        fabric.register_node(switch_node(0x10, 0xaa), &path, 0);
        fabric.register_node(switch_node(0x11, 0xaa), &path, 1);
        fabric.register_node(switch_node(0x12, 0xbb), &path, 1);
        fabric.register_node(switch_node(0x13, 0), &path, 2);

        let chassis = group_nodes(&fabric);
        assert_eq!(chassis.len(), 2);
        assert_eq!(chassis[0].chassis_guid, 0xaa);
        assert_eq!(chassis[0].nodes.len(), 2);
        assert_eq!(chassis[1].chassis_guid, 0xbb);
        assert_eq!(chassis[1].nodes.len(), 1);
    }
}
