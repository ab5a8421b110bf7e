//! End-to-end discovery scenarios against the simulated transport.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use ibnetdisc::mad::{MadError, SmpAttrId};
use ibnetdisc::sim::SimFabric;
use ibnetdisc::{DiscoveryError, Fabric, IbNodeType, MAXHOPS};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn discover(sim: &SimFabric) -> Fabric {
    Fabric::discover(Box::new(sim.clone()), 100, None, None).expect("discovery succeeds")
}

fn discover_hops(sim: &SimFabric, max_hops: usize) -> Fabric {
    Fabric::discover(Box::new(sim.clone()), 100, None, Some(max_hops))
        .expect("discovery succeeds")
}

fn sorted_guids(fabric: &Fabric) -> Vec<u64> {
    let mut guids: Vec<u64> = fabric
        .iter_nodes()
        .map(|n| n.read().expect("read node").guid)
        .collect();
    guids.sort_unstable();
    guids
}

/// Every link as an unordered pair of (node GUID, port number) endpoints.
fn link_set(fabric: &Fabric) -> BTreeSet<((u64, u8), (u64, u8))> {
    let mut links = BTreeSet::new();
    for node in fabric.iter_nodes() {
        let n = node.read().expect("read node");
        for slot in n.ports.iter().flatten() {
            let p = slot.read().expect("read port");
            let Some(remote) = p.remote() else { continue };
            let r = remote.read().expect("read remote");
            let rnode = r.node().expect("remote parent");
            let rguid = rnode.read().expect("read remote node").guid;
            let a = (n.guid, p.number);
            let b = (rguid, r.number);
            links.insert(if a <= b { (a, b) } else { (b, a) });
        }
    }
    links
}

fn assert_links_symmetric(fabric: &Fabric) {
    for node in fabric.iter_nodes() {
        let n = node.read().expect("read node");
        for slot in n.ports.iter().flatten() {
            let p = slot.read().expect("read port");
            let Some(remote) = p.remote() else { continue };
            let back = remote
                .read()
                .expect("read remote")
                .remote()
                .expect("remote is linked back");
            assert!(
                Arc::ptr_eq(&back, slot),
                "peer link of {:#x}:{} is not symmetric",
                n.guid,
                p.number
            );
        }
    }
}

#[test]
fn lone_hca() {
    init_tracing();
    let sim = SimFabric::new();
    sim.add_hca(0x01, 1, "host-01");
    sim.port_down(0x01, 1);

    let fabric = discover(&sim);

    let guids: Vec<u64> = fabric
        .iter_nodes()
        .map(|n| n.read().expect("read node").guid)
        .collect();
    assert_eq!(guids, vec![0x01]);
    assert_eq!(fabric.maxhops_discovered, 0);

    let root = fabric.from_node.clone().expect("root installed");
    let n = root.read().expect("read root");
    assert_eq!(n.node_type, IbNodeType::CA);
    assert_eq!(n.description, "host-01");
    let port = n.port(1).expect("arriving port installed");
    assert!(port.read().expect("read port").remote().is_none());
}

#[test]
fn hca_switch_hca() {
    init_tracing();
    let sim = SimFabric::new();
    sim.add_hca(0x01, 1, "host-01");
    sim.add_switch(0x10, 8, "edge-sw", 5, false);
    sim.add_hca(0x02, 1, "host-02");
    sim.link(0x01, 1, 0x10, 3);
    sim.link(0x10, 7, 0x02, 1);

    let fabric = discover(&sim);

    assert_eq!(fabric.nodes.len(), 3);
    assert_eq!(fabric.nodesdist[1].len(), 1);
    assert_eq!(
        fabric.nodesdist[1][0].read().expect("read switch").guid,
        0x10
    );
    let leaves: Vec<u64> = fabric.nodesdist[MAXHOPS]
        .iter()
        .map(|n| n.read().expect("read leaf").guid)
        .collect();
    assert_eq!(leaves, vec![0x01, 0x02]);

    // hop 1 leaves the root HCA through its port 1, hop 7 leaves the switch
    let tail = fabric.find_node_by_dr("1,7").expect("route resolves");
    assert_eq!(tail.read().expect("read tail").guid, 0x02);
    let tail = fabric.find_node_by_dr("0,1,7").expect("leading zero accepted");
    assert_eq!(tail.read().expect("read tail").guid, 0x02);
    assert!(fabric.find_node_by_dr("1,6").is_none());

    // every switch port shares the port-0 GUID and the management LID
    let sw = fabric.find_node_by_guid(0x10).expect("switch");
    let sw = sw.read().expect("read switch");
    assert_eq!(sw.smalid, 5);
    for portnum in [3u8, 7] {
        let port = sw.port(portnum).expect("port installed");
        let port = port.read().expect("read port");
        assert_eq!(port.guid, 0x10);
        assert_eq!(port.base_lid, 5);
    }
    // unconnected switch ports exist, peerless
    let spare = sw.port(2).expect("spare port probed");
    assert!(spare.read().expect("read spare").remote().is_none());

    assert_links_symmetric(&fabric);
}

fn series_sim() -> SimFabric {
    let sim = SimFabric::new();
    sim.add_hca(0x01, 1, "head");
    sim.add_switch(0xa0, 4, "sw-a", 10, false);
    sim.add_switch(0xb0, 4, "sw-b", 11, false);
    sim.add_hca(0x02, 1, "tail");
    sim.link(0x01, 1, 0xa0, 1);
    sim.link(0xa0, 2, 0xb0, 1);
    sim.link(0xb0, 2, 0x02, 1);
    sim
}

#[test]
fn series_respects_max_hops() {
    init_tracing();
    let sim = series_sim();

    assert_eq!(sorted_guids(&discover_hops(&sim, 0)), vec![0x01, 0xa0]);
    assert_eq!(sorted_guids(&discover_hops(&sim, 1)), vec![0x01, 0xa0, 0xb0]);
    assert_eq!(
        sorted_guids(&discover_hops(&sim, 2)),
        vec![0x01, 0x02, 0xa0, 0xb0]
    );
    // beyond the diameter nothing more appears
    assert_eq!(
        sorted_guids(&discover(&sim)),
        vec![0x01, 0x02, 0xa0, 0xb0]
    );
}

#[test]
fn series_distances_and_paths() {
    init_tracing();
    let fabric = discover(&series_sim());

    let dist_of = |guid: u64| {
        fabric
            .find_node_by_guid(guid)
            .expect("node")
            .read()
            .expect("read")
            .dist
    };
    assert_eq!(dist_of(0x01), 0);
    assert_eq!(dist_of(0xa0), 1);
    assert_eq!(dist_of(0xb0), 2);
    assert_eq!(dist_of(0x02), 3);
    assert_eq!(fabric.maxhops_discovered, 3);

    for node in fabric.iter_nodes() {
        let (guid, dr) = {
            let n = node.read().expect("read node");
            (n.guid, n.path.to_string())
        };
        let by_guid = fabric.find_node_by_guid(guid).expect("guid lookup");
        assert!(Arc::ptr_eq(&by_guid, node));
        let by_dr = fabric.find_node_by_dr(&dr).expect("dr lookup");
        assert!(Arc::ptr_eq(&by_dr, node), "route {dr} misses {guid:#x}");
    }
}

#[test]
fn switch_triangle() {
    init_tracing();
    let sim = SimFabric::new();
    sim.add_switch(0xa0, 4, "sw-a", 1, false);
    sim.add_switch(0xb0, 4, "sw-b", 2, false);
    sim.add_switch(0xc0, 4, "sw-c", 3, false);
    sim.link(0xa0, 1, 0xb0, 1);
    sim.link(0xb0, 2, 0xc0, 1);
    sim.link(0xc0, 2, 0xa0, 2);
    sim.set_root(0xa0, 0);

    let fabric = discover(&sim);

    assert_eq!(sorted_guids(&fabric), vec![0xa0, 0xb0, 0xc0]);
    assert_eq!(fabric.nodesdist[0].len(), 1);
    assert_eq!(fabric.nodesdist[1].len(), 2);
    let expected: BTreeSet<((u64, u8), (u64, u8))> = [
        ((0xa0, 1), (0xb0, 1)),
        ((0xb0, 2), (0xc0, 1)),
        ((0xa0, 2), (0xc0, 2)),
    ]
    .into_iter()
    .collect();
    assert_eq!(link_set(&fabric), expected);
    assert_links_symmetric(&fabric);
}

#[test]
fn parallel_links_reuse_the_peer() {
    init_tracing();
    let sim = SimFabric::new();
    sim.add_switch(0xa0, 4, "sw-a", 1, false);
    sim.add_switch(0xb0, 4, "sw-b", 2, false);
    sim.link(0xa0, 1, 0xb0, 1);
    sim.link(0xa0, 2, 0xb0, 2);
    sim.set_root(0xa0, 0);

    let fabric = discover(&sim);

    // one peer node, both cables stitched to it
    assert_eq!(sorted_guids(&fabric), vec![0xa0, 0xb0]);
    let expected: BTreeSet<((u64, u8), (u64, u8))> =
        [((0xa0, 1), (0xb0, 1)), ((0xa0, 2), (0xb0, 2))]
            .into_iter()
            .collect();
    assert_eq!(link_set(&fabric), expected);
    assert_links_symmetric(&fabric);
}

#[test]
fn flaky_port_is_skipped() {
    init_tracing();
    let sim = SimFabric::new();
    sim.add_hca(0x01, 1, "host-01");
    sim.add_switch(0x10, 8, "edge-sw", 5, false);
    sim.add_hca(0x02, 1, "host-02");
    sim.add_hca(0x03, 1, "host-03");
    sim.link(0x01, 1, 0x10, 1);
    sim.link(0x10, 2, 0x02, 1);
    sim.link(0x10, 5, 0x03, 1);
    sim.fail_query(0x10, SmpAttrId::PortInfo, 5);

    let fabric = discover(&sim);

    let sw = fabric.find_node_by_guid(0x10).expect("switch");
    let sw = sw.read().expect("read switch");
    assert!(sw.port(5).is_none(), "flaky port must stay out of the table");
    assert!(sw.port(2).is_some());
    assert!(fabric.find_node_by_guid(0x03).is_none());

    let host2 = fabric.find_node_by_guid(0x02).expect("intact peer");
    let host2 = host2.read().expect("read host");
    let port = host2.port(1).expect("linked port");
    assert!(port.read().expect("read port").remote().is_some());
}

#[test]
fn enhanced_sp0_flag() {
    init_tracing();
    let sim = SimFabric::new();
    sim.add_hca(0x01, 1, "host");
    sim.add_switch(0xa0, 4, "sw-a", 10, true);
    sim.add_switch(0xb0, 4, "sw-b", 11, true);
    sim.link(0x01, 1, 0xa0, 1);
    sim.link(0xa0, 2, 0xb0, 1);
    sim.fail_query(0xb0, SmpAttrId::SwitchInfo, 0);

    let fabric = discover(&sim);

    let a = fabric.find_node_by_guid(0xa0).expect("sw-a");
    let a = a.read().expect("read sw-a");
    assert!(a.smaenhsp0);
    assert!(a.switch_info.is_some());

    // SwitchInfo failure is tolerated and defaults to base SP0
    let b = fabric.find_node_by_guid(0xb0).expect("sw-b");
    let b = b.read().expect("read sw-b");
    assert!(!b.smaenhsp0);
    assert!(b.switch_info.is_none());
}

#[test]
fn hca_root_with_unreachable_neighbor_yields_partial_fabric() {
    init_tracing();
    let sim = SimFabric::new();
    sim.add_hca(0x01, 1, "host");
    sim.add_switch(0x10, 8, "edge-sw", 5, false);
    sim.link(0x01, 1, 0x10, 3);
    sim.fail_query(0x10, SmpAttrId::NodeInfo, 0);

    let fabric = discover(&sim);

    assert_eq!(sorted_guids(&fabric), vec![0x01]);
    let root = fabric.from_node.clone().expect("root");
    let root = root.read().expect("read root");
    let port = root.port(1).expect("port installed");
    assert!(port.read().expect("read port").remote().is_none());
    // the extension happened before the probe failed
    assert_eq!(fabric.maxhops_discovered, 1);
}

#[test]
fn discover_without_agents_is_a_config_error() {
    init_tracing();
    let sim = SimFabric::new().without_agents();
    sim.add_hca(0x01, 1, "host");

    let err = Fabric::discover(Box::new(sim.clone()), 100, None, None)
        .expect_err("must fail");
    assert!(matches!(
        err,
        DiscoveryError::Mad(MadError::NoClassAgent(_))
    ));
}

#[test]
fn unreachable_root_aborts() {
    init_tracing();
    let sim = SimFabric::new();
    sim.add_hca(0x01, 1, "host");
    sim.fail_query(0x01, SmpAttrId::NodeInfo, 0);

    let err = Fabric::discover(Box::new(sim.clone()), 100, None, None)
        .expect_err("must fail");
    assert!(matches!(err, DiscoveryError::RootUnreachable(_)));
}

#[test]
fn rediscovery_is_isomorphic() {
    init_tracing();
    let sim = series_sim();
    let first = discover(&sim);
    let second = discover(&sim);

    assert_eq!(sorted_guids(&first), sorted_guids(&second));
    assert_eq!(link_set(&first), link_set(&second));
    assert_eq!(first.maxhops_discovered, second.maxhops_discovered);
}

#[test]
fn update_node_refreshes_in_place() {
    init_tracing();
    let sim = series_sim();
    let mut fabric = discover(&sim);
    let links_before = link_set(&fabric);

    sim.set_description(0xa0, "sw-a-renamed");
    sim.set_lid(0xa0, 42);

    let node = fabric.find_node_by_guid(0xa0).expect("switch");
    fabric.update_node(&node).expect("update succeeds");

    {
        let n = node.read().expect("read node");
        assert_eq!(n.description, "sw-a-renamed");
        assert_eq!(n.smalid, 42);
        let port = n.port(2).expect("port");
        assert_eq!(port.read().expect("read port").base_lid, 42);
    }

    // structure is untouched
    assert_eq!(link_set(&fabric), links_before);
    assert_eq!(sorted_guids(&fabric), vec![0x01, 0x02, 0xa0, 0xb0]);
    assert_links_symmetric(&fabric);
}

#[test]
fn chassis_grouping_by_system_guid() {
    init_tracing();
    let sim = SimFabric::new();
    sim.add_hca(0x01, 1, "host");
    sim.add_switch(0xa0, 4, "spine-1", 10, false);
    sim.add_switch(0xb0, 4, "spine-2", 11, false);
    sim.link(0x01, 1, 0xa0, 1);
    sim.link(0xa0, 2, 0xb0, 1);
    sim.set_system_guid(0xa0, 0xcc);
    sim.set_system_guid(0xb0, 0xcc);

    let fabric = discover(&sim);

    assert_eq!(fabric.chassis.len(), 1);
    assert_eq!(fabric.chassis[0].chassis_guid, 0xcc);
    assert_eq!(fabric.chassis[0].nodes.len(), 2);
}

#[test]
fn random_tree_upholds_the_invariants() {
    use rand::{Rng, SeedableRng, rngs::StdRng};
    init_tracing();

    let mut rng = StdRng::seed_from_u64(7);
    let sim = SimFabric::new();
    sim.add_hca(0x01, 1, "root-host");

    let nswitches = 12u64;
    let mut next_port: HashMap<u64, u8> = HashMap::new();
    let sw_guid = |i: u64| 0x100 + i;

    for i in 0..nswitches {
        let guid = sw_guid(i);
        sim.add_switch(guid, 16, &format!("sw-{i}"), 100 + i as u16, false);
        if i == 0 {
            sim.link(0x01, 1, guid, 1);
            next_port.insert(guid, 2);
        } else {
            let parent = sw_guid(rng.gen_range(0..i));
            let pport = *next_port.get(&parent).expect("parent seen");
            next_port.insert(parent, pport + 1);
            sim.link(parent, pport, guid, 1);
            next_port.insert(guid, 2);
        }
    }
    for i in 0..nswitches {
        let guid = sw_guid(i);
        let hca = 0x1000 + i;
        sim.add_hca(hca, 1, &format!("host-{i}"));
        let pport = *next_port.get(&guid).expect("switch seen");
        next_port.insert(guid, pport + 1);
        sim.link(guid, pport, hca, 1);
    }

    let fabric = discover(&sim);

    let guids = sorted_guids(&fabric);
    assert_eq!(guids.len(), 1 + 2 * nswitches as usize);
    let unique: HashSet<u64> = guids.iter().copied().collect();
    assert_eq!(unique.len(), guids.len(), "no duplicate nodes");

    assert_eq!(fabric.switches.len(), nswitches as usize);
    assert_eq!(fabric.ch_adapters.len(), 1 + nswitches as usize);
    assert_eq!(fabric.routers.len(), 0);

    let bucketed: usize = fabric.nodesdist.iter().map(Vec::len).sum();
    assert_eq!(bucketed, fabric.nodes.len(), "distance buckets cover all nodes");

    for node in fabric.iter_nodes() {
        let (guid, dr, is_switch) = {
            let n = node.read().expect("read node");
            (n.guid, n.path.to_string(), n.is_switch())
        };
        let by_guid = fabric.find_node_by_guid(guid).expect("guid lookup");
        assert!(Arc::ptr_eq(&by_guid, node));
        let by_dr = fabric.find_node_by_dr(&dr).expect("dr lookup");
        assert!(Arc::ptr_eq(&by_dr, node));

        if is_switch {
            let n = node.read().expect("read node");
            for slot in n.ports.iter().flatten() {
                let p = slot.read().expect("read port");
                assert_eq!(p.guid, guid, "switch ports share the port-0 GUID");
                assert_eq!(p.number as usize, {
                    n.ports
                        .iter()
                        .position(|s| {
                            s.as_ref().is_some_and(|cand| Arc::ptr_eq(cand, slot))
                        })
                        .expect("port in table")
                });
            }
        }
    }
    assert_links_symmetric(&fabric);
}
