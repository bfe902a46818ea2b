//! Shared test utilities for core module tests
//!
//! Provides topology and whitelist fixtures so the individual test suites
//! do not each spell out JSON documents. Only compiled in test mode.

use crate::core::document::{
    CommDirection, CommunicationDesc, LinkDesc, NetworkDesc, PortSpec, RouterDesc, SubnetDesc,
    TestCaseDocument,
};
use crate::core::firewall::{
    Action, Chain, PortMatch, PortSet, PortSide, Protocol, Rule, RuleMatch, StateMatch, SubnetRef,
};
use crate::core::topology::Topology;

pub fn router(id: &str) -> RouterDesc {
    RouterDesc { id: id.to_string() }
}

pub fn subnet(id: &str, address: &str, prefix: u8) -> SubnetDesc {
    SubnetDesc {
        id: id.to_string(),
        address: address.parse().expect("valid test address"),
        prefix,
    }
}

pub fn link(router: &str, subnet: &str, interface: Option<&str>) -> LinkDesc {
    LinkDesc {
        router_id: router.to_string(),
        subnet_id: subnet.to_string(),
        interface_id: interface.map(String::from),
        ip: None,
    }
}

/// Whitelist entry; `port` is written as a JSON number
pub fn comm(source: &str, target: &str, protocol: &str, port: Option<u32>) -> CommunicationDesc {
    CommunicationDesc {
        source_subnet_id: source.to_string(),
        target_subnet_id: target.to_string(),
        protocol: protocol.to_string(),
        port: port.map(PortSpec::Number),
        direction: CommDirection::Unidirectional,
    }
}

/// The network used throughout the test suites:
///
/// ```text
/// S1 (10.0.1.0/24) --eth0-- R1 --eth1-- S2 (10.0.2.0/24) --eth0-- R2 --eth1-- S3 (10.0.3.0/24)
/// ```
pub fn two_router_network() -> NetworkDesc {
    let mut links = vec![
        link("1", "1", Some("eth0")),
        link("1", "2", Some("eth1")),
        link("2", "2", Some("eth0")),
        link("2", "3", Some("eth1")),
    ];
    let ips = ["10.0.1.1", "10.0.2.1", "10.0.2.2", "10.0.3.1"];
    for (link, ip) in links.iter_mut().zip(ips) {
        link.ip = Some(ip.parse().expect("valid test address"));
    }
    NetworkDesc {
        routers: vec![router("1"), router("2")],
        subnets: vec![
            subnet("1", "10.0.1.0", 24),
            subnet("2", "10.0.2.0", 24),
            subnet("3", "10.0.3.0", 24),
        ],
        links,
    }
}

pub fn two_router_topology() -> Topology {
    let net = two_router_network();
    Topology::build(&net.routers, &net.subnets, &net.links).expect("valid test topology")
}

/// S1 -> S3 tcp/80 over the two-router network
pub fn scenario_document() -> TestCaseDocument {
    TestCaseDocument {
        network: two_router_network(),
        communications: vec![comm("1", "3", "tcp", Some(80))],
    }
}

/// Subnets `0..=n` strung together by routers `1..=n`; router `i` joins
/// subnets `i-1` and `i` with derived interface names.
pub fn chain_topology(n: usize) -> Topology {
    let routers: Vec<_> = (1..=n).map(|i| router(&i.to_string())).collect();
    let subnets: Vec<_> = (0..=n)
        .map(|i| subnet(&i.to_string(), &format!("10.{}.{}.0", i / 256, i % 256), 24))
        .collect();
    let links: Vec<_> = (1..=n)
        .flat_map(|i| {
            [
                link(&i.to_string(), &(i - 1).to_string(), None),
                link(&i.to_string(), &i.to_string(), None),
            ]
        })
        .collect();
    Topology::build(&routers, &subnets, &links).expect("valid chain topology")
}

fn subnet_ref(id: &str) -> SubnetRef {
    SubnetRef {
        id: id.to_string(),
        network: format!("10.0.{id}.0/24").parse().expect("valid test network"),
    }
}

/// FORWARD accept on `device` from `eth0` to `eth1`
pub fn permit(
    device: &str,
    source: &str,
    destination: &str,
    protocol: Protocol,
    port: Option<u16>,
) -> Rule {
    Rule {
        device: device.to_string(),
        chain: Chain::Forward,
        matcher: RuleMatch {
            in_interface: Some("eth0".to_string()),
            out_interface: Some("eth1".to_string()),
            source: Some(subnet_ref(source)),
            destination: Some(subnet_ref(destination)),
            protocol,
            ports: port.map(|p| PortMatch {
                side: PortSide::Destination,
                ports: PortSet::single(p),
            }),
            state: StateMatch::Any,
        },
        action: Action::Accept,
        flows: Vec::new(),
    }
}
