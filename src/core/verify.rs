//! Local verification of a compiled policy
//!
//! Evaluates synthetic packets against the compiled rule sets with
//! iptables first-match semantics and checks that the policy realizes the
//! whitelist: each flow passes exactly the routers on its path, stateful
//! return rules only admit established traffic, and every chain ends with a
//! deny-all rule.

use crate::core::compile::Compilation;
use crate::core::firewall::{Action, Chain, PortSide, Protocol, Rule, RuleMatch, StateMatch};
use crate::core::flows::Flow;
use crate::core::path::resolve_path;
use crate::core::policy::DevicePolicy;
use crate::core::topology::Topology;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Client-side port used by probe packets
const EPHEMERAL_PORT: u16 = 40_000;

/// Result of a policy verification
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub success: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Creates a successful verification result
    pub fn success() -> Self {
        Self {
            success: true,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Creates a failed verification result with errors
    pub fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            warnings: Vec::new(),
            errors,
        }
    }

    fn error(&mut self, message: String) {
        self.success = false;
        self.errors.push(message);
    }
}

/// A packet as seen by one router's FORWARD chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub in_interface: String,
    pub out_interface: String,
    pub source: IpAddr,
    pub destination: IpAddr,
    /// Concrete protocol; never [`Protocol::All`]
    pub protocol: Protocol,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
    /// Belongs to a tracked connection
    pub established: bool,
}

impl Packet {
    fn reply(&self) -> Self {
        Self {
            in_interface: self.out_interface.clone(),
            out_interface: self.in_interface.clone(),
            source: self.destination,
            destination: self.source,
            protocol: self.protocol,
            source_port: self.destination_port,
            destination_port: self.source_port,
            established: true,
        }
    }
}

/// Returns `true` if `packet` satisfies every predicate of `matcher`.
pub fn matches(matcher: &RuleMatch, packet: &Packet) -> bool {
    if matcher
        .in_interface
        .as_ref()
        .is_some_and(|i| *i != packet.in_interface)
        || matcher
            .out_interface
            .as_ref()
            .is_some_and(|o| *o != packet.out_interface)
    {
        return false;
    }
    if matcher
        .source
        .as_ref()
        .is_some_and(|s| !s.network.contains(packet.source))
        || matcher
            .destination
            .as_ref()
            .is_some_and(|d| !d.network.contains(packet.destination))
    {
        return false;
    }
    if !matcher.protocol.covers(packet.protocol) {
        return false;
    }
    if let Some(ref ports) = matcher.ports {
        let port = match ports.side {
            PortSide::Destination => packet.destination_port,
            PortSide::Source => packet.source_port,
        };
        if !port.is_some_and(|p| ports.ports.contains(p)) {
            return false;
        }
    }
    matcher.state == StateMatch::Any || packet.established
}

/// First rule of `chain` on `device` matching `packet`.
///
/// `None` means the chain policy decides; compiled policies always end in a
/// deny-all so this only happens for hand-built rule lists.
pub fn evaluate<'a>(device: &'a DevicePolicy, chain: Chain, packet: &Packet) -> Option<&'a Rule> {
    device.chain(chain).find(|r| matches(&r.matcher, packet))
}

/// Checks the compiled policy against the flows it was compiled from.
pub fn verify_policy(compilation: &Compilation) -> VerifyResult {
    let mut result = VerifyResult::success();
    let topology = &compilation.topology;
    let policy = &compilation.policy;

    for device in &policy.devices {
        for chain in Chain::ALL {
            if !device.chain(chain).last().is_some_and(Rule::is_deny_all) {
                result.error(format!(
                    "router {}: {chain} chain does not end with a deny-all rule",
                    device.device
                ));
            }
        }
        for chain in [Chain::Input, Chain::Output] {
            let permits = device
                .chain(chain)
                .filter(|r| r.action == Action::Accept)
                .count();
            if permits > 0 {
                result.warnings.push(format!(
                    "router {}: {permits} permit rule(s) in {chain}",
                    device.device
                ));
            }
        }
    }

    for flow in compilation.flows.iter() {
        verify_flow(topology, compilation, flow, &mut result);
    }

    if result.success {
        info!(
            "Verified {} flows on {} routers",
            compilation.flows.len(),
            policy.devices.len()
        );
    } else {
        warn!("Verification found {} problem(s)", result.errors.len());
    }
    result
}

fn verify_flow(topology: &Topology, compilation: &Compilation, flow: &Flow, result: &mut VerifyResult) {
    let path = match resolve_path(topology, &flow.source, &flow.destination) {
        Ok(path) => path,
        Err(e) => {
            result.error(format!("flow #{}: {e}", flow.index));
            return;
        }
    };

    let protocol = match flow.protocol {
        Protocol::All => Protocol::Udp,
        other => other,
    };
    let (source_port, destination_port) = if protocol.supports_ports() {
        let port = flow
            .ports
            .as_ref()
            .and_then(|p| p.ranges().first())
            .map_or(EPHEMERAL_PORT + 1, |r| r.start);
        (Some(EPHEMERAL_PORT), Some(port))
    } else {
        (None, None)
    };
    let probe = |in_interface: &str, out_interface: &str| Packet {
        in_interface: in_interface.to_string(),
        out_interface: out_interface.to_string(),
        source: host_address(path.from.network),
        destination: host_address(path.to.network),
        protocol,
        source_port,
        destination_port,
        established: false,
    };

    for hop in &path.hops {
        let Some(device) = compilation.policy.device(&hop.device) else {
            result.error(format!("flow #{}: router {} has no rule set", flow.index, hop.device));
            continue;
        };
        let packet = probe(&hop.ingress.interface, &hop.egress.interface);
        if !admitted(device, &packet) {
            result.error(format!(
                "flow #{}: router {} drops {} -> {} {}",
                flow.index, hop.device, flow.source, flow.destination, flow.protocol
            ));
        }

        let reply = packet.reply();
        let reply_admitted = admitted(device, &reply);
        if flow.is_stateful() && !reply_admitted {
            result.error(format!(
                "flow #{}: router {} drops established replies",
                flow.index, hop.device
            ));
        }

        // A new connection from the far side must never ride on this flow's
        // rules; other flows may legitimately admit it.
        let mut unsolicited = reply;
        unsolicited.established = false;
        if admitted_by_flow(device, &unsolicited, flow.index) {
            result.error(format!(
                "flow #{}: router {} admits new connections in the reverse direction",
                flow.index, hop.device
            ));
        }
        if !flow.is_stateful() && admitted_by_flow(device, &packet.reply(), flow.index) {
            result.error(format!(
                "flow #{}: router {} admits replies to a one-way flow",
                flow.index, hop.device
            ));
        }
    }

    // Off-path routers must not carry the flow on any interface pair.
    for device in &compilation.policy.devices {
        if path.contains_device(&device.device) {
            continue;
        }
        let interfaces: Vec<&str> = topology
            .device_links(&device.device)
            .map(|l| l.interface.as_str())
            .collect();
        for &in_if in &interfaces {
            for &out_if in &interfaces {
                if in_if != out_if && admitted_by_flow(device, &probe(in_if, out_if), flow.index) {
                    result.error(format!(
                        "flow #{}: off-path router {} admits it ({in_if} -> {out_if})",
                        flow.index, device.device
                    ));
                }
            }
        }
    }

    debug!("Checked flow #{} over {} hops", flow.index, path.len());
}

fn admitted(device: &DevicePolicy, packet: &Packet) -> bool {
    evaluate(device, Chain::Forward, packet).is_some_and(|r| r.action == Action::Accept)
}

fn admitted_by_flow(device: &DevicePolicy, packet: &Packet, flow: usize) -> bool {
    evaluate(device, Chain::Forward, packet)
        .is_some_and(|r| r.action == Action::Accept && r.flows.contains(&flow))
}

/// First host address of `network` (the network address for /31, /32)
fn host_address(network: IpNetwork) -> IpAddr {
    match network {
        IpNetwork::V4(net) if net.prefix() < 31 => {
            IpAddr::V4(std::net::Ipv4Addr::from(u32::from(net.network()) + 1))
        }
        IpNetwork::V6(net) if net.prefix() < 127 => {
            IpAddr::V6(std::net::Ipv6Addr::from(u128::from(net.network()) + 1))
        }
        other => other.network(),
    }
}
