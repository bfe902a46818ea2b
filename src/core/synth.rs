//! Per-flow rule synthesis
//!
//! Every router on a flow's path gets a FORWARD permit scoped to the hop's
//! ingress and egress interfaces. Stateful flows additionally get the
//! mirrored permit for replies, restricted to established connections.

use crate::core::firewall::{
    Action, Chain, PortMatch, PortSide, Rule, RuleMatch, StateMatch,
};
use crate::core::flows::Flow;
use crate::core::path::{Hop, Path};

/// Synthesizes the permit rules realizing `flow` along `path`.
///
/// Rules follow hop order; on each hop the forward rule precedes its
/// reverse rule. Never emits deny rules.
pub fn synthesize(flow: &Flow, path: &Path) -> Vec<Rule> {
    let per_hop = if flow.is_stateful() { 2 } else { 1 };
    let mut rules = Vec::with_capacity(path.len() * per_hop);

    for hop in &path.hops {
        rules.push(forward_rule(flow, path, hop));
        if flow.is_stateful() {
            rules.push(reverse_rule(flow, path, hop));
        }
    }
    rules
}

fn forward_rule(flow: &Flow, path: &Path, hop: &Hop) -> Rule {
    Rule {
        device: hop.device.clone(),
        chain: Chain::Forward,
        matcher: RuleMatch {
            in_interface: Some(hop.ingress.interface.clone()),
            out_interface: Some(hop.egress.interface.clone()),
            source: Some(path.from.clone()),
            destination: Some(path.to.clone()),
            protocol: flow.protocol,
            ports: port_match(flow, PortSide::Destination),
            state: StateMatch::Any,
        },
        action: Action::Accept,
        flows: vec![flow.index],
    }
}

fn reverse_rule(flow: &Flow, path: &Path, hop: &Hop) -> Rule {
    Rule {
        device: hop.device.clone(),
        chain: Chain::Forward,
        matcher: RuleMatch {
            in_interface: Some(hop.egress.interface.clone()),
            out_interface: Some(hop.ingress.interface.clone()),
            source: Some(path.to.clone()),
            destination: Some(path.from.clone()),
            protocol: flow.protocol,
            ports: port_match(flow, PortSide::Source),
            state: StateMatch::Established,
        },
        action: Action::Accept,
        flows: vec![flow.index],
    }
}

fn port_match(flow: &Flow, side: PortSide) -> Option<PortMatch> {
    flow.ports.clone().map(|ports| PortMatch { side, ports })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::firewall::{PortSet, Protocol};
    use crate::core::flows::ReturnMode;
    use crate::core::path::resolve_path;
    use crate::core::test_helpers::two_router_topology;

    fn flow(protocol: Protocol, ports: Option<u16>, returns: ReturnMode) -> Flow {
        Flow {
            index: 7,
            entry: 3,
            source: "1".into(),
            destination: "3".into(),
            protocol,
            ports: ports.map(PortSet::single),
            returns,
        }
    }

    #[test]
    fn test_stateful_flow_gets_forward_and_reverse_per_hop() {
        let topo = two_router_topology();
        let path = resolve_path(&topo, "1", "3").unwrap();
        let rules = synthesize(&flow(Protocol::Tcp, Some(80), ReturnMode::Established), &path);

        assert_eq!(rules.len(), 4);
        let devices: Vec<_> = rules.iter().map(|r| r.device.as_str()).collect();
        assert_eq!(devices, vec!["1", "1", "2", "2"]);

        let fwd = &rules[0];
        assert_eq!(fwd.chain, Chain::Forward);
        assert_eq!(fwd.action, Action::Accept);
        assert_eq!(fwd.matcher.in_interface.as_deref(), Some("eth0"));
        assert_eq!(fwd.matcher.out_interface.as_deref(), Some("eth1"));
        assert_eq!(fwd.matcher.source.as_ref().unwrap().id, "1");
        assert_eq!(fwd.matcher.destination.as_ref().unwrap().id, "3");
        assert_eq!(fwd.matcher.state, StateMatch::Any);
        assert_eq!(
            fwd.matcher.ports.as_ref().map(|p| p.side),
            Some(PortSide::Destination)
        );
        assert_eq!(fwd.flows, vec![7]);

        let rev = &rules[1];
        assert_eq!(rev.matcher.in_interface.as_deref(), Some("eth1"));
        assert_eq!(rev.matcher.out_interface.as_deref(), Some("eth0"));
        assert_eq!(rev.matcher.source.as_ref().unwrap().id, "3");
        assert_eq!(rev.matcher.destination.as_ref().unwrap().id, "1");
        assert_eq!(rev.matcher.state, StateMatch::Established);
        assert_eq!(
            rev.matcher.ports.as_ref().map(|p| p.side),
            Some(PortSide::Source)
        );
    }

    #[test]
    fn test_one_way_flow_has_no_reverse() {
        let topo = two_router_topology();
        let path = resolve_path(&topo, "1", "3").unwrap();
        let rules = synthesize(&flow(Protocol::Udp, Some(53), ReturnMode::None), &path);

        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| !r.is_reverse()));
    }

    #[test]
    fn test_every_rule_is_interface_scoped() {
        let topo = two_router_topology();
        let path = resolve_path(&topo, "3", "1").unwrap();
        let rules = synthesize(&flow(Protocol::All, None, ReturnMode::Established), &path);

        for rule in &rules {
            assert!(rule.matcher.in_interface.is_some());
            assert!(rule.matcher.out_interface.is_some());
            assert!(rule.matcher.ports.is_none());
            assert!(!rule.is_deny_all());
        }
    }
}
