//! Path resolution between two subnets
//!
//! The topology is a tree, so exactly one simple path connects any two
//! subnets. It alternates subnet, router, subnet, ...; each router on it is
//! one [`Hop`] entered through the link facing the source side and left
//! through the link facing the destination side.

use crate::core::error::{Error, FlowError, Result};
use crate::core::firewall::SubnetRef;
use crate::core::topology::{Link, Topology};
use std::collections::{HashMap, VecDeque};

/// One router traversal of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub device: String,
    /// Link towards the source subnet
    pub ingress: Link,
    /// Link towards the destination subnet
    pub egress: Link,
}

/// Ordered hops from the source subnet to the destination subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub from: SubnetRef,
    pub to: SubnetRef,
    pub hops: Vec<Hop>,
}

impl Path {
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.hops.iter().map(|h| h.device.as_str())
    }

    pub fn contains_device(&self, device: &str) -> bool {
        self.hops.iter().any(|h| h.device == device)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Node<'a> {
    Device(&'a str),
    Subnet(&'a str),
}

/// Resolves the unique path from subnet `from` to subnet `to`.
///
/// # Errors
///
/// - [`FlowError::SelfCommunication`] if `from == to`
/// - [`Error::PathNotFound`] if either subnet is unknown, unreachable, or if
///   the traversal finds a second way to reach a node
pub fn resolve_path(topology: &Topology, from: &str, to: &str) -> Result<Path> {
    let not_found = |reason: &str| Error::PathNotFound {
        from: from.to_string(),
        to: to.to_string(),
        reason: reason.to_string(),
    };

    if from == to {
        return Err(FlowError::SelfCommunication {
            index: 0,
            subnet: from.to_string(),
        }
        .into());
    }
    let Some(source) = topology.subnet(from) else {
        return Err(not_found("source subnet is not in the topology"));
    };
    let Some(destination) = topology.subnet(to) else {
        return Err(not_found("destination subnet is not in the topology"));
    };

    // Breadth-first search; `arrived_by` records the link each node was
    // first reached through.
    let start = Node::Subnet(from);
    let mut arrived_by: HashMap<Node<'_>, Option<usize>> = HashMap::new();
    arrived_by.insert(start, None);
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        if node == Node::Subnet(to) {
            break;
        }
        let came_from = arrived_by.get(&node).copied().flatten();
        for &link_ix in incident_links(topology, node) {
            if Some(link_ix) == came_from {
                continue;
            }
            let link = topology.link(link_ix);
            let next = match node {
                Node::Subnet(_) => Node::Device(link.device.as_str()),
                Node::Device(_) => Node::Subnet(link.subnet.as_str()),
            };
            if arrived_by.contains_key(&next) {
                return Err(not_found("topology offers more than one path"));
            }
            arrived_by.insert(next, Some(link_ix));
            queue.push_back(next);
        }
    }

    if !arrived_by.contains_key(&Node::Subnet(to)) {
        return Err(not_found("destination is unreachable"));
    }

    // Walk back from the destination collecting (device, ingress, egress).
    let mut hops = Vec::new();
    let mut node = Node::Subnet(to);
    while let Some(Some(egress_ix)) = arrived_by.get(&node).copied() {
        let egress = topology.link(egress_ix);
        let device = Node::Device(egress.device.as_str());
        let Some(Some(ingress_ix)) = arrived_by.get(&device).copied() else {
            return Err(not_found("broken predecessor chain"));
        };
        let ingress = topology.link(ingress_ix);
        hops.push(Hop {
            device: egress.device.clone(),
            ingress: ingress.clone(),
            egress: egress.clone(),
        });
        node = Node::Subnet(ingress.subnet.as_str());
    }
    hops.reverse();

    Ok(Path {
        from: source.to_subnet_ref(),
        to: destination.to_subnet_ref(),
        hops,
    })
}

fn incident_links<'a>(topology: &'a Topology, node: Node<'_>) -> &'a [usize] {
    match node {
        Node::Device(id) => topology
            .device(id)
            .map(|d| d.links.as_slice())
            .unwrap_or_default(),
        Node::Subnet(id) => topology
            .subnet(id)
            .map(|s| s.links.as_slice())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::{chain_topology, two_router_topology};

    #[test]
    fn test_two_hop_path() {
        let topo = two_router_topology();
        let path = resolve_path(&topo, "1", "3").unwrap();

        assert_eq!(path.devices().collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(path.hops[0].ingress.interface, "eth0");
        assert_eq!(path.hops[0].egress.interface, "eth1");
        assert_eq!(path.hops[1].ingress.interface, "eth0");
        assert_eq!(path.hops[1].egress.interface, "eth1");
        assert_eq!(path.hops[0].egress.subnet, "2");
        assert_eq!(path.hops[1].ingress.subnet, "2");
        assert_eq!(path.from.network.to_string(), "10.0.1.0/24");
        assert_eq!(path.to.id, "3");
    }

    #[test]
    fn test_reverse_path_swaps_links() {
        let topo = two_router_topology();
        let path = resolve_path(&topo, "3", "1").unwrap();

        assert_eq!(path.devices().collect::<Vec<_>>(), vec!["2", "1"]);
        assert_eq!(path.hops[0].ingress.subnet, "3");
        assert_eq!(path.hops[0].egress.subnet, "2");
        assert_eq!(path.hops[1].egress.subnet, "1");
    }

    #[test]
    fn test_single_router_path() {
        let topo = two_router_topology();
        let path = resolve_path(&topo, "1", "2").unwrap();

        assert_eq!(path.len(), 1);
        let hop = &path.hops[0];
        assert_eq!(hop.device, "1");
        assert_eq!(hop.ingress.subnet, "1");
        assert_eq!(hop.egress.subnet, "2");
        assert_ne!(hop.ingress.interface, hop.egress.interface);
    }

    #[test]
    fn test_long_chain_path_length() {
        let topo = chain_topology(6);
        let path = resolve_path(&topo, "0", "6").unwrap();
        assert_eq!(path.len(), 6);
        assert!(path.contains_device("3"));

        let path = resolve_path(&topo, "2", "4").unwrap();
        assert_eq!(path.devices().collect::<Vec<_>>(), vec!["3", "4"]);
    }

    #[test]
    fn test_self_path_rejected() {
        let topo = two_router_topology();
        assert!(matches!(
            resolve_path(&topo, "1", "1"),
            Err(Error::Flow(FlowError::SelfCommunication { .. }))
        ));
    }

    #[test]
    fn test_unknown_subnet_rejected() {
        let topo = two_router_topology();
        let err = resolve_path(&topo, "1", "99").unwrap_err();
        assert!(matches!(err, Error::PathNotFound { ref to, .. } if to == "99"));
        let err = resolve_path(&topo, "99", "1").unwrap_err();
        assert!(matches!(err, Error::PathNotFound { .. }));
    }
}
