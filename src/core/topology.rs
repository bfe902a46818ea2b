//! Topology model
//!
//! Routers ("devices") and subnets form a bipartite graph whose only edge
//! kind is a router-subnet link. [`Topology::build`] checks once that the
//! graph is a tree (connected and acyclic); every later traversal relies on
//! that and never re-checks it.
//!
//! Every link carries the name of the router's local interface facing the
//! subnet. When the input does not name it, it is derived from the subnet id
//! (`sn<subnet>`), which is injective per router since a router has at most
//! one link to a given subnet.

use crate::core::document::{LinkDesc, RouterDesc, SubnetDesc};
use crate::core::error::TopologyError;
use crate::core::firewall::SubnetRef;
use crate::validators::{validate_interface, validate_node_id};
use ipnetwork::IpNetwork;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    /// Indices into [`Topology::links`], in input order
    pub links: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub id: String,
    pub network: IpNetwork,
    /// Indices into [`Topology::links`], in input order
    pub links: Vec<usize>,
}

impl Subnet {
    pub fn to_subnet_ref(&self) -> SubnetRef {
        SubnetRef {
            id: self.id.clone(),
            network: self.network,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub device: String,
    pub subnet: String,
    /// Router-local interface facing `subnet`
    pub interface: String,
    pub ip: Option<IpAddr>,
}

/// A validated tree topology; read-only after [`Topology::build`]
#[derive(Debug, Clone)]
pub struct Topology {
    devices: Vec<Device>,
    subnets: Vec<Subnet>,
    links: Vec<Link>,
    device_index: HashMap<String, usize>,
    subnet_index: HashMap<String, usize>,
}

/// Disjoint-set forest over devices followed by subnets
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Joins the sets of `a` and `b`; `false` if they were already joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        self.parent[rb] = ra;
        true
    }
}

impl Topology {
    /// Validates and builds a topology.
    ///
    /// # Errors
    ///
    /// Returns a [`TopologyError`] for duplicate or malformed ids, invalid or
    /// overlapping address blocks, links to unknown nodes, duplicate
    /// interface names, a link that closes a cycle, isolated subnets and
    /// disconnected graphs.
    pub fn build(
        routers: &[RouterDesc],
        subnets: &[SubnetDesc],
        links: &[LinkDesc],
    ) -> Result<Self, TopologyError> {
        let mut device_index = HashMap::with_capacity(routers.len());
        let mut devices = Vec::with_capacity(routers.len());
        for router in routers {
            validate_node_id(&router.id).map_err(|message| TopologyError::InvalidId {
                kind: "router",
                id: router.id.clone(),
                message,
            })?;
            if device_index.insert(router.id.clone(), devices.len()).is_some() {
                return Err(TopologyError::DuplicateDevice(router.id.clone()));
            }
            devices.push(Device {
                id: router.id.clone(),
                links: Vec::new(),
            });
        }

        let mut subnet_index = HashMap::with_capacity(subnets.len());
        let mut subnet_list: Vec<Subnet> = Vec::with_capacity(subnets.len());
        for desc in subnets {
            validate_node_id(&desc.id).map_err(|message| TopologyError::InvalidId {
                kind: "subnet",
                id: desc.id.clone(),
                message,
            })?;
            if subnet_index.insert(desc.id.clone(), subnet_list.len()).is_some() {
                return Err(TopologyError::DuplicateSubnet(desc.id.clone()));
            }
            let network = normalize_cidr(desc)?;
            if let Some(other) = subnet_list.iter().find(|s| networks_overlap(s.network, network)) {
                return Err(TopologyError::OverlappingSubnets {
                    first: other.id.clone(),
                    first_cidr: other.network.to_string(),
                    second: desc.id.clone(),
                    second_cidr: network.to_string(),
                });
            }
            subnet_list.push(Subnet {
                id: desc.id.clone(),
                network,
                links: Vec::new(),
            });
        }

        let device_count = devices.len();
        let mut forest = UnionFind::new(device_count + subnet_list.len());
        let mut link_list = Vec::with_capacity(links.len());
        let mut interfaces: HashSet<(usize, String)> = HashSet::with_capacity(links.len());
        // Names given in the input win over derived ones, wherever they appear
        let named: HashSet<(usize, &str)> = links
            .iter()
            .filter_map(|l| Some((*device_index.get(&l.router_id)?, l.interface_id.as_deref()?)))
            .collect();

        for desc in links {
            let Some(&d) = device_index.get(&desc.router_id) else {
                return Err(TopologyError::UnknownLinkEndpoint {
                    router: desc.router_id.clone(),
                    subnet: desc.subnet_id.clone(),
                    kind: "router",
                    id: desc.router_id.clone(),
                });
            };
            let Some(&s) = subnet_index.get(&desc.subnet_id) else {
                return Err(TopologyError::UnknownLinkEndpoint {
                    router: desc.router_id.clone(),
                    subnet: desc.subnet_id.clone(),
                    kind: "subnet",
                    id: desc.subnet_id.clone(),
                });
            };

            // A repeated router/subnet pair lands here too: a two-edge cycle.
            if !forest.union(d, device_count + s) {
                return Err(TopologyError::Cycle {
                    router: desc.router_id.clone(),
                    subnet: desc.subnet_id.clone(),
                });
            }

            let interface = match desc.interface_id {
                Some(ref name) => validate_interface(name).map_err(|message| {
                    TopologyError::InvalidInterface {
                        router: desc.router_id.clone(),
                        interface: name.clone(),
                        message,
                    }
                })?,
                None => derive_interface(&desc.subnet_id, devices[d].links.len(), |name| {
                    named.contains(&(d, name)) || interfaces.contains(&(d, name.to_string()))
                }),
            };
            if !interfaces.insert((d, interface.clone())) {
                return Err(TopologyError::DuplicateInterface {
                    router: desc.router_id.clone(),
                    interface,
                });
            }

            let subnet = &subnet_list[s];
            if let Some(ip) = desc.ip
                && !subnet.network.contains(ip)
            {
                return Err(TopologyError::AddressOutsideSubnet {
                    router: desc.router_id.clone(),
                    subnet: subnet.id.clone(),
                    ip: ip.to_string(),
                    cidr: subnet.network.to_string(),
                });
            }

            let index = link_list.len();
            devices[d].links.push(index);
            subnet_list[s].links.push(index);
            link_list.push(Link {
                device: desc.router_id.clone(),
                subnet: desc.subnet_id.clone(),
                interface,
                ip: desc.ip,
            });
        }

        if let Some(isolated) = subnet_list.iter().find(|s| s.links.is_empty()) {
            return Err(TopologyError::IsolatedSubnet(isolated.id.clone()));
        }

        // Connectivity: every node must share the root's set.
        let root = subnet_list
            .first()
            .map(|s| (device_count, "subnet", s.id.clone()))
            .or_else(|| devices.first().map(|d| (0, "router", d.id.clone())));
        if let Some((root_ix, root_kind, root_id)) = root {
            let root_set = forest.find(root_ix);
            let nodes = devices
                .iter()
                .map(|d| ("router", d.id.as_str()))
                .chain(subnet_list.iter().map(|s| ("subnet", s.id.as_str())));
            for (ix, (kind, id)) in nodes.enumerate() {
                if forest.find(ix) != root_set {
                    return Err(TopologyError::Disconnected {
                        kind,
                        id: id.to_string(),
                        root: format!("{root_kind} {root_id}"),
                    });
                }
            }
        }

        debug!(
            "Built topology: {} routers, {} subnets, {} links",
            devices.len(),
            subnet_list.len(),
            link_list.len()
        );

        Ok(Self {
            devices,
            subnets: subnet_list,
            links: link_list,
            device_index,
            subnet_index,
        })
    }

    /// Routers in input order
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Subnets in input order
    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link(&self, index: usize) -> &Link {
        &self.links[index]
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.device_index.get(id).map(|&i| &self.devices[i])
    }

    pub fn subnet(&self, id: &str) -> Option<&Subnet> {
        self.subnet_index.get(id).map(|&i| &self.subnets[i])
    }

    pub fn has_subnet(&self, id: &str) -> bool {
        self.subnet_index.contains_key(id)
    }

    /// Interface name of `device` facing neighboring `subnet`, if linked
    pub fn interface(&self, device: &str, subnet: &str) -> Option<&str> {
        self.device(device)?
            .links
            .iter()
            .map(|&l| &self.links[l])
            .find(|l| l.subnet == subnet)
            .map(|l| l.interface.as_str())
    }

    /// Links attached to `device`, in input order
    pub fn device_links(&self, device: &str) -> impl Iterator<Item = &Link> {
        self.device(device)
            .into_iter()
            .flat_map(move |d| d.links.iter().map(move |&l| &self.links[l]))
    }
}

fn normalize_cidr(desc: &SubnetDesc) -> Result<IpNetwork, TopologyError> {
    let invalid = || TopologyError::InvalidCidr {
        id: desc.id.clone(),
        address: desc.address.to_string(),
        prefix: desc.prefix,
    };
    let raw = IpNetwork::new(desc.address, desc.prefix).map_err(|_| invalid())?;
    let network = IpNetwork::new(raw.network(), desc.prefix).map_err(|_| invalid())?;
    if network.ip() != desc.address {
        warn!(
            "Subnet {} address {} has host bits set, using {}",
            desc.id, raw, network
        );
    }
    Ok(network)
}

fn networks_overlap(a: IpNetwork, b: IpNetwork) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// Interface name for a link the input did not name, skipping names
/// for which `taken` holds
fn derive_interface(subnet: &str, ordinal: usize, taken: impl Fn(&str) -> bool) -> String {
    let name = format!("sn{subnet}");
    let base = if validate_interface(&name).is_ok() {
        name
    } else {
        format!("if{ordinal}")
    };
    if !taken(&base) {
        return base;
    }
    (1..)
        .map(|k| {
            let suffixed = format!("{base}-{k}");
            if validate_interface(&suffixed).is_ok() {
                suffixed
            } else {
                format!("if{ordinal}-{k}")
            }
        })
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}
