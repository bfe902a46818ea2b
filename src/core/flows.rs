//! Whitelist normalization
//!
//! Turns the document's communication entries into directed [`Flow`]s:
//!
//! - `bidirectional` entries become two flows, one per initiating side
//! - connection-oriented protocols (TCP, SCTP) always get an
//!   established-state return path
//! - connectionless protocols get the return path selected by
//!   [`CompilerConfig::connectionless_replies`]
//! - identical entries and identical directed flows collapse to their first
//!   occurrence

use crate::config::{CompilerConfig, ConnectionlessReplies};
use crate::core::document::{CommDirection, CommunicationDesc};
use crate::core::error::FlowError;
use crate::core::firewall::{MAX_COMMUNICATIONS, PortSet, Protocol};
use crate::core::topology::Topology;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::debug;

/// Return traffic admitted for a flow
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum ReturnMode {
    /// One-way: nothing flows back
    #[strum(serialize = "none")]
    None,
    /// Replies belonging to a tracked connection
    #[strum(serialize = "established")]
    Established,
}

/// A normalized, directed permitted communication
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Flow {
    /// Position in the flow set; fixes rule order
    pub index: usize,
    /// Index of the whitelist entry it came from
    pub entry: usize,
    pub source: String,
    pub destination: String,
    pub protocol: Protocol,
    /// `None` matches any port
    pub ports: Option<PortSet>,
    pub returns: ReturnMode,
}

impl Flow {
    pub fn is_stateful(&self) -> bool {
        self.returns == ReturnMode::Established
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowSet {
    flows: Vec<Flow>,
}

type EntryKey = (String, String, Protocol, Option<PortSet>);

impl FlowSet {
    /// Validates and normalizes whitelist entries against `topology`.
    ///
    /// # Errors
    ///
    /// Returns a [`FlowError`] naming the offending entry for unknown
    /// subnets, self-communication, unknown protocols, invalid or
    /// unsupported ports, and entries that conflict in direction.
    pub fn normalize(
        entries: &[CommunicationDesc],
        topology: &Topology,
        config: &CompilerConfig,
    ) -> Result<Self, FlowError> {
        if entries.len() > MAX_COMMUNICATIONS {
            return Err(FlowError::TooManyCommunications {
                count: entries.len(),
                max: MAX_COMMUNICATIONS,
            });
        }

        let mut seen_entries: HashMap<EntryKey, (usize, CommDirection)> = HashMap::new();
        let mut seen_flows: HashSet<(String, String, Protocol, Option<PortSet>)> = HashSet::new();
        let mut flows = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let protocol = Protocol::from_str(entry.protocol.trim()).map_err(|_| {
                FlowError::UnknownProtocol {
                    index,
                    protocol: entry.protocol.clone(),
                }
            })?;

            for subnet in [&entry.source_subnet_id, &entry.target_subnet_id] {
                if !topology.has_subnet(subnet) {
                    return Err(FlowError::UnknownSubnet {
                        index,
                        subnet: subnet.clone(),
                    });
                }
            }
            if entry.source_subnet_id == entry.target_subnet_id {
                return Err(FlowError::SelfCommunication {
                    index,
                    subnet: entry.source_subnet_id.clone(),
                });
            }

            let ports = match entry.port {
                None => None,
                Some(ref spec) => {
                    if !protocol.supports_ports() {
                        return Err(FlowError::PortsNotSupported {
                            index,
                            protocol: protocol.to_string(),
                        });
                    }
                    let text = spec.as_text();
                    Some(PortSet::from_str(&text).map_err(|message| {
                        FlowError::InvalidPorts {
                            index,
                            spec: text.clone(),
                            message,
                        }
                    })?)
                }
            };

            let key = (
                entry.source_subnet_id.clone(),
                entry.target_subnet_id.clone(),
                protocol,
                ports.clone(),
            );
            match seen_entries.get(&key) {
                Some(&(first, direction)) if direction != entry.direction => {
                    return Err(FlowError::ConflictingDirection {
                        first,
                        second: index,
                        source_subnet: entry.source_subnet_id.clone(),
                        target: entry.target_subnet_id.clone(),
                        protocol: protocol.to_string(),
                    });
                }
                Some(&(first, _)) => {
                    debug!("Communication #{} duplicates #{}, skipping", index, first);
                    continue;
                }
                None => {
                    seen_entries.insert(key, (index, entry.direction));
                }
            }

            let returns = if protocol.is_connection_oriented() {
                ReturnMode::Established
            } else {
                match config.connectionless_replies {
                    ConnectionlessReplies::None => ReturnMode::None,
                    ConnectionlessReplies::Established => ReturnMode::Established,
                }
            };

            let mut directed = vec![(&entry.source_subnet_id, &entry.target_subnet_id)];
            if entry.direction == CommDirection::Bidirectional {
                directed.push((&entry.target_subnet_id, &entry.source_subnet_id));
            }

            for (source, destination) in directed {
                let flow_key = (source.clone(), destination.clone(), protocol, ports.clone());
                if !seen_flows.insert(flow_key) {
                    debug!(
                        "Flow {} -> {} {} from communication #{} already present",
                        source, destination, protocol, index
                    );
                    continue;
                }
                flows.push(Flow {
                    index: flows.len(),
                    entry: index,
                    source: source.clone(),
                    destination: destination.clone(),
                    protocol,
                    ports: ports.clone(),
                    returns,
                });
            }
        }

        debug!(
            "Normalized {} communications into {} flows",
            entries.len(),
            flows.len()
        );
        Ok(Self { flows })
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Flow> {
        self.flows.iter()
    }
}

impl<'a> IntoIterator for &'a FlowSet {
    type Item = &'a Flow;
    type IntoIter = std::slice::Iter<'a, Flow>;

    fn into_iter(self) -> Self::IntoIter {
        self.flows.iter()
    }
}
