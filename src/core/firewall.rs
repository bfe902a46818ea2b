//! Filter rule data structures
//!
//! This module defines the rule model shared by the synthesizer, the policy
//! assembler, the evaluator and the restore writer.
//!
//! # Rule Structure
//!
//! A [`Rule`] is one packet-filter decision on one router:
//! - Chain (INPUT, FORWARD, OUTPUT)
//! - Match predicate: in/out interface, source/destination subnet, protocol,
//!   port match (destination or source side), connection state
//! - Action (Accept or Drop)
//! - Indices of the flows it was synthesized from
//!
//! Synthesized rules always scope both interfaces of a hop; only the
//! assembler-injected deny-all rules leave the match empty.
//!
//! # Example
//!
//! ```
//! use treefw::core::firewall::{Chain, PortSet, Protocol, Rule};
//!
//! let deny = Rule::deny_all("1", Chain::Forward);
//! assert!(deny.is_deny_all());
//!
//! let ports: PortSet = "80,443,8000-8080".parse().unwrap();
//! assert!(ports.contains(8042));
//! assert!(!ports.contains(81));
//! assert_eq!(Protocol::Tcp.to_string(), "tcp");
//! ```

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of communications accepted in one test case
///
/// Prevents memory exhaustion from malformed documents; real course inputs
/// stay far below this.
pub const MAX_COMMUNICATIONS: usize = 100_000;

/// Network protocol named by a whitelist entry
///
/// `Copy` trait allows efficient passing by value for this small enum.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Protocol {
    /// Transmission Control Protocol
    #[strum(serialize = "tcp")]
    Tcp,
    /// User Datagram Protocol
    #[strum(serialize = "udp")]
    Udp,
    /// Internet Control Message Protocol
    #[strum(serialize = "icmp")]
    Icmp,
    /// Stream Control Transmission Protocol
    #[strum(serialize = "sctp")]
    Sctp,
    /// Any protocol
    #[strum(to_string = "all", serialize = "any")]
    All,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Sctp => "sctp",
            Protocol::All => "all",
        }
    }

    /// Returns `true` if return traffic must be admitted through connection
    /// tracking rather than a separate whitelist entry.
    pub const fn is_connection_oriented(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Sctp)
    }

    /// Returns `true` if the protocol carries port numbers.
    pub const fn supports_ports(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp | Protocol::Sctp)
    }

    /// Returns `true` if a packet of protocol `other` is matched by `self`.
    pub fn covers(self, other: Protocol) -> bool {
        self == Protocol::All || self == other
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub const fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    pub const fn is_single(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A normalized set of ports
///
/// Ranges are sorted, non-overlapping and non-adjacent, so two sets admitting
/// the same ports compare equal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(transparent)]
pub struct PortSet {
    ranges: Vec<PortRange>,
}

impl PortSet {
    pub fn single(port: u16) -> Self {
        Self {
            ranges: vec![PortRange::single(port)],
        }
    }

    /// Builds a normalized set from arbitrary (possibly overlapping) ranges.
    pub fn from_ranges(ranges: impl IntoIterator<Item = PortRange>) -> Self {
        let mut ranges: Vec<PortRange> = ranges.into_iter().collect();
        ranges.sort_unstable();

        let mut merged: Vec<PortRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if u32::from(range.start) <= u32::from(last.end) + 1 => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }
        Self { ranges: merged }
    }

    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(port))
    }

    /// Exact union: admits a port iff one of the operands admits it.
    pub fn union(&self, other: &PortSet) -> PortSet {
        Self::from_ranges(self.ranges.iter().chain(other.ranges.iter()).copied())
    }

    pub fn intersects(&self, other: &PortSet) -> bool {
        self.ranges.iter().any(|a| {
            other
                .ranges
                .iter()
                .any(|b| a.start <= b.end && b.start <= a.end)
        })
    }

    /// Number of multiport slots the set occupies (a range takes two).
    pub fn slots(&self) -> usize {
        self.ranges
            .iter()
            .map(|r| if r.is_single() { 1 } else { 2 })
            .sum()
    }
}

impl fmt::Display for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

impl FromStr for PortSet {
    type Err = String;

    /// Parses `"80"`, `"8000-8080"` or comma-separated lists of both.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ranges = Vec::new();
        for part in s.split(',').map(str::trim) {
            if part.is_empty() {
                return Err("empty port entry".to_string());
            }
            let (start, end) = match part.split_once('-') {
                Some((a, b)) => (parse_port(a)?, parse_port(b)?),
                None => {
                    let port = parse_port(part)?;
                    (port, port)
                }
            };
            let (start, end) = crate::validators::validate_port_range(start, end)?;
            ranges.push(PortRange { start, end });
        }
        Ok(Self::from_ranges(ranges))
    }
}

fn parse_port(s: &str) -> Result<u16, String> {
    s.trim()
        .parse::<u16>()
        .map_err(|_| format!("'{}' is not a port number", s.trim()))
}

/// Which transport header field a port set is matched against
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum PortSide {
    #[strum(serialize = "destination")]
    Destination,
    #[strum(serialize = "source")]
    Source,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PortMatch {
    pub side: PortSide,
    pub ports: PortSet,
}

/// Rule action (Accept or Drop)
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Accept the packet (allow it through)
    #[default]
    #[strum(serialize = "accept")]
    Accept,
    /// Drop the packet silently
    #[strum(serialize = "drop")]
    Drop,
}

impl Action {
    /// Returns the iptables jump target
    pub const fn target(self) -> &'static str {
        match self {
            Action::Accept => "ACCEPT",
            Action::Drop => "DROP",
        }
    }
}

/// Filter chain a rule belongs to
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    /// Traffic addressed to the router itself
    #[strum(serialize = "INPUT")]
    Input,
    /// Traffic routed through the router
    #[strum(serialize = "FORWARD")]
    Forward,
    /// Traffic originating on the router
    #[strum(serialize = "OUTPUT")]
    Output,
}

impl Chain {
    /// All chains, in the order default-deny rules are appended
    pub const ALL: [Chain; 3] = [Chain::Input, Chain::Forward, Chain::Output];
}

/// Connection-tracking predicate of a rule
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum StateMatch {
    /// Stateless match, any connection state
    #[default]
    #[strum(serialize = "any")]
    Any,
    /// Only packets of an already established (or related) connection
    #[strum(serialize = "established")]
    Established,
}

impl StateMatch {
    /// Port side synthesized rules use for this state: new connections are
    /// matched on the service (destination) port, replies on the source port
    pub const fn port_side(self) -> PortSide {
        match self {
            StateMatch::Any => PortSide::Destination,
            StateMatch::Established => PortSide::Source,
        }
    }
}

/// A subnet as referenced by a rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubnetRef {
    pub id: String,
    pub network: IpNetwork,
}

impl fmt::Display for SubnetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.network)
    }
}

/// Match predicate; `None` fields match anything
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RuleMatch {
    pub in_interface: Option<String>,
    pub out_interface: Option<String>,
    pub source: Option<SubnetRef>,
    pub destination: Option<SubnetRef>,
    pub protocol: Protocol,
    pub ports: Option<PortMatch>,
    #[serde(default)]
    pub state: StateMatch,
}

impl RuleMatch {
    /// The predicate matching every packet
    pub fn everything() -> Self {
        Self {
            in_interface: None,
            out_interface: None,
            source: None,
            destination: None,
            protocol: Protocol::All,
            ports: None,
            state: StateMatch::Any,
        }
    }

    /// Returns `true` if some packet could match both predicates.
    ///
    /// Conservative: answers `true` whenever it cannot prove disjointness.
    pub fn overlaps(&self, other: &RuleMatch) -> bool {
        fn same_or_wild(a: Option<&String>, b: Option<&String>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }
        fn networks_meet(a: Option<&SubnetRef>, b: Option<&SubnetRef>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => {
                    a.network.contains(b.network.network()) || b.network.contains(a.network.network())
                }
                _ => true,
            }
        }

        let protocols = self.protocol.covers(other.protocol) || other.protocol.covers(self.protocol);
        let ports = match (&self.ports, &other.ports) {
            (Some(a), Some(b)) if a.side == b.side => a.ports.intersects(&b.ports),
            _ => true,
        };
        let states = self.state == other.state
            || self.state == StateMatch::Any
            || other.state == StateMatch::Any;

        same_or_wild(self.in_interface.as_ref(), other.in_interface.as_ref())
            && same_or_wild(self.out_interface.as_ref(), other.out_interface.as_ref())
            && networks_meet(self.source.as_ref(), other.source.as_ref())
            && networks_meet(self.destination.as_ref(), other.destination.as_ref())
            && protocols
            && ports
            && states
    }
}

/// Everything except the port set; rules sharing a key may be merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeKey {
    pub chain: Chain,
    pub in_interface: Option<String>,
    pub out_interface: Option<String>,
    pub source: Option<SubnetRef>,
    pub destination: Option<SubnetRef>,
    pub protocol: Protocol,
    /// Side an any-port rule would match on had it ports; lets "any port"
    /// meet the port sets it absorbs
    pub port_side: PortSide,
    pub state: StateMatch,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    /// Router the rule is installed on
    pub device: String,
    pub chain: Chain,
    #[serde(rename = "match")]
    pub matcher: RuleMatch,
    pub action: Action,
    /// Indices of the flows this rule realizes (empty for deny-all)
    #[serde(default)]
    pub flows: Vec<usize>,
}

impl Rule {
    /// Terminal rule dropping everything that reached the end of `chain`
    pub fn deny_all(device: impl Into<String>, chain: Chain) -> Self {
        Self {
            device: device.into(),
            chain,
            matcher: RuleMatch::everything(),
            action: Action::Drop,
            flows: Vec::new(),
        }
    }

    pub fn is_deny_all(&self) -> bool {
        self.action == Action::Drop && self.matcher == RuleMatch::everything()
    }

    /// Returns `true` for the established-state half of a stateful flow.
    pub fn is_reverse(&self) -> bool {
        self.matcher.state == StateMatch::Established
    }

    pub fn merge_key(&self) -> MergeKey {
        MergeKey {
            chain: self.chain,
            in_interface: self.matcher.in_interface.clone(),
            out_interface: self.matcher.out_interface.clone(),
            source: self.matcher.source.clone(),
            destination: self.matcher.destination.clone(),
            protocol: self.matcher.protocol,
            port_side: self
                .matcher
                .ports
                .as_ref()
                .map_or_else(|| self.matcher.state.port_side(), |p| p.side),
            state: self.matcher.state,
            action: self.action,
        }
    }

    /// Short human-readable description used in logs and comments
    pub fn describe(&self) -> String {
        let endpoint = |s: &Option<SubnetRef>| {
            s.as_ref()
                .map_or_else(|| "any".to_string(), |s| s.id.clone())
        };
        let mut out = format!(
            "{} {} -> {} {}",
            self.chain,
            endpoint(&self.matcher.source),
            endpoint(&self.matcher.destination),
            self.matcher.protocol
        );
        if let Some(ref ports) = self.matcher.ports {
            let side = match ports.side {
                PortSide::Destination => "dport",
                PortSide::Source => "sport",
            };
            out.push_str(&format!(" {side} {}", ports.ports));
        }
        if self.matcher.state == StateMatch::Established {
            out.push_str(" established");
        }
        out.push(' ');
        out.push_str(self.action.as_ref());
        out
    }
}
