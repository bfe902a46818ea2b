use thiserror::Error;

/// Core error types for treefw
///
/// Every variant aborts compilation of the current test case. The messages
/// carry the offending ids so an operator can fix the input document.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The topology is malformed, disconnected, cyclic or has duplicate ids
    #[error("Topology validation failed: {0}")]
    Topology(#[from] TopologyError),

    /// A whitelist entry is invalid
    #[error("Flow validation failed: {0}")]
    Flow(#[from] FlowError),

    /// No unique path connects two subnets
    ///
    /// Cannot happen once topology validation passed; treated as an internal
    /// invariant violation.
    #[error("No path from subnet {from} to subnet {to}: {reason}")]
    PathNotFound {
        from: String,
        to: String,
        reason: String,
    },

    /// Two rules at one device overlap with conflicting actions
    #[error("Assembly invariant violated on router {device}: {message}")]
    AssemblyInvariant { device: String, message: String },

    /// Configuration file could not be used
    #[error("Configuration error: {0}")]
    Config(String),

    /// Test case lookup failed
    #[error("Test case error: {0}")]
    TestCase(String),
}

/// Topology model validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("duplicate router id {0}")]
    DuplicateDevice(String),

    #[error("duplicate subnet id {0}")]
    DuplicateSubnet(String),

    #[error("link {router} -- {subnet} references unknown {kind} {id}")]
    UnknownLinkEndpoint {
        router: String,
        subnet: String,
        kind: &'static str,
        id: String,
    },

    #[error("link router {router} -- subnet {subnet} closes a cycle")]
    Cycle { router: String, subnet: String },

    #[error("{kind} {id} is not reachable from {root}")]
    Disconnected {
        kind: &'static str,
        id: String,
        root: String,
    },

    #[error("subnet {0} has no links")]
    IsolatedSubnet(String),

    #[error("subnet {id} has invalid address block {address}/{prefix}")]
    InvalidCidr {
        id: String,
        address: String,
        prefix: u8,
    },

    #[error("subnets {first} ({first_cidr}) and {second} ({second_cidr}) overlap")]
    OverlappingSubnets {
        first: String,
        first_cidr: String,
        second: String,
        second_cidr: String,
    },

    #[error("router {router} uses interface {interface} for more than one link")]
    DuplicateInterface { router: String, interface: String },

    #[error("router {router}: invalid interface name {interface:?}: {message}")]
    InvalidInterface {
        router: String,
        interface: String,
        message: String,
    },

    #[error("router {router}: interface address {ip} is outside subnet {subnet} ({cidr})")]
    AddressOutsideSubnet {
        router: String,
        subnet: String,
        ip: String,
        cidr: String,
    },

    #[error("invalid {kind} id {id:?}: {message}")]
    InvalidId {
        kind: &'static str,
        id: String,
        message: String,
    },
}

/// Whitelist (flow set) validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("communication #{index} references unknown subnet {subnet}")]
    UnknownSubnet { index: usize, subnet: String },

    #[error("communication #{index}: subnet {subnet} cannot communicate with itself")]
    SelfCommunication { index: usize, subnet: String },

    #[error("communication #{index}: unknown protocol {protocol:?}")]
    UnknownProtocol { index: usize, protocol: String },

    #[error("communication #{index}: invalid port predicate {spec:?}: {message}")]
    InvalidPorts {
        index: usize,
        spec: String,
        message: String,
    },

    #[error("communication #{index}: protocol {protocol} does not support ports")]
    PortsNotSupported { index: usize, protocol: String },

    #[error("{count} communications exceed the limit of {max}")]
    TooManyCommunications { count: usize, max: usize },

    #[error(
        "communications #{first} and #{second} ({source_subnet} -> {target} {protocol}) conflict in direction"
    )]
    ConflictingDirection {
        first: usize,
        second: usize,
        source_subnet: String,
        target: String,
        protocol: String,
    },
}

impl Error {
    /// Short machine-readable tag used by the compile report
    pub const fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Topology(_) => "topology_validation",
            Error::Flow(_) => "flow_validation",
            Error::PathNotFound { .. } => "path_not_found",
            Error::AssemblyInvariant { .. } => "assembly_invariant",
            Error::Config(_) => "config",
            Error::TestCase(_) => "test_case",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
