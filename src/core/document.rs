//! Test case input document
//!
//! One JSON document per test case describes the network and the whitelist:
//!
//! ```json
//! {
//!   "network": {
//!     "routers": [{ "id": 1 }],
//!     "subnets": [{ "id": 1, "address": "10.0.1.0", "prefix": 24 }],
//!     "links":   [{ "routerId": 1, "subnetId": 1, "interfaceId": "eth0", "ip": "10.0.1.1" }]
//!   },
//!   "communications": [
//!     { "sourceSubnetId": 1, "targetSubnetId": 2, "protocol": "tcp",
//!       "port": 80, "direction": "unidirectional" }
//!   ]
//! }
//! ```
//!
//! Ids may be JSON numbers or strings; both are normalized to strings.

use serde::{Deserialize, Deserializer, Serialize};
use std::net::IpAddr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCaseDocument {
    pub network: NetworkDesc,
    #[serde(default)]
    pub communications: Vec<CommunicationDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NetworkDesc {
    #[serde(default)]
    pub routers: Vec<RouterDesc>,
    #[serde(default)]
    pub subnets: Vec<SubnetDesc>,
    #[serde(default)]
    pub links: Vec<LinkDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterDesc {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubnetDesc {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub address: IpAddr,
    pub prefix: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkDesc {
    #[serde(deserialize_with = "de_id")]
    pub router_id: String,
    #[serde(deserialize_with = "de_id")]
    pub subnet_id: String,
    /// Interface name on the router; derived from the subnet id when absent
    #[serde(default, deserialize_with = "de_opt_id", skip_serializing_if = "Option::is_none")]
    pub interface_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
}

/// Who may initiate a whitelisted communication
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum CommDirection {
    /// Only the source subnet initiates
    #[default]
    #[strum(serialize = "unidirectional")]
    Unidirectional,
    /// Either subnet initiates
    #[strum(serialize = "bidirectional")]
    Bidirectional,
}

/// Port predicate as written in the document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u32),
    Text(String),
}

impl PortSpec {
    pub fn as_text(&self) -> String {
        match self {
            PortSpec::Number(n) => n.to_string(),
            PortSpec::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationDesc {
    #[serde(deserialize_with = "de_id")]
    pub source_subnet_id: String,
    #[serde(deserialize_with = "de_id")]
    pub target_subnet_id: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSpec>,
    #[serde(default)]
    pub direction: CommDirection,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
}
