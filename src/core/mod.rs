//! Core policy compiler
//!
//! Leaves first:
//!
//! - [`document`]: Input document (network + communications)
//! - [`topology`]: Validated tree of routers and subnets
//! - [`path`]: Unique path between two subnets
//! - [`flows`]: Whitelist normalized into directed flows
//! - [`firewall`]: Rule data structures
//! - [`synth`]: Per-flow, per-hop permit rules
//! - [`policy`]: Merging, conflict checks, default deny
//! - [`compile`]: Pipeline entry point
//! - [`restore`]: iptables-restore and JSON output
//! - [`verify`]: Local packet evaluation of compiled policies
//! - [`testcases`]: Test case discovery and output files
//! - [`error`]: Error types

pub mod compile;
pub mod document;
pub mod error;
pub mod firewall;
pub mod flows;
pub mod path;
pub mod policy;
pub mod restore;
pub mod synth;
pub mod testcases;
pub mod topology;
pub mod verify;

#[cfg(test)]
pub mod test_helpers;
