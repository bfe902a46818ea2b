//! treefw - Tree Firewall Compiler
//!
//! Compiles a tree-shaped network of routers and subnets plus a whitelist of
//! permitted communications into one default-deny iptables rule set per
//! router.
//!
//! # Architecture
//!
//! - [`core`] - Topology model, path resolution, rule synthesis and assembly
//! - [`report`] - JSON-lines compile report
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Compiler configuration
//! - [`utils`] - Utility functions (XDG directories, atomic writes)
//!
//! # Guarantees
//!
//! - Every permitted flow passes exactly the routers on its unique path
//! - Every rule is scoped to the ingress and egress interface of its hop
//! - Return traffic is only admitted for established connections
//! - Every chain ends with an explicit deny-all rule
//! - Output is byte-identical across runs for the same input

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod core;
pub mod report;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use config::CompilerConfig;
pub use crate::core::compile::{Compilation, compile};
pub use crate::core::error::{Error, Result};
pub use crate::core::firewall::{Protocol, Rule};
pub use crate::core::policy::CompiledPolicy;
