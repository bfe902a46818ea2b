//! Policy assembly
//!
//! Collects the per-flow rule batches into one ordered rule list per router:
//! batches are ordered by flow index, rules differing only in their port set
//! are merged in place, and every chain is closed with a deny-all rule.

use crate::core::error::{Error, Result};
use crate::core::firewall::{Action, Chain, MergeKey, PortMatch, Rule};
use crate::core::topology::Topology;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Rules synthesized for one flow
#[derive(Debug, Clone)]
pub struct FlowRules {
    pub flow: usize,
    pub rules: Vec<Rule>,
}

/// Ordered rule set of one router
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DevicePolicy {
    pub device: String,
    pub rules: Vec<Rule>,
}

impl DevicePolicy {
    /// Rules of `chain` in evaluation order
    pub fn chain(&self, chain: Chain) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.chain == chain)
    }

    /// Permit rules, i.e. everything but the terminal deny-alls
    pub fn permits(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.action == Action::Accept)
    }
}

/// The compiled rule sets of every router, in topology order
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct CompiledPolicy {
    pub devices: Vec<DevicePolicy>,
}

impl CompiledPolicy {
    pub fn device(&self, id: &str) -> Option<&DevicePolicy> {
        self.devices.iter().find(|d| d.device == id)
    }

    pub fn rule_count(&self) -> usize {
        self.devices.iter().map(|d| d.rules.len()).sum()
    }
}

/// Assembles per-flow rule batches into a [`CompiledPolicy`].
///
/// # Errors
///
/// Returns [`Error::AssemblyInvariant`] if a rule targets a router missing
/// from `topology`, or if two rules of one chain overlap with different
/// actions.
pub fn assemble(topology: &Topology, mut batches: Vec<FlowRules>) -> Result<CompiledPolicy> {
    batches.sort_by_key(|b| b.flow);

    let position: HashMap<&str, usize> = topology
        .devices()
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id.as_str(), i))
        .collect();
    let mut rules: Vec<Vec<Rule>> = vec![Vec::new(); topology.devices().len()];
    let mut merge_slots: Vec<HashMap<MergeKey, usize>> =
        vec![HashMap::new(); topology.devices().len()];
    let mut merged = 0usize;

    for rule in batches.into_iter().flat_map(|b| b.rules) {
        let Some(&d) = position.get(rule.device.as_str()) else {
            return Err(Error::AssemblyInvariant {
                device: rule.device.clone(),
                message: "rule targets a router that is not in the topology".to_string(),
            });
        };

        let key = rule.merge_key();
        if let Some(&slot) = merge_slots[d].get(&key) {
            merge_into(&mut rules[d][slot], rule);
            merged += 1;
        } else {
            merge_slots[d].insert(key, rules[d].len());
            rules[d].push(rule);
        }
    }

    let mut devices = Vec::with_capacity(rules.len());
    for (device, mut device_rules) in topology.devices().iter().zip(rules) {
        check_conflicts(&device.id, &device_rules)?;
        for chain in Chain::ALL {
            device_rules.push(Rule::deny_all(device.id.clone(), chain));
        }
        devices.push(DevicePolicy {
            device: device.id.clone(),
            rules: device_rules,
        });
    }

    let policy = CompiledPolicy { devices };
    debug!(
        "Assembled {} rules on {} routers ({} merged)",
        policy.rule_count(),
        policy.devices.len(),
        merged
    );
    Ok(policy)
}

/// Folds `rule` into `target`, which has the same merge key.
fn merge_into(target: &mut Rule, rule: Rule) {
    target.matcher.ports = match (target.matcher.ports.take(), rule.matcher.ports) {
        (Some(a), Some(b)) => Some(PortMatch {
            side: a.side,
            ports: a.ports.union(&b.ports),
        }),
        // Any port on either side admits every port
        _ => None,
    };
    for flow in rule.flows {
        if !target.flows.contains(&flow) {
            target.flows.push(flow);
        }
    }
}

fn check_conflicts(device: &str, rules: &[Rule]) -> Result<()> {
    for (i, a) in rules.iter().enumerate() {
        for b in &rules[i + 1..] {
            if a.chain == b.chain && a.action != b.action && a.matcher.overlaps(&b.matcher) {
                return Err(Error::AssemblyInvariant {
                    device: device.to_string(),
                    message: format!(
                        "rules '{}' and '{}' overlap with different actions",
                        a.describe(),
                        b.describe()
                    ),
                });
            }
        }
    }
    Ok(())
}
