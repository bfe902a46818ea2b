//! Compilation entry point
//!
//! Runs the whole pipeline for one test case: topology model, flow set, path
//! resolution, rule synthesis and policy assembly. The first error aborts
//! the test case; no partial policy is ever returned.

use crate::config::CompilerConfig;
use crate::core::document::TestCaseDocument;
use crate::core::error::Result;
use crate::core::flows::{Flow, FlowSet};
use crate::core::path::resolve_path;
use crate::core::policy::{CompiledPolicy, FlowRules, assemble};
use crate::core::synth::synthesize;
use crate::core::topology::Topology;
use rayon::prelude::*;
use tracing::{debug, info};

/// Everything produced while compiling one test case
#[derive(Debug, Clone)]
pub struct Compilation {
    pub topology: Topology,
    pub flows: FlowSet,
    pub policy: CompiledPolicy,
}

/// Compiles `document` into per-router rule sets.
///
/// With `config.parallel` the per-flow work runs on the rayon pool; the
/// batches are ordered by flow index before assembly, so the result is
/// identical to the sequential run.
pub fn compile(document: &TestCaseDocument, config: &CompilerConfig) -> Result<Compilation> {
    let network = &document.network;
    let topology = Topology::build(&network.routers, &network.subnets, &network.links)?;
    let flows = FlowSet::normalize(&document.communications, &topology, config)?;

    let batches: Vec<FlowRules> = if config.parallel {
        flows
            .flows()
            .par_iter()
            .map(|flow| flow_rules(&topology, flow))
            .collect::<Result<_>>()?
    } else {
        flows
            .iter()
            .map(|flow| flow_rules(&topology, flow))
            .collect::<Result<_>>()?
    };

    let policy = assemble(&topology, batches)?;
    info!(
        "Compiled {} flows into {} rules on {} routers",
        flows.len(),
        policy.rule_count(),
        policy.devices.len()
    );

    Ok(Compilation {
        topology,
        flows,
        policy,
    })
}

fn flow_rules(topology: &Topology, flow: &Flow) -> Result<FlowRules> {
    let path = resolve_path(topology, &flow.source, &flow.destination)?;
    debug!(
        "Flow #{} {} -> {} {} crosses routers [{}]",
        flow.index,
        flow.source,
        flow.destination,
        flow.protocol,
        path.devices().collect::<Vec<_>>().join(", ")
    );
    Ok(FlowRules {
        flow: flow.index,
        rules: synthesize(flow, &path),
    })
}
