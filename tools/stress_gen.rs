//! Stress Test Case Generator for treefw
//!
//! Generates random but valid test cases: a tree of routers and subnets and
//! a whitelist over it. Useful for benchmarking the compiler and for fuzzing
//! it with shapes the hand-written cases never reach.
//!
//! # Usage
//!
//! ```bash
//! # 50 routers, 200 communications, written as inputs/900.json
//! cargo run --features stress_gen --bin stress_gen -- --routers 50 --communications 200 -o inputs/ --id 900
//!
//! # Reproducible generation for bug reports
//! cargo run --features stress_gen --bin stress_gen -- --seed 12345 -o /tmp/cases/
//!
//! # Generate, compile and verify in-process without writing anything
//! cargo run --features stress_gen --bin stress_gen -- --routers 500 --dry-run --compile
//! ```

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use rand::prelude::*;
use rand::rngs::StdRng;
use treefw::core::document::{
    CommDirection, CommunicationDesc, LinkDesc, NetworkDesc, PortSpec, RouterDesc, SubnetDesc,
    TestCaseDocument,
};
use treefw::core::verify::verify_policy;
use treefw::{CompilerConfig, compile};

const PROTOCOLS: [&str; 5] = ["tcp", "udp", "icmp", "sctp", "all"];
const COMMON_PORTS: [u16; 10] = [22, 25, 53, 80, 123, 443, 514, 3306, 5432, 8080];

#[derive(Parser)]
#[command(name = "stress_gen")]
#[command(about = "Generate random tree topologies and whitelists for treefw")]
struct Args {
    /// Number of routers
    #[arg(short, long, default_value = "20")]
    routers: usize,

    /// Maximum number of subnets attached to one router
    #[arg(long, default_value = "4")]
    max_degree: usize,

    /// Number of whitelist entries
    #[arg(short, long, default_value = "100")]
    communications: usize,

    /// Output directory (the test case is written as `<id>.json`)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Test case id
    #[arg(long, default_value = "900")]
    id: String,

    /// Random seed for reproducible generation
    #[arg(long)]
    seed: Option<u64>,

    /// Compile and verify the generated case, reporting timings
    #[arg(long)]
    compile: bool,

    /// Synthesize flows in parallel when compiling
    #[arg(long)]
    parallel: bool,

    /// Print statistics only, do not write
    #[arg(long)]
    dry_run: bool,
}

fn subnet_desc(index: usize) -> SubnetDesc {
    SubnetDesc {
        id: index.to_string(),
        address: Ipv4Addr::new(10, (index >> 8) as u8, index as u8, 0).into(),
        prefix: 24,
    }
}

fn link_desc(router: &str, subnet: &str, ordinal: usize) -> LinkDesc {
    LinkDesc {
        router_id: router.to_string(),
        subnet_id: subnet.to_string(),
        interface_id: Some(format!("eth{ordinal}")),
        ip: None,
    }
}

/// Grows a tree: every new router hangs off an existing subnet and gets
/// between zero and `max_degree - 1` fresh subnets of its own.
fn generate_network(rng: &mut impl Rng, routers: usize, max_degree: usize) -> NetworkDesc {
    let mut net = NetworkDesc {
        subnets: vec![subnet_desc(0)],
        ..NetworkDesc::default()
    };

    for r in 1..=routers {
        let id = r.to_string();
        let parent = rng.random_range(0..net.subnets.len());
        net.links.push(link_desc(&id, &net.subnets[parent].id, 0));

        // Keep the tree growing: the first routers always add a subnet
        let min_children = usize::from(r <= 2);
        let children = rng.random_range(min_children..max_degree.max(min_children + 1));
        for ordinal in 1..=children {
            let subnet = subnet_desc(net.subnets.len());
            net.links.push(link_desc(&id, &subnet.id, ordinal));
            net.subnets.push(subnet);
        }
        net.routers.push(RouterDesc { id });
    }
    net
}

fn random_ports(rng: &mut impl Rng) -> Option<PortSpec> {
    if rng.random_bool(0.15) {
        return None;
    }
    if rng.random_bool(0.7) {
        return COMMON_PORTS.choose(rng).map(|&p| PortSpec::Number(u32::from(p)));
    }
    let start = rng.random_range(1024..60_000u32);
    let end = rng.random_range(start..=start + 100);
    Some(PortSpec::Text(format!("{start}-{end}")))
}

fn generate_whitelist(
    rng: &mut impl Rng,
    net: &NetworkDesc,
    count: usize,
) -> Vec<CommunicationDesc> {
    let n = net.subnets.len();
    let mut entries = Vec::with_capacity(count);
    let mut seen = HashSet::new();
    if n < 2 {
        return entries;
    }

    // Bounded so tiny networks cannot loop forever on duplicates
    for _ in 0..count * 4 {
        if entries.len() == count {
            break;
        }
        let source = rng.random_range(0..n);
        let target = rng.random_range(0..n);
        if source == target {
            continue;
        }
        let protocol = PROTOCOLS.choose(rng).copied().unwrap_or("tcp");
        let port = if matches!(protocol, "tcp" | "udp" | "sctp") {
            random_ports(rng)
        } else {
            None
        };
        if !seen.insert((source, target, protocol, port.clone())) {
            continue;
        }
        entries.push(CommunicationDesc {
            source_subnet_id: source.to_string(),
            target_subnet_id: target.to_string(),
            protocol: protocol.to_string(),
            port,
            direction: if rng.random_bool(0.2) {
                CommDirection::Bidirectional
            } else {
                CommDirection::Unidirectional
            },
        });
    }
    entries
}

fn main() {
    let args = Args::parse();

    if !args.dry_run && args.output.is_none() {
        eprintln!("Error: --output is required (or use --dry-run)");
        std::process::exit(1);
    }
    if treefw::validators::validate_testcase_id(&args.id).is_err() {
        eprintln!("Error: --id must be digits only");
        std::process::exit(1);
    }

    let mut rng = match args.seed {
        Some(seed) => {
            println!("Using seed: {seed}");
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_os_rng(),
    };

    let network = generate_network(&mut rng, args.routers, args.max_degree.max(2));
    let communications = generate_whitelist(&mut rng, &network, args.communications);
    let doc = TestCaseDocument {
        network,
        communications,
    };
    println!(
        "Generated {} routers, {} subnets, {} links, {} communications",
        doc.network.routers.len(),
        doc.network.subnets.len(),
        doc.network.links.len(),
        doc.communications.len()
    );

    if args.compile {
        let config = CompilerConfig {
            parallel: args.parallel,
            ..CompilerConfig::default()
        };
        let started = Instant::now();
        match compile(&doc, &config) {
            Ok(compiled) => {
                println!(
                    "Compiled {} flows into {} rules in {:?}",
                    compiled.flows.len(),
                    compiled.policy.rule_count(),
                    started.elapsed()
                );
                let started = Instant::now();
                let result = verify_policy(&compiled);
                println!(
                    "Verification {} in {:?}",
                    if result.success { "passed" } else { "FAILED" },
                    started.elapsed()
                );
                for err in result.errors.iter().take(10) {
                    eprintln!("  {err}");
                }
                if !result.success {
                    std::process::exit(2);
                }
            }
            Err(e) => {
                eprintln!("Compilation failed: {e}");
                std::process::exit(2);
            }
        }
    }

    if args.dry_run {
        return;
    }
    let Some(dir) = args.output else { return };
    let path = dir.join(format!("{}.json", args.id));
    let json = match serde_json::to_string_pretty(&doc) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let written = treefw::utils::ensure_dir(&dir).and_then(|()| treefw::utils::write_atomic(&path, &json));
    if let Err(e) = written {
        eprintln!("Error writing {}: {e}", path.display());
        std::process::exit(1);
    }
    println!("Wrote {}", path.display());
}
