//! treefw - Tree Firewall Compiler
//!
//! Reads test cases (`<id>.json`: a tree network of routers and subnets plus
//! a whitelist of communications) and writes one iptables-restore file per
//! router.
//!
//! # Usage
//!
//! ```bash
//! treefw compile                        # inputs/*.json -> outputs/<id>/<router>
//! treefw compile -i cases/ -o out/ -t 3 # one test case
//! treefw list                           # List discovered test cases
//! treefw check -t 3                     # Compile and verify, write nothing
//! treefw diff -t 3                      # Compare outputs on disk with a fresh compile
//! treefw show -t 3 --format json        # Print the compiled policy
//! ```

use clap::{ArgAction, Parser, Subcommand};
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};
use treefw::config::{CompilerConfig, load_config};
use treefw::core::testcases::{list_testcases, load_testcase, read_outputs, write_outputs};
use treefw::core::{restore, verify};
use treefw::report::{self, CompileReport};
use treefw::utils::{ensure_dir, numeric_aware_cmp};
use treefw::validators::check_well_known_port;
use treefw::{Compilation, compile};

#[derive(Parser)]
#[command(name = "treefw", version)]
#[command(about = "Compiles tree topologies and whitelists into per-router iptables rules", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Compiler config file (default: XDG config dir, config.json)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile test cases and write the rule files
    Compile {
        /// Directory with `<id>.json` test cases
        #[arg(short, long, default_value = "inputs/")]
        input: PathBuf,
        /// Directory receiving `<id>/<router id>` rule files
        #[arg(short, long, default_value = "outputs/")]
        output: PathBuf,
        /// Compile only this test case
        #[arg(short, long, value_name = "ID")]
        testcase: Option<String>,
    },
    /// List discovered test cases
    List {
        #[arg(short, long, default_value = "inputs/")]
        input: PathBuf,
    },
    /// Compile and verify test cases without writing anything
    Check {
        #[arg(short, long, default_value = "inputs/")]
        input: PathBuf,
        #[arg(short, long, value_name = "ID")]
        testcase: Option<String>,
    },
    /// Diff the rule files on disk against a fresh compilation
    Diff {
        #[arg(short, long, default_value = "inputs/")]
        input: PathBuf,
        #[arg(short, long, default_value = "outputs/")]
        output: PathBuf,
        #[arg(short, long, value_name = "ID")]
        testcase: String,
    },
    /// Print the compiled policy of one test case
    Show {
        #[arg(short, long, default_value = "inputs/")]
        input: PathBuf,
        #[arg(short, long, value_name = "ID")]
        testcase: String,
        /// Output format (restore or json)
        #[arg(short, long, default_value = "restore")]
        format: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(handle_cli(cli.command, cli.config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn handle_cli(
    command: Commands,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path.as_deref()).await?;

    match command {
        Commands::Compile {
            input,
            output,
            testcase,
        } => {
            let ids = select_testcases(&input, testcase).await?;
            ensure_dir(&output)?;
            let report = CompileReport::new(&output);
            let config = Arc::new(config);

            // Test cases are independent; one failing never stops the others.
            let mut tasks = JoinSet::new();
            for id in ids {
                let (input, output) = (input.clone(), output.clone());
                let (config, report) = (Arc::clone(&config), report.clone());
                tasks.spawn(async move {
                    let result = compile_and_write(&input, &output, &id, &config, &report).await;
                    (id, result)
                });
            }

            let mut outcomes = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                outcomes.push(joined?);
            }
            outcomes.sort_by(|a, b| numeric_aware_cmp(&a.0, &b.0));

            let mut failed = 0;
            for (id, result) in &outcomes {
                match result {
                    Ok(dir) => println!("✓ {id} -> {}", dir.display()),
                    Err(e) => {
                        failed += 1;
                        println!("✗ {id}: {e}");
                    }
                }
            }
            println!(
                "{} compiled, {failed} failed (report: {})",
                outcomes.len() - failed,
                report.path().display()
            );
            if failed > 0 {
                return Err(format!("{failed} test case(s) failed").into());
            }
        }
        Commands::List { input } => {
            let ids = list_testcases(&input).await?;
            println!("Test cases in {}:", input.display());
            for id in ids {
                println!("  {id}");
            }
        }
        Commands::Check { input, testcase } => {
            let ids = select_testcases(&input, testcase).await?;
            let mut failed = 0;
            for id in ids {
                let result = match compile_testcase(&input, &id, &config).await {
                    Ok(compiled) => verify::verify_policy(&compiled),
                    Err(e) => verify::VerifyResult::failure(vec![e.to_string()]),
                };
                for warning in &result.warnings {
                    println!("  ! {id}: {warning}");
                }
                if result.success {
                    println!("✓ {id}");
                } else {
                    failed += 1;
                    println!("✗ {id}");
                    for err in &result.errors {
                        println!("    {err}");
                    }
                }
            }
            if failed > 0 {
                return Err(format!("{failed} test case(s) failed verification").into());
            }
        }
        Commands::Diff {
            input,
            output,
            testcase,
        } => {
            let compiled = compile_testcase(&input, &testcase, &config).await?;
            let fresh = restore::render_policy(&compiled.policy, &config);
            let on_disk = read_outputs(&output, &testcase).await?;
            if !print_diff(&on_disk, &fresh) {
                println!("No differences for test case {testcase}");
            }
        }
        Commands::Show {
            input,
            testcase,
            format,
        } => {
            let compiled = compile_testcase(&input, &testcase, &config).await?;
            match format.as_str() {
                "restore" => {
                    print_flow_summary(&compiled);
                    for (router, text) in restore::render_policy(&compiled.policy, &config) {
                        println!("# router {router}");
                        print!("{text}");
                    }
                }
                "json" => println!("{}", restore::to_json(&compiled.policy)?),
                _ => return Err("Invalid format. Use 'restore' or 'json'.".into()),
            }
        }
    }
    Ok(())
}

async fn select_testcases(input: &Path, testcase: Option<String>) -> treefw::Result<Vec<String>> {
    match testcase {
        Some(id) => Ok(vec![id]),
        None => list_testcases(input).await,
    }
}

async fn compile_testcase(input: &Path, id: &str, config: &CompilerConfig) -> treefw::Result<Compilation> {
    let document = load_testcase(input, id).await?;
    let config = config.clone();
    // Compilation is CPU-bound; keep it off the async workers.
    tokio::task::spawn_blocking(move || compile(&document, &config))
        .await
        .map_err(|e| treefw::Error::TestCase(format!("compile task for test case {id} failed: {e}")))?
}

async fn compile_and_write(
    input: &Path,
    output: &Path,
    id: &str,
    config: &CompilerConfig,
    report: &CompileReport,
) -> treefw::Result<PathBuf> {
    let result = async {
        let compiled = compile_testcase(input, id, config).await?;
        let files = restore::render_policy(&compiled.policy, config);
        let dir = write_outputs(output, id, files).await?;
        Ok::<_, treefw::Error>((compiled, dir))
    }
    .await;

    match result {
        Ok((compiled, dir)) => {
            info!("Test case {} written to {}", id, dir.display());
            report::log_success(
                report,
                id,
                compiled.policy.devices.len(),
                compiled.flows.len(),
                compiled.policy.rule_count(),
            )
            .await;
            Ok(dir)
        }
        Err(e) => {
            error!("Test case {} failed: {}", id, e);
            report::log_failure(report, id, &e).await;
            Err(e)
        }
    }
}

/// Prints unified diffs per router file; `false` if nothing differs.
fn print_diff(on_disk: &[(String, String)], fresh: &[(String, String)]) -> bool {
    let names: BTreeSet<&str> = on_disk
        .iter()
        .chain(fresh)
        .map(|(name, _)| name.as_str())
        .collect();
    let lookup = |files: &[(String, String)], name: &str| {
        files
            .iter()
            .find(|(n, _)| n == name)
            .map_or(String::new(), |(_, text)| text.clone())
    };

    let mut any = false;
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_by(|a, b| numeric_aware_cmp(a, b));
    for name in names {
        let (old, new) = (lookup(on_disk, name), lookup(fresh, name));
        if old == new {
            continue;
        }
        any = true;
        let diff = TextDiff::from_lines(&old, &new);
        println!("--- on disk/{name}");
        println!("+++ compiled/{name}");
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => continue,
            };
            print!("{sign}{change}");
        }
    }
    any
}

fn print_flow_summary(compiled: &Compilation) {
    for flow in compiled.flows.iter() {
        let ports = flow
            .ports
            .as_ref()
            .map_or_else(|| "any".to_string(), ToString::to_string);
        let service = flow
            .ports
            .as_ref()
            .and_then(|p| p.ranges().first())
            .filter(|r| r.is_single())
            .and_then(|r| check_well_known_port(r.start))
            .map(|name| format!(" ({name})"))
            .unwrap_or_default();
        println!(
            "# flow {}: {} -> {} {} port {ports}{service}, replies: {}",
            flow.index, flow.source, flow.destination, flow.protocol, flow.returns
        );
    }
}
