#![forbid(unsafe_code)]

mod pipeline;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mbuild_config::config::{parse_core_list, CONFIG_FILE};
use mbuild_config::BuildConfig;
use mbuild_engine::{DependencyFailurePolicy, EngineError, Report, RunContext, RunOptions};
use mbuild_targets::{Arch, ExecutionPlatform, ToolchainKind, Variant};
use mbuild_util::process::SystemRunner;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "mbuild", about = "Build, validate and package the K1 debugger and binutils")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for values read from `mbuild.toml`.
#[derive(Debug, Default, Args)]
struct ConfigArgs {
    /// Configuration file (defaults to ./mbuild.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Target architecture
    #[arg(long, global = true)]
    arch: Option<Arch>,
    /// Build variant
    #[arg(long, global = true)]
    variant: Option<Variant>,
    /// Toolchain kind
    #[arg(long, global = true)]
    toolchain: Option<ToolchainKind>,
    /// Where the testsuite runs: hw or sim
    #[arg(long, global = true)]
    execution_platform: Option<ExecutionPlatform>,
    /// Install prefix
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    /// Staging prefix for packages
    #[arg(long, global = true)]
    pkg_prefix: Option<PathBuf>,
    /// Root of the installed toolchain used by the testsuite
    #[arg(long, global = true)]
    toolroot: Option<PathBuf>,
    /// Workspace containing the checkout and the processor description
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    /// Maximum parallel jobs
    #[arg(long, short = 'j', global = true)]
    jobs: Option<usize>,
    /// Version stamped into the tools, `<version>-<build id>` for packages
    #[arg(long, global = true)]
    version_string: Option<String>,
    /// Comma-separated list of cores to validate
    #[arg(long, global = true)]
    cores: Option<String>,
    /// Debug-level logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run targets (default: the install target)
    Run {
        /// Targets to run
        goals: Vec<String>,
        /// Stop starting targets after the first failure
        #[arg(long)]
        fail_fast: bool,
        /// Mark dependents of a failed target skipped instead of failed
        #[arg(long)]
        skip_dependents: bool,
        /// Write the report as JSON
        #[arg(long)]
        report_json: Option<PathBuf>,
        /// Write each target's captured output under this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Print the order targets would run in
    Plan {
        /// Targets to resolve
        goals: Vec<String>,
    },
    /// List the declared targets
    List,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.config.verbose);

    let result = load_config(&cli.config).and_then(|config| match cli.command {
        Command::Run {
            goals,
            fail_fast,
            skip_dependents,
            report_json,
            log_dir,
        } => {
            let options = RunOptions {
                jobs: config.jobs(),
                fail_fast,
                on_dependency_failure: if skip_dependents {
                    DependencyFailurePolicy::Skip
                } else {
                    DependencyFailurePolicy::Fail
                },
                log_dir,
            };
            cmd_run(config, &goals, &options, report_json.as_deref())
        }
        Command::Plan { goals } => cmd_plan(config, &goals),
        Command::List => cmd_list(config),
    });

    if let Err(msg) = result {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Read the configuration file and apply command-line overrides.
fn load_config(args: &ConfigArgs) -> Result<BuildConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => BuildConfig::from_path(path)?,
        None => BuildConfig::load_or_default(Path::new(CONFIG_FILE))?,
    };
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut BuildConfig, args: &ConfigArgs) {
    if let Some(arch) = args.arch {
        config.arch = arch;
    }
    if let Some(variant) = args.variant {
        config.variant = variant;
    }
    if let Some(toolchain) = args.toolchain {
        config.toolchain = toolchain;
    }
    if let Some(platform) = args.execution_platform {
        config.execution_platform = platform;
    }
    if let Some(prefix) = &args.prefix {
        config.prefix.clone_from(prefix);
    }
    if let Some(pkg_prefix) = &args.pkg_prefix {
        config.pkg_prefix = Some(pkg_prefix.clone());
    }
    if let Some(toolroot) = &args.toolroot {
        config.toolroot = Some(toolroot.clone());
    }
    if let Some(workspace) = &args.workspace {
        config.workspace.clone_from(workspace);
    }
    if let Some(jobs) = args.jobs {
        config.jobs = Some(jobs);
    }
    if let Some(version) = &args.version_string {
        config.version.clone_from(version);
    }
    if let Some(cores) = &args.cores {
        config.cores = Some(parse_core_list(cores));
    }
}

fn cmd_run(
    config: BuildConfig,
    goals: &[String],
    options: &RunOptions,
    report_json: Option<&Path>,
) -> CliResult {
    let builder = pipeline::builder(config)?;
    let cx = RunContext::new(SystemRunner).env("LANG", "C");

    let report = match builder.run(goals, &cx, options) {
        Ok(report) => report,
        Err(EngineError::Aborted {
            target,
            message,
            report,
        }) => {
            finish(&report, report_json)?;
            return Err(format!("run aborted in `{target}`: {message}").into());
        }
        Err(e) => return Err(e.into()),
    };

    finish(&report, report_json)?;
    if !report.succeeded() {
        process::exit(1);
    }
    Ok(())
}

/// Print the report table and write the JSON copy if requested.
fn finish(report: &Report, report_json: Option<&Path>) -> CliResult {
    print!("{}", report.render());
    if let Some(path) = report_json {
        report.write_json(path)?;
        eprintln!("     Wrote report to {}", path.display());
    }
    eprintln!(
        "    Finished {} target(s) in {:.2}s",
        report.entries.len(),
        report.duration.as_secs_f64()
    );
    Ok(())
}

fn cmd_plan(config: BuildConfig, goals: &[String]) -> CliResult {
    let builder = pipeline::builder(config)?;
    for target in builder.resolve(goals)? {
        let note = if target.is_skipped() { " (skipped)" } else { "" };
        println!("{}{note}", target.name());
    }
    Ok(())
}

fn cmd_list(config: BuildConfig) -> CliResult {
    let builder = pipeline::builder(config)?;
    let width = builder.targets().map(|t| t.name().len()).max().unwrap_or(0);
    for target in builder.targets() {
        let marker = if builder.default_targets().iter().any(|d| d == target.name()) {
            '*'
        } else {
            ' '
        };
        let description = target.description().unwrap_or("");
        println!("{marker} {:<width$}  {description}", target.name());
        if !target.dependencies().is_empty() {
            println!("  {:<width$}  after: {}", "", target.dependencies().join(", "));
        }
    }
    Ok(())
}
