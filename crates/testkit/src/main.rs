//! # testkit - test cluster provisioner
//!
//! Acquires Linux and Windows machines from a provider, turns them into one
//! swarm and prints how to reach each machine.
//!
//! ## Flow
//! ```text
//! Provider → Provisioner → Bootstrapper → Exporter → stdout
//!                              ↓
//!                 leader init, worker joins
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod bootstrap;
mod config;
mod export;
mod machine;
mod plugin;
mod state;
#[cfg(test)]
mod testing;

use bootstrap::{BootstrapOptions, BootstrapResult, Bootstrapper};
use config::{AppConfig, Overrides};
use export::OutputFormat;
use machine::{Machine, Provisioner};
use plugin::{InstanceId, ProviderRegistry, template};
use state::AppState;
use testkit_common::constants::{DEFAULT_CONFIG_PATH, tags};
use testkit_common::{TestkitError, TestkitResult};

/// Provision test machines and bootstrap a swarm across them
#[derive(Parser, Debug)]
#[command(name = "testkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH, env = "TESTKIT_CONFIG")]
    config: String,

    /// Debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable JSON logging output
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create machines and join them into a swarm
    Create(CreateArgs),
    /// Provision a single instance from a template
    Infrakit(InfrakitArgs),
    /// List registered providers
    Providers,
    /// List configured suite commands
    Commands,
}

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct CreateArgs {
    /// Number of Linux machines
    #[arg(value_parser = parse_count, required = true)]
    linux_count: Option<usize>,

    /// Number of Windows machines
    #[arg(value_parser = parse_count, required = true)]
    windows_count: Option<usize>,

    /// Don't init or join a swarm
    #[arg(short = 'n', long)]
    no_swarm: bool,

    /// Address the leader advertises to the rest of the swarm
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Swarm listen address (overrides config)
    #[arg(long)]
    listen_addr: Option<String>,

    /// Extra join attempts per worker (overrides config)
    #[arg(long)]
    join_retries: Option<u32>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Env)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Option<CreateCommand>,
}

#[derive(Subcommand, Debug)]
enum CreateCommand {
    /// Provision a single instance from a template
    Infrakit(InfrakitArgs),
}

#[derive(Args, Debug)]
struct InfrakitArgs {
    /// Provider key, e.g. static/host-pool
    provider: String,

    /// Template location: path, file://, http(s):// or - for stdin
    url: String,

    /// Scope label (defaults to the configured namespace)
    #[arg(long)]
    namespace: Option<String>,

    /// Template parameter, repeatable
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = template::parse_var)]
    vars: Vec<(String, String)>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            debug: self.debug,
            json_logs: self.json_logs,
            ..Default::default()
        };
        if let Command::Create(args) = &self.command {
            overrides.listen_addr = args.listen_addr.clone();
            overrides.advertise_addr = args.advertise_addr.clone();
            overrides.join_retries = args.join_retries;
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(&cli.config, &cli.overrides())
        .context("Failed to load configuration")?;

    init_logging(&config.logging.level, config.logging.json)?;

    info!("🔧 Starting testkit v{}", env!("CARGO_PKG_VERSION"));
    match &config.source {
        Some(path) => info!("📋 Configuration loaded from {}", path.display()),
        None => warn!(path = %cli.config, "Config file not found, using defaults"),
    }

    let state = AppState::new(config, ProviderRegistry::with_builtins());

    match cli.command {
        Command::Create(args) => create(&state, args).await,
        Command::Infrakit(args) => infrakit(&state, args).await,
        Command::Providers => {
            for key in state.registry.keys() {
                println!("{key}");
            }
            Ok(())
        }
        Command::Commands => {
            for command in &state.config.commands {
                println!("{command}");
            }
            Ok(())
        }
    }
}

async fn create(state: &AppState, args: CreateArgs) -> Result<()> {
    if let Some(CreateCommand::Infrakit(infrakit_args)) = args.command {
        return infrakit(state, infrakit_args).await;
    }

    let (Some(linux), Some(windows)) = (args.linux_count, args.windows_count) else {
        return Err(TestkitError::InputValidationError(
            "create needs <LINUX_COUNT> <WINDOWS_COUNT>".to_string(),
        )
        .into());
    };

    let provisioner = state.provisioner()?;
    let (machines, result) =
        create_cluster(&provisioner, state.bootstrap_options(args.no_swarm), linux, windows)
            .await?;

    info!("✅ {}", result.summary());
    for failure in result.failures() {
        warn!(kind = failure.kind(), error = %failure, "Worker is not part of the swarm");
    }

    print!("{}", format_output(&machines, &result, args.output)?);
    Ok(())
}

/// Acquire machines, then bootstrap them; machines come back leader first
async fn create_cluster(
    provisioner: &dyn Provisioner,
    options: BootstrapOptions,
    linux_count: usize,
    windows_count: usize,
) -> TestkitResult<(Vec<Machine>, BootstrapResult)> {
    // Nothing can lead the swarm, so don't provision anything
    if linux_count == 0 && !options.skip_init {
        return Err(TestkitError::NoLeaderCandidate);
    }

    let (linux, windows) = provisioner.acquire(linux_count, windows_count).await?;

    let mut bootstrapper = Bootstrapper::new(options);
    let result = bootstrapper.bootstrap(&linux, &windows).await;
    tracing::debug!(state = %bootstrapper.state(), "Bootstrap finished");
    let result = result?;

    Ok((linux.into_iter().chain(windows).collect(), result))
}

fn format_output(
    machines: &[Machine],
    result: &BootstrapResult,
    format: OutputFormat,
) -> Result<String> {
    let descriptors = export::render(machines);
    match format {
        OutputFormat::Env => Ok(export::format_env(&descriptors)),
        OutputFormat::Json => {
            let json = export::format_json(&descriptors, Some(result))
                .context("Failed to encode connection info")?;
            Ok(format!("{json}\n"))
        }
    }
}

async fn infrakit(state: &AppState, args: InfrakitArgs) -> Result<()> {
    let provider = args.provider.clone();
    let id = provision_instance(state, args).await?;
    info!(instance = %id, provider = %provider, "🖥️ Instance provisioned");
    println!("{id}");
    Ok(())
}

/// Look up the provider, render and decode the template, provision once
async fn provision_instance(state: &AppState, args: InfrakitArgs) -> TestkitResult<InstanceId> {
    let namespace = args
        .namespace
        .unwrap_or_else(|| state.config.environment.namespace.clone());
    let plugin = state.plugin(&args.provider, &namespace)?;

    let vars: BTreeMap<String, String> = args.vars.into_iter().collect();
    let spec = template::load_spec(&args.url, &vars).await?;

    plugin.provision(spec.with_tag(tags::SCOPE, namespace)).await
}

/// Parse a machine count from the command line
fn parse_count(raw: &str) -> TestkitResult<usize> {
    raw.trim().parse::<usize>().map_err(|_| {
        TestkitError::InputValidationError(format!(
            "invalid machine count {raw:?}: expected a non-negative integer"
        ))
    })
}

/// Initialize structured logging with tracing, on stderr
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::HostEntry;
    use crate::testing::{CallLog, FakeChannel};
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use testkit_common::{MachineOutcome, Platform};

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("0").unwrap(), 0);
        assert_eq!(parse_count("3").unwrap(), 3);
        for bad in ["-1", "two", "", "1.5"] {
            assert!(matches!(
                parse_count(bad),
                Err(TestkitError::InputValidationError(_))
            ));
        }
    }

    #[test]
    fn test_cli_create() {
        let cli = Cli::try_parse_from([
            "testkit",
            "create",
            "1",
            "2",
            "-n",
            "--advertise-addr",
            "10.0.0.1",
            "--debug",
        ])
        .unwrap();
        assert!(cli.debug);

        let overrides = cli.overrides();
        assert_eq!(overrides.advertise_addr.as_deref(), Some("10.0.0.1"));

        let Command::Create(args) = cli.command else {
            panic!("expected create");
        };
        assert_eq!(args.linux_count, Some(1));
        assert_eq!(args.windows_count, Some(2));
        assert!(args.no_swarm);
        assert_eq!(args.output, OutputFormat::Env);
    }

    #[test]
    fn test_cli_rejects_bad_count() {
        assert!(Cli::try_parse_from(["testkit", "create", "one", "2"]).is_err());
        assert!(Cli::try_parse_from(["testkit", "create", "1"]).is_err());
    }

    #[test]
    fn test_cli_nested_infrakit() {
        let cli = Cli::try_parse_from([
            "testkit",
            "create",
            "infrakit",
            "static/host-pool",
            "spec.yaml",
            "--var",
            "image=ubuntu",
        ])
        .unwrap();

        let Command::Create(args) = cli.command else {
            panic!("expected create");
        };
        let Some(CreateCommand::Infrakit(infrakit)) = args.command else {
            panic!("expected nested infrakit");
        };
        assert_eq!(infrakit.provider, "static/host-pool");
        assert_eq!(infrakit.url, "spec.yaml");
        assert_eq!(infrakit.vars, vec![("image".to_string(), "ubuntu".to_string())]);
    }

    #[test]
    fn test_cli_rejects_malformed_var() {
        let parsed = Cli::try_parse_from(["testkit", "infrakit", "p", "u", "--var", "novalue"]);
        assert!(parsed.is_err());
    }

    /// Hands out pre-built machines
    #[derive(Default)]
    struct FixedProvisioner {
        linux: Vec<Machine>,
        windows: Vec<Machine>,
        acquired: AtomicUsize,
    }

    #[async_trait]
    impl Provisioner for FixedProvisioner {
        async fn acquire(
            &self,
            linux: usize,
            windows: usize,
        ) -> TestkitResult<(Vec<Machine>, Vec<Machine>)> {
            assert_eq!((linux, windows), (self.linux.len(), self.windows.len()));
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok((self.linux.clone(), self.windows.clone()))
        }
    }

    #[tokio::test]
    async fn test_create_with_one_worker_timing_out() {
        let log = CallLog::default();
        let provisioner = FixedProvisioner {
            linux: vec![FakeChannel::new("l0", log.clone()).into_machine(Platform::Linux)],
            windows: vec![
                FakeChannel::new("w0", log.clone()).into_machine(Platform::Windows),
                FakeChannel::new("w1", log.clone())
                    .failing_join(TestkitError::Timeout("join timed out".to_string()))
                    .into_machine(Platform::Windows),
            ],
            ..Default::default()
        };

        let (machines, result) = create_cluster(&provisioner, BootstrapOptions::default(), 1, 2)
            .await
            .unwrap();

        assert_eq!(result.nodes[0].outcome, MachineOutcome::LeaderReady);
        assert_eq!(result.nodes[1].outcome, MachineOutcome::Joined);
        assert_eq!(result.nodes[2].outcome.to_string(), "failed: TimeoutError: join timed out");

        let output = format_output(&machines, &result, OutputFormat::Env).unwrap();
        for name in ["# l0", "# w0", "# w1"] {
            assert!(output.contains(name), "missing {name} in {output}");
        }

        let json = format_output(&machines, &result, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["machines"].as_array().unwrap().len(), 3);
        assert_eq!(value["bootstrap"]["state"], "bootstrapped");
    }

    #[tokio::test]
    async fn test_create_without_linux_provisions_nothing() {
        let log = CallLog::default();
        let provisioner = FixedProvisioner {
            windows: vec![FakeChannel::new("w0", log.clone()).into_machine(Platform::Windows)],
            ..Default::default()
        };

        let err = create_cluster(&provisioner, BootstrapOptions::default(), 0, 1)
            .await
            .unwrap_err();
        assert_eq!(err, TestkitError::NoLeaderCandidate);
        assert_eq!(provisioner.acquired.load(Ordering::SeqCst), 0);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_create_without_linux_and_swarm_skipped() {
        let log = CallLog::default();
        let provisioner = FixedProvisioner {
            windows: vec![FakeChannel::new("w0", log.clone()).into_machine(Platform::Windows)],
            ..Default::default()
        };
        let options = BootstrapOptions {
            skip_init: true,
            ..Default::default()
        };

        let (machines, result) = create_cluster(&provisioner, options, 0, 1).await.unwrap();
        assert_eq!(machines.len(), 1);
        assert_eq!(result.skipped_count(), 1);
        assert_eq!(provisioner.acquired.load(Ordering::SeqCst), 1);
        assert!(log.is_empty());
    }

    fn pool_state() -> AppState {
        let mut config = AppConfig::default();
        config.environment.hosts = vec![HostEntry {
            name: "lnx-a".to_string(),
            address: "10.0.0.1".to_string(),
            platform: Platform::Linux,
            port: None,
        }];
        AppState::new(config, ProviderRegistry::with_builtins())
    }

    #[test]
    fn test_provision_instance_from_template() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "Tags:\n  testkit.platform: {{{{ platform }}}}").unwrap();

        let args = InfrakitArgs {
            provider: "static/host-pool".to_string(),
            url: file.path().to_string_lossy().into_owned(),
            namespace: Some("ci".to_string()),
            vars: vec![("platform".to_string(), "linux".to_string())],
        };

        let id = tokio_test::block_on(provision_instance(&pool_state(), args)).unwrap();
        assert_eq!(id.to_string(), "ci/lnx-a");
    }

    #[test]
    fn test_provision_instance_unknown_provider() {
        let args = InfrakitArgs {
            provider: "aws/ec2-instance".to_string(),
            url: "/nonexistent.yaml".to_string(),
            namespace: None,
            vars: Vec::new(),
        };

        let err = tokio_test::block_on(provision_instance(&pool_state(), args)).unwrap_err();
        assert_eq!(err, TestkitError::UnknownProvider("aws/ec2-instance".to_string()));
    }
}
