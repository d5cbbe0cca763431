// crates/rpacli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rpaactions::{register_all, Adb, AdbDriverFactory, AdbProbe};
use rpacore::{ActionEvent, ExecutionEvent, FlowDefinition, Value};
use rparuntime::{
    find_unknown_actions, ActionRegistry, DevicePool, DeviceSource, FlowDirectorySource, FlowRuntime,
    RunOptions, RunOutcome, RuntimeConfig,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "rpa")]
#[command(about = "Android RPA flow runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file on one of its devices
    Run {
        /// Path to flow YAML or JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Comma separated device ids, replacing the flow's own list
        #[arg(short, long)]
        device: Option<String>,

        /// Variable override as key=value (value parsed as JSON if possible)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Top-level step index to resume from
        #[arg(long, default_value_t = 0)]
        start_step: usize,

        /// Runtime config file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow YAML or JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List available action types
    Actions,

    /// Show the status of every known device
    Devices {
        /// Runtime config file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Comma separated device ids instead of the ones declared in flow files
        #[arg(short, long)]
        device: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(&path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn default_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    register_all(&mut registry);
    registry
}

fn parse_vars(vars: &[String]) -> Result<HashMap<String, Value>> {
    let mut parsed = HashMap::new();
    for var in vars {
        let Some((key, raw)) = var.split_once('=') else {
            bail!("variable override '{}' is not KEY=VALUE", var);
        };
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(raw));
        parsed.insert(key.trim().to_string(), value);
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            device,
            vars,
            start_step,
            config,
            verbose,
        } => {
            init_tracing(verbose);
            let options = RunOptions {
                devices: device,
                variables: parse_vars(&vars)?,
                start_step,
            };
            run_flow(file, options, load_config(config)?).await?;
        }

        Commands::Validate { file } => {
            validate_flow(file)?;
        }

        Commands::Actions => {
            list_actions();
        }

        Commands::Devices { config, device } => {
            init_tracing(false);
            show_devices(load_config(config)?, device).await;
        }
    }

    Ok(())
}

async fn run_flow(file: PathBuf, options: RunOptions, config: RuntimeConfig) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());
    let flow = FlowDefinition::from_file(&file)?;

    println!("📋 Flow: {}", flow.display_name());
    println!("   Steps: {}", flow.steps().len());
    println!();

    let adb = Adb::new(config.adb_path.clone(), Duration::from_secs(config.probe_timeout_secs.max(1)));
    let runtime = FlowRuntime::new(
        default_registry(),
        Arc::new(AdbProbe::new(adb.clone())),
        Arc::new(AdbDriverFactory::new(adb)),
        config.clone(),
    );
    tracing::debug!(flow_dirs = ?config.flow_dirs, "Starting device pool maintenance");
    let maintenance = runtime
        .pool()
        .spawn_maintenance(Arc::new(FlowDirectorySource::new(config.flow_dirs.clone())));

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::FlowStarted { device_id, .. } => {
                    println!("▶️  Flow started on {}", device_id);
                }
                ExecutionEvent::StepStarted { step_name, action, .. } => {
                    println!("  ⚡ {} ({})", step_name, action);
                }
                ExecutionEvent::StepSkipped { step_name, .. } => {
                    println!("  ⏭️  {} skipped", step_name);
                }
                ExecutionEvent::StepCompleted { step_name, duration_ms, .. } => {
                    println!("  ✅ {} completed in {}ms", step_name, duration_ms);
                }
                ExecutionEvent::StepFailed { step_name, error, .. } => {
                    println!("  ❌ {} failed: {}", step_name, error);
                }
                ExecutionEvent::ActionEvent { step_name, event, .. } => match event {
                    ActionEvent::Info { message } => println!("     ℹ️  [{}] {}", step_name, message),
                    ActionEvent::Warning { message } => println!("     ⚠️  [{}] {}", step_name, message),
                },
                ExecutionEvent::FlowCompleted { success, duration_ms, .. } => {
                    if success {
                        println!("✨ Flow completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Flow failed after {}ms", duration_ms);
                    }
                }
            }
        }
    });

    let outcome = runtime.run_flow(&flow, options).await;

    // Wait for events to finish printing
    tokio::time::sleep(Duration::from_millis(100)).await;
    event_task.abort();
    maintenance.shutdown();

    let report = match outcome? {
        RunOutcome::Finished(report) => report,
        RunOutcome::NoDevice => bail!("no device available for flow {}", flow.display_name()),
    };

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", report.execution_id);
    println!("   Executed: {} steps, skipped: {}", report.executed_steps, report.skipped_steps);

    if !report.results.is_empty() {
        println!();
        println!("📤 Results:");
        let mut names: Vec<&String> = report.results.keys().collect();
        names.sort();
        for name in names {
            println!("   {}: {}", name, serde_json::Value::from(&report.results[name]));
        }
    }

    Ok(())
}

fn validate_flow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let flow = FlowDefinition::from_file(&file)?;
    flow.validate()?;

    let unknown = find_unknown_actions(flow.steps(), &default_registry());
    if !unknown.is_empty() {
        bail!("unknown action types: {}", unknown.join(", "));
    }

    println!("✅ Flow is valid:");
    println!("   Name: {}", flow.display_name());
    println!("   Steps: {}", flow.steps().len());
    println!("   Devices: {}", flow.candidate_devices().join(", "));

    Ok(())
}

fn list_actions() {
    println!("📦 Available Action Types:");
    println!();

    let registry = default_registry();
    for action_type in registry.list_action_types() {
        let Some(metadata) = registry.get_metadata(&action_type) else {
            continue;
        };
        println!("  {} [{}]", action_type, metadata.category);
        println!("     {}", metadata.description);
        for param in &metadata.params {
            let marker = if param.required { "*" } else { " " };
            println!("       {} {}: {}", marker, param.name, param.description);
        }
    }

    println!();
    println!("  Control: loop, for_each, break, continue");
}

async fn show_devices(config: RuntimeConfig, device: Option<String>) {
    let adb = Adb::new(config.adb_path.clone(), Duration::from_secs(config.probe_timeout_secs.max(1)));
    let pool = DevicePool::with_config(Arc::new(AdbProbe::new(adb)), config.pool_config());

    match device {
        Some(ids) => pool.register_devices(&ids),
        None => pool.register(&FlowDirectorySource::new(config.flow_dirs.clone()).declared_devices()),
    }
    pool.check_health().await;

    let devices = pool.get_all_devices().await;
    if devices.is_empty() {
        println!("No devices declared");
        return;
    }

    println!("📱 Devices:");
    let mut ids: Vec<&String> = devices.keys().collect();
    ids.sort();
    for id in ids {
        let snapshot = &devices[id];
        let icon = if snapshot.connected { "🟢" } else { "🔴" };
        println!(
            "  {} {} {} (heartbeat {}s ago)",
            icon, id, snapshot.status, snapshot.seconds_since_heartbeat
        );
    }
}
