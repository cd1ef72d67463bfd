//! Meridian CLI - adaptive agent routing and meta-learning sync

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use meridian_core::Error;
use meridian_core::config::Config;
use meridian_core::features::{FeatureExtractor, SelectionInput, SlaTier};
use meridian_core::meta::{GLOBAL_PARAMS_KEY, GlobalParameters, MetaLearningAggregator};
use meridian_core::metrics::TracingMetrics;
use meridian_core::routing::{AgentCapability, ModelRouter, RoutingOrchestrator};
use meridian_core::store::{InMemoryStateStore, SqliteStateStore, StateStore, load_json};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "meridian")]
#[command(author, version, about = "Adaptive agent routing with cross-tenant meta-learning")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic multi-tenant routing simulation
    Simulate {
        /// Number of tenants
        #[arg(short, long, default_value_t = 3)]
        tenants: usize,
        /// Agents per tenant
        #[arg(short, long, default_value_t = 4)]
        agents: usize,
        /// Requests per tenant
        #[arg(short, long, default_value_t = 200)]
        requests: usize,
        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// State database (defaults to store.database_path, else in-memory)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Aggregate the tenants' state after the run
        #[arg(long)]
        sync: bool,
    },

    /// Aggregate tenant state into global parameters
    Sync {
        /// State database (defaults to store.database_path)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Keep syncing every N seconds until interrupted
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Show the stored global parameters
    Global {
        /// State database (defaults to store.database_path)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("meridian=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            tenants,
            agents,
            requests,
            seed,
            db,
            sync,
        } => {
            let options = SimulationOptions {
                tenants,
                agents,
                requests,
                seed,
                sync,
            };
            cmd_simulate(options, db, cli.format, cli.quiet).await
        }
        Commands::Sync { db, interval } => cmd_sync(db, interval, cli.format, cli.quiet).await,
        Commands::Global { db } => cmd_global(db, cli.format).await,
        Commands::Config { action } => cmd_config(action, cli.format, cli.quiet),
    }
}

/// Open the state store named on the command line or in the config
async fn open_store(db: Option<PathBuf>, config: &Config) -> anyhow::Result<Arc<dyn StateStore>> {
    match db.or_else(|| config.store.database_path.clone()) {
        Some(path) => {
            let store = SqliteStateStore::connect(&path)
                .await
                .with_context(|| format!("Failed to open state database: {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryStateStore::new())),
    }
}

struct SimulationOptions {
    tenants: usize,
    agents: usize,
    requests: usize,
    seed: u64,
    sync: bool,
}

#[derive(Debug, Default)]
struct TenantReport {
    tenant: String,
    routed: usize,
    rejected: usize,
    successes: usize,
    reward_sum: f64,
    picks: BTreeMap<String, usize>,
    models: BTreeMap<String, usize>,
}

impl TenantReport {
    fn success_rate(&self) -> f64 {
        if self.routed == 0 {
            return 0.0;
        }
        self.successes as f64 / self.routed as f64
    }

    fn average_reward(&self) -> f64 {
        if self.routed == 0 {
            return 0.0;
        }
        self.reward_sum / self.routed as f64
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "tenant": self.tenant,
            "routed": self.routed,
            "rejected": self.rejected,
            "success_rate": self.success_rate(),
            "average_reward": self.average_reward(),
            "agents": self.picks,
            "models": self.models,
        })
    }
}

const TASK_TYPES: [&str; 4] = ["summarize", "transcription", "fact_check", "chat"];
const MODELS: [&str; 3] = ["model-small", "model-medium", "model-large"];
const TIERS: [SlaTier; 4] = [
    SlaTier::Basic,
    SlaTier::Standard,
    SlaTier::Premium,
    SlaTier::Enterprise,
];

async fn cmd_simulate(
    options: SimulationOptions,
    db: Option<PathBuf>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    if options.tenants == 0 || options.agents == 0 {
        anyhow::bail!("simulation needs at least one tenant and one agent");
    }

    let config = Config::load()?;
    let store = open_store(db, &config).await?;
    let mut rng = StdRng::seed_from_u64(options.seed);

    // Hidden per-agent success probability and per-model reward
    let agent_quality: Vec<f64> = (0..options.agents)
        .map(|_| rng.gen_range(0.35..0.95))
        .collect();
    let model_quality: Vec<f64> = MODELS.iter().map(|_| rng.gen_range(0.2..0.9)).collect();

    let mut reports = Vec::with_capacity(options.tenants);

    for t in 0..options.tenants {
        let tenant = format!("tenant-{}", t + 1);
        let orchestrator = RoutingOrchestrator::new(
            Arc::new(FeatureExtractor::with_config(config.features.clone())),
            config.routing.clone(),
        );
        for i in 0..options.agents {
            orchestrator.register_agent(
                AgentCapability::new(format!("agent-{}", i + 1))
                    .with_type("simulated")
                    .with_capacity(2)
                    .with_average_duration(5.0),
            );
        }
        let models = ModelRouter::with_seed(options.seed.wrapping_add(t as u64));

        let mut report = TenantReport {
            tenant: tenant.clone(),
            ..Default::default()
        };

        for r in 0..options.requests {
            let task_type = TASK_TYPES[rng.gen_range(0..TASK_TYPES.len())];
            let input = SelectionInput::new(&tenant, task_type)
                .with_workspace(format!("ws-{}", r % 3))
                .with_tokens(rng.gen_range(50..6000))
                .with_prompt("Route this synthetic request to the most reliable agent")
                .with_sla_tier(TIERS[rng.gen_range(0..TIERS.len())])
                .with_projected_cost(rng.gen_range(0.0..0.5))
                .with_candidate_models(MODELS.iter().map(|m| m.to_string()).collect());

            let routed = match orchestrator.route_request(&input, &[]) {
                Ok(routed) => routed,
                Err(Error::NoCandidates(_)) => {
                    report.rejected += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let agent_id = routed.selection.agent_id.clone();
            let index = agent_index(&agent_id).unwrap_or(0);
            let success = rng.gen_bool(agent_quality[index].clamp(0.0, 1.0));
            let duration = rng.gen_range(1.0..12.0);
            let latency_ms = duration * 1000.0;
            let cost = rng.gen_range(0.001..0.05);

            let outcome = orchestrator.complete(
                &agent_id,
                &routed.context,
                success,
                Some(duration),
                success.then(|| rng.gen_range(0.5..1.0)),
            );
            orchestrator
                .extractor()
                .update_observation(&tenant, Some(latency_ms), Some(cost), Some(50.0));

            let decision = models.select_model(&input).await?;
            let model_index = MODELS
                .iter()
                .position(|m| *m == decision.model_id)
                .unwrap_or(0);
            let model_reward = if rng.gen_bool(model_quality[model_index]) { 1.0 } else { 0.0 };
            models
                .record_outcome(&tenant, &decision.model_id, model_reward)
                .await;

            report.routed += 1;
            report.reward_sum += outcome.reward;
            if success {
                report.successes += 1;
            }
            *report.picks.entry(agent_id).or_default() += 1;
            *report.models.entry(decision.model_id).or_default() += 1;

            if orchestrator.pending_feedback() >= config.routing.feedback_batch_size {
                orchestrator.process_pending_feedback().await;
            }
        }
        while orchestrator.pending_feedback() > 0 {
            orchestrator.process_pending_feedback().await;
        }

        orchestrator.persist_state(store.as_ref(), &tenant).await?;
        models.persist_state(store.as_ref(), &tenant).await?;
        info!(tenant = %tenant, routed = report.routed, "Tenant simulation complete");
        reports.push(report);
    }

    let global = if options.sync {
        let aggregator = MetaLearningAggregator::new(store.clone(), config.meta.clone())?
            .with_seed(options.seed)?
            .with_metrics(Arc::new(TracingMetrics));
        Some(aggregator.sync_all_params().await)
    } else {
        None
    };

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "seed": options.seed,
                "requests_per_tenant": options.requests,
                "agent_quality": agent_quality,
                "tenants": reports.iter().map(TenantReport::to_json).collect::<Vec<_>>(),
                "global": global,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if !quiet {
                println!(
                    "Simulated {} tenant(s), {} request(s) each",
                    reports.len(),
                    options.requests
                );
                println!();
                for report in &reports {
                    println!(
                        "{}: routed {}, rejected {}, success {:.1}%, avg reward {:.3}",
                        report.tenant,
                        report.routed,
                        report.rejected,
                        report.success_rate() * 100.0,
                        report.average_reward()
                    );
                    for (agent, count) in &report.picks {
                        let index = agent_index(agent).unwrap_or(0);
                        println!(
                            "  {:<10} {:>5} task(s)  (true success rate {:.2})",
                            agent, count, agent_quality[index]
                        );
                    }
                }
            }
            if let Some(global) = &global {
                if !quiet {
                    println!();
                }
                print_global_summary(global);
            }
        }
    }

    Ok(())
}

fn agent_index(agent_id: &str) -> Option<usize> {
    agent_id
        .strip_prefix("agent-")?
        .parse::<usize>()
        .ok()?
        .checked_sub(1)
}

async fn cmd_sync(
    db: Option<PathBuf>,
    interval: Option<u64>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    if db.is_none() && config.store.database_path.is_none() {
        warn!("No state database configured, syncing an empty in-memory store");
    }
    let store = open_store(db, &config).await?;
    let aggregator = MetaLearningAggregator::new(store, config.meta.clone())?;

    if let Some(secs) = interval {
        let cancel = CancellationToken::new();
        let signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal.cancel();
            }
        });

        if !quiet {
            println!("Syncing every {}s, press Ctrl-C to stop", secs);
        }
        let syncs = aggregator
            .run_periodic(Duration::from_secs(secs.max(1)), cancel)
            .await;
        if !quiet {
            println!("Stopped after {} sync(s)", syncs);
        }
        return Ok(());
    }

    let global = aggregator.sync_all_params().await;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&global)?),
        OutputFormat::Text => {
            if !quiet || !global.tenant_ids.is_empty() {
                print_global_summary(&global);
            }
        }
    }
    Ok(())
}

async fn cmd_global(db: Option<PathBuf>, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = open_store(db, &config).await?;
    let global: Option<GlobalParameters> = load_json(store.as_ref(), GLOBAL_PARAMS_KEY)
        .await
        .context("Failed to read global parameters")?;

    match (format, global) {
        (OutputFormat::Json, global) => {
            println!("{}", serde_json::to_string_pretty(&global)?);
        }
        (OutputFormat::Text, None) => {
            println!("No global parameters stored yet. Run `meridian sync` first.");
        }
        (OutputFormat::Text, Some(global)) => {
            print_global_summary(&global);
            if !global.context_weights.is_empty() {
                println!();
                println!("Context weights:");
                for (name, weight) in &global.context_weights {
                    println!("  {:<22} {:>9.4}", name, weight);
                }
            }
            if !global.arm_priors.is_empty() {
                println!();
                println!("Arm priors:");
                for (arm, prior) in &global.arm_priors {
                    println!(
                        "  {:<22} alpha {:>8.3}  beta {:>8.3}  mean {:.3}",
                        arm,
                        prior.alpha,
                        prior.beta,
                        prior.mean()
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_global_summary(global: &GlobalParameters) {
    let last_sync = global
        .last_sync
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "Global parameters: {} tenant(s), {} weight(s), {} prior(s), {} observation(s), synced {}",
        global.tenant_ids.len(),
        global.context_weights.len(),
        global.arm_priors.len(),
        global.total_observations,
        last_sync
    );
}

fn cmd_config(action: ConfigAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if format == OutputFormat::Json {
                let map: BTreeMap<String, String> = items.into_iter().collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (key, value) in items {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from([
            "meridian", "--format", "json", "simulate", "--tenants", "2", "--sync",
        ])
        .unwrap();
        assert!(cli.format == OutputFormat::Json);
        match cli.command {
            Commands::Simulate {
                tenants, sync, seed, ..
            } => {
                assert_eq!(tenants, 2);
                assert!(sync);
                assert_eq!(seed, 42);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["meridian", "--format", "yaml", "global"]).is_err());
    }

    #[test]
    fn test_agent_index() {
        assert_eq!(agent_index("agent-1"), Some(0));
        assert_eq!(agent_index("agent-12"), Some(11));
        assert_eq!(agent_index("agent-0"), None);
        assert_eq!(agent_index("other"), None);
    }

    #[test]
    fn test_tenant_report_rates() {
        let report = TenantReport {
            routed: 4,
            successes: 3,
            reward_sum: 2.0,
            ..Default::default()
        };
        assert_eq!(report.success_rate(), 0.75);
        assert_eq!(report.average_reward(), 0.5);
        assert_eq!(TenantReport::default().success_rate(), 0.0);
    }
}
