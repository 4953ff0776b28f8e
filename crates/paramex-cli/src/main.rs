//! Parameter Explorer CLI
//!
//! The `paramex` command drives an exploration session against an explorer
//! server without a drawing surface: parameter definitions come from a JSON
//! file and every render is a blank placeholder image.
//!
//! ## Commands
//!
//! - `sessions`: list, show, create or switch sessions
//! - `batch`: run one batch with an agent and save it
//! - `sample`: generate (or replay) one sample, optionally scoring it
//! - `score`: attach a score to a stored record
//! - `time-warp`: move an agent's exploration counter
//! - `records`: print the scored records of the active session
//! - `agents`: list the agent table

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use paramex_core::{
    ExplorerConfig, ExplorerEngine, OwnerStore, ParameterSpec, RenderOutput, Renderer,
    SnapshotOptions, StepOutcome, LOCAL_RANDOM_AGENT,
};

/// Base64 of a 1x1 grey PNG. The server stores no record without an image.
const PLACEHOLDER_IMAGE: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

struct PlaceholderRenderer;

#[async_trait]
impl Renderer for PlaceholderRenderer {
    async fn render(&mut self, _store: &OwnerStore) -> RenderOutput {
        RenderOutput {
            artifact: Some(PLACEHOLDER_IMAGE.to_string()),
            metadata: None,
        }
    }
}

#[derive(Parser)]
#[command(name = "paramex")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parameter Explorer: agent-guided exploration of generative-art parameters", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Explorer server URL
    #[arg(long, global = true, env = "PARAMEX_SERVER")]
    server: Option<String>,

    /// Tool namespace (scopes sessions and the engine id)
    #[arg(long, global = true, env = "PARAMEX_NAMESPACE")]
    namespace: Option<String>,

    /// File holding the durable session ids
    #[arg(long, global = true, env = "PARAMEX_SESSION_FILE")]
    session_file: Option<PathBuf>,

    /// Master seed of the local random agent
    #[arg(long, global = true, env = "PARAMEX_SEED")]
    seed: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage exploration sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Run one batch and save it unscored
    Batch {
        /// Parameter definitions (JSON object of name -> definition)
        #[arg(short, long)]
        params: PathBuf,

        /// Number of samples
        #[arg(short, long, default_value = "5")]
        size: usize,

        /// Agent table name
        #[arg(short, long, default_value = LOCAL_RANDOM_AGENT)]
        agent: String,

        /// Pause between steps, in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,
    },

    /// Generate one sample with the manual random agent
    Sample {
        /// Parameter definitions (JSON object of name -> definition)
        #[arg(short, long)]
        params: PathBuf,

        /// Save the sample with this score (0-100)
        #[arg(long)]
        score: Option<f64>,

        /// Reproduce the values recorded under a random-agent seed
        #[arg(long)]
        replay: Option<String>,
    },

    /// Attach a score to a stored record
    Score {
        /// Record id
        id: u64,

        /// Score (0-100)
        score: f64,
    },

    /// Move an agent's exploration counter
    TimeWarp {
        /// Steps to advance (negative to rewind)
        #[arg(allow_hyphen_values = true)]
        steps: f64,

        /// Agent table name
        #[arg(short, long, default_value = LOCAL_RANDOM_AGENT)]
        agent: String,

        /// Parameter definitions sent along with the call
        #[arg(short, long)]
        params: Option<PathBuf>,
    },

    /// Print the scored records of the active session
    Records,

    /// List available agents
    Agents,
}

#[derive(Subcommand)]
enum SessionAction {
    /// List every known session of the namespace
    List,
    /// Print the active session id
    Current,
    /// Create and activate a new session
    New,
    /// Activate an existing session
    Use {
        /// Session id
        id: String,
    },
}

impl Cli {
    fn config(&self) -> ExplorerConfig {
        let mut config = ExplorerConfig::from_env();
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(path) = &self.session_file {
            config.session_file = Some(path.clone());
        }
        if let Some(seed) = &self.seed {
            config.seed = Some(seed.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    paramex_core::init_tracing(cli.json, level);

    let config = cli.config();
    info!(server = %config.server_url, namespace = %config.namespace, "starting paramex");
    let mut engine =
        ExplorerEngine::from_config(config).context("Failed to initialise the explorer engine")?;

    match cli.command {
        Commands::Sessions { action } => match action {
            SessionAction::List => cmd_sessions_list(&engine),
            SessionAction::Current => cmd_sessions_current(&engine),
            SessionAction::New => cmd_sessions_new(&mut engine),
            SessionAction::Use { id } => cmd_sessions_use(&mut engine, &id),
        },
        Commands::Batch {
            params,
            size,
            agent,
            delay_ms,
        } => {
            let specs = load_specs(&params)?;
            cmd_batch(
                &mut engine,
                specs,
                size,
                &agent,
                Duration::from_millis(delay_ms),
            )
            .await
        }
        Commands::Sample {
            params,
            score,
            replay,
        } => {
            let specs = load_specs(&params)?;
            cmd_sample(&mut engine, specs, score, replay.as_deref()).await
        }
        Commands::Score { id, score } => cmd_score(&mut engine, id, score).await,
        Commands::TimeWarp {
            steps,
            agent,
            params,
        } => {
            let specs = match params {
                Some(path) => load_specs(&path)?,
                None => BTreeMap::new(),
            };
            cmd_time_warp(&mut engine, specs, steps, &agent).await
        }
        Commands::Records => cmd_records(&engine).await,
        Commands::Agents => cmd_agents(&engine),
    }
}

/// Read a JSON parameter definition file
fn load_specs(path: &Path) -> Result<BTreeMap<String, ParameterSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid parameter definitions in {}", path.display()))
}

fn register(engine: &mut ExplorerEngine, specs: BTreeMap<String, ParameterSpec>) -> Result<()> {
    let requested = specs.len();
    let accepted = engine.register(specs);
    if accepted < requested {
        eprintln!(
            "Warning: {} of {} parameter definitions were rejected (see logs)",
            requested - accepted,
            requested
        );
    }
    if accepted == 0 && requested > 0 {
        bail!("No valid parameter definitions");
    }
    Ok(())
}

fn cmd_sessions_list(engine: &ExplorerEngine) -> Result<()> {
    let sessions = engine.known_sessions()?;
    for id in sessions {
        let prefix = if id == engine.session_id() { "* " } else { "  " };
        println!("{}{}", prefix, id);
    }
    Ok(())
}

fn cmd_sessions_current(engine: &ExplorerEngine) -> Result<()> {
    println!("{}", engine.session_id());
    Ok(())
}

fn cmd_sessions_new(engine: &mut ExplorerEngine) -> Result<()> {
    let id = engine.new_session()?;
    println!("Created session {}", id);
    Ok(())
}

fn cmd_sessions_use(engine: &mut ExplorerEngine, id: &str) -> Result<()> {
    engine
        .switch_session(id)
        .with_context(|| format!("Failed to switch to session '{}'", id))?;
    println!("Switched to session {}", id);
    Ok(())
}

/// Run and save one batch
async fn cmd_batch(
    engine: &mut ExplorerEngine,
    specs: BTreeMap<String, ParameterSpec>,
    size: usize,
    agent: &str,
    delay: Duration,
) -> Result<()> {
    register(engine, specs)?;
    engine.change_agent(agent).await?;

    let outcome = engine
        .run_batch(&mut PlaceholderRenderer, size, delay, |index, size| {
            eprintln!("  step {}/{}", index, size);
        })
        .await?;

    match outcome {
        StepOutcome::Finished {
            samples,
            persisted: true,
        } => {
            println!(
                "Saved {} samples to session {} with {}",
                samples,
                engine.session_id(),
                agent
            );
            Ok(())
        }
        StepOutcome::Finished {
            samples,
            persisted: false,
        } => bail!("Batch of {} samples finished but could not be saved", samples),
        _ => bail!("Batch did not run"),
    }
}

/// Generate or replay one sample; save it when a score is given
async fn cmd_sample(
    engine: &mut ExplorerEngine,
    specs: BTreeMap<String, ParameterSpec>,
    score: Option<f64>,
    replay: Option<&str>,
) -> Result<()> {
    register(engine, specs)?;

    if let Some(seed) = replay {
        let applied = engine.replay_seed(seed);
        println!(
            "{}",
            serde_json::to_string_pretty(&engine.snapshot(SnapshotOptions::default()))?
        );
        info!(seed = %seed, applied = applied, "replayed sample");
        if let Some(score) = score {
            let id = engine
                .save_single(
                    &BTreeMap::new(),
                    Some(PLACEHOLDER_IMAGE.to_string()),
                    score,
                    Default::default(),
                )
                .await?;
            println!("Saved record {} with score {}", id, score);
        }
        return Ok(());
    }

    let sample = engine.generate_manual(&mut PlaceholderRenderer).await;
    println!("{}", serde_json::to_string_pretty(sample)?);
    if let Some(score) = score {
        let id = engine.commit_manual(score).await?;
        println!("Saved record {} with score {}", id, score);
    }
    Ok(())
}

async fn cmd_score(engine: &mut ExplorerEngine, id: u64, score: f64) -> Result<()> {
    match engine.update_score(id, score).await? {
        Some(record) => {
            println!(
                "Record {} scored {}",
                record.id.unwrap_or(id),
                record.score.unwrap_or(score)
            );
            Ok(())
        }
        None => bail!("Record {} was not updated", id),
    }
}

async fn cmd_time_warp(
    engine: &mut ExplorerEngine,
    specs: BTreeMap<String, ParameterSpec>,
    steps: f64,
    agent: &str,
) -> Result<()> {
    if !steps.is_finite() {
        bail!("Steps must be a finite number");
    }
    if !specs.is_empty() {
        register(engine, specs)?;
    }
    engine.set_agent(agent)?;
    engine.time_warp(steps).await;
    println!("Moved {} by {} steps", agent, steps.trunc());
    Ok(())
}

async fn cmd_records(engine: &ExplorerEngine) -> Result<()> {
    let records = engine.load_data().await;
    if records.is_empty() {
        println!("No scored records in session {}", engine.session_id());
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn cmd_agents(engine: &ExplorerEngine) -> Result<()> {
    for agent in engine.agent_summaries() {
        let prefix = if agent.active { "* " } else { "  " };
        println!("{}{} ({})", prefix, agent.name, agent.strategy);
        println!("    {}", agent.description);
    }
    Ok(())
}
