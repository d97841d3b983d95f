//! CLI binary for validating, inspecting and simulating deskflow workflows.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deskflow_engine::{
    builtin_names, lint_config, CreateEntity, LlmOracle, OfflineOracle, OracleSettings,
    ServiceOptions, Severity, TransitionOracle, WorkflowConfig, WorkflowService,
};
use deskflow_llm::{LlmClient, LoggingMiddleware, TokenUsageMiddleware};

#[derive(Parser)]
#[command(name = "deskflow", version, about = "LLM-routed stage workflows with deterministic fallback")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Model selection shared by commands that call the oracle.
#[derive(clap::Args, Clone)]
struct OracleArgs {
    /// Don't call a model; every routing call falls back
    #[arg(long)]
    dry_run: bool,

    /// Model name
    #[arg(long, default_value = "gpt-4o")]
    model: String,

    /// Force a provider (openai, anthropic) instead of inferring it from the model
    #[arg(long)]
    provider: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Per-call timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow's stage table
    Validate {
        /// Built-in workflow name or path to a workflow JSON file
        workflow: String,
    },

    /// Show the stages, pools and rules of a workflow
    Info {
        /// Built-in workflow name or path to a workflow JSON file
        workflow: String,
    },

    /// List the built-in workflows
    List,

    /// Create an entity and advance it until it reaches the terminal stage
    Simulate {
        /// Built-in workflow name or path to a workflow JSON file
        workflow: String,

        /// Profile to use instead of a random one
        #[arg(long)]
        profile: Option<String>,

        /// Acquisition channel instead of a random one
        #[arg(long)]
        channel: Option<String>,

        /// Maximum number of advances before giving up
        #[arg(long, default_value = "20")]
        max_steps: usize,

        /// Seed for profile, channel and outcome draws
        #[arg(long)]
        seed: Option<u64>,

        /// Print each step as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        oracle: OracleArgs,
    },

    /// Decide the next stage from a stage index without an entity
    Next {
        /// Built-in workflow name or path to a workflow JSON file
        workflow: String,

        /// Zero-based position of the current stage
        index: usize,

        #[command(flatten)]
        oracle: OracleArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { workflow } => cmd_validate(&workflow)?,
        Commands::Info { workflow } => cmd_info(&workflow)?,
        Commands::List => cmd_list(),
        Commands::Simulate {
            workflow,
            profile,
            channel,
            max_steps,
            seed,
            json,
            oracle,
        } => {
            cmd_simulate(&workflow, CreateEntity { profile, channel }, max_steps, seed, json, &oracle)
                .await?
        }
        Commands::Next {
            workflow,
            index,
            oracle,
        } => cmd_next(&workflow, index, &oracle).await?,
    }

    Ok(())
}

fn cmd_validate(workflow: &str) -> anyhow::Result<()> {
    let config = WorkflowConfig::load(workflow)?;
    let diagnostics = lint_config(&config);

    if diagnostics.is_empty() {
        println!("Workflow '{}' is valid", config.name);
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
        };
        match &diag.stage_id {
            Some(stage) => println!("[{}] {} ({}): {}", severity, diag.rule, stage, diag.message),
            None => println!("[{}] {}: {}", severity, diag.rule, diag.message),
        }
        if let Some(fix) = &diag.fix {
            println!("    fix: {}", fix);
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(workflow: &str) -> anyhow::Result<()> {
    let config = WorkflowConfig::load(workflow)?;
    let graph = deskflow_engine::StageGraph::from_config(&config)?;

    println!("Workflow: {}", config.name);
    println!("Entity prefix: {}", config.entity_prefix);
    println!("Stages: {}", graph.len());
    println!("Initial: {}", graph.initial_stage().name);
    println!("Terminal: {}", graph.terminal_stage().name);
    println!("Narration: {}", if config.agent_role.is_some() { "on" } else { "off" });

    println!("\nStages:");
    for (index, stage) in graph.stages().iter().enumerate() {
        let successors = graph.successor_names(stage);
        let arrow = if successors.is_empty() {
            "(terminal)".to_string()
        } else {
            format!("-> {}", successors.join(", "))
        };
        println!("  {:>2}. {} {}", index, stage.name, arrow);
    }

    if !config.profiles.is_empty() {
        println!("\nProfiles:");
        for profile in &config.profiles {
            println!("  {}", profile.name);
        }
    }
    if !config.channels.is_empty() {
        println!("\nChannels: {}", config.channels.join(", "));
    }
    if !config.staff.is_empty() {
        println!("\nStaff:");
        for member in &config.staff {
            println!("  {} ({})", member.name, member.expertise.join(", "));
        }
    }
    if !config.rules.is_empty() {
        println!("\nRules:");
        for rule in &config.rules {
            let keys: Vec<&str> = rule.effects.iter().map(|e| e.key.as_str()).collect();
            println!("  at {}: sets {}", rule.stage, keys.join(", "));
        }
    }

    Ok(())
}

fn cmd_list() {
    for name in builtin_names() {
        println!("{}", name);
    }
}

/// Build the oracle for a run. Dry runs never touch the network.
fn build_oracle(args: &OracleArgs) -> anyhow::Result<(Arc<dyn TransitionOracle>, Option<TokenUsageMiddleware>)> {
    if args.dry_run {
        return Ok((Arc::new(OfflineOracle), None));
    }

    let usage = TokenUsageMiddleware::new();
    let client = LlmClient::from_env()?
        .with_middleware(LoggingMiddleware)
        .with_middleware(usage.clone());
    let settings = OracleSettings {
        model: args.model.clone(),
        provider: args.provider.clone(),
        temperature: args.temperature,
        timeout: Duration::from_secs(args.timeout_secs),
        ..OracleSettings::default()
    };
    Ok((Arc::new(LlmOracle::new(Arc::new(client), settings)), Some(usage)))
}

async fn cmd_simulate(
    workflow: &str,
    request: CreateEntity,
    max_steps: usize,
    seed: Option<u64>,
    json: bool,
    oracle_args: &OracleArgs,
) -> anyhow::Result<()> {
    let config = WorkflowConfig::load(workflow)?;
    let (oracle, usage) = build_oracle(oracle_args)?;
    let service = WorkflowService::with_options(
        config,
        oracle,
        ServiceOptions {
            seed,
            ..ServiceOptions::default()
        },
    )?;

    let mut events = service.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(?event, "workflow event");
        }
    });

    let entity = service.create_entity(request).await?;
    if json {
        println!("{}", serde_json::to_string(&entity)?);
    } else {
        println!("Entity: {} ({})", entity.id, entity.profile.name);
        if let Some(channel) = &entity.channel {
            println!("Channel: {}", channel);
        }
        println!("Stage: {}", entity.stage_name);
        if oracle_args.dry_run {
            println!("(dry run mode -- no LLM calls, every step falls back)");
        }
    }

    let mut finished = entity.terminal;
    for step in 1..=max_steps {
        if finished {
            break;
        }
        let advance = service.advance(&entity.id).await?;
        if json {
            println!("{}", serde_json::to_string(&advance)?);
        } else {
            let from = service
                .graph()
                .get(&advance.from_stage)
                .map_or(advance.from_stage.as_str(), |s| s.name.as_str());
            println!("\nStep {}: {}", step, from);
            for (key, value) in &advance.status_updates {
                println!("  status {} = {}", key, value);
            }
            if let Some(narration) = &advance.narration {
                println!("  agent: {}", narration);
            }
            let decision = &advance.decision;
            match &decision.stage_name {
                Some(name) => println!(
                    "  -> {}{} [{}] {}",
                    name,
                    if decision.fallback { " (fallback)" } else { "" },
                    decision.sentiment,
                    decision.reason
                ),
                None => println!("  {}", decision.reason),
            }
            if let Some(error) = &decision.error {
                println!("  error: {}", error);
            }
        }
        if advance.decision.error.is_some() {
            anyhow::bail!("routing failed at stage '{}'", advance.from_stage);
        }
        finished = advance.entity.terminal;
    }

    if !json {
        if finished {
            println!("\nReached terminal stage");
        } else {
            println!("\nStopped after {} steps without reaching the terminal stage", max_steps);
        }
        if let Some(usage) = usage {
            println!(
                "Model calls: {} (input tokens {}, output tokens {})",
                usage.calls(),
                usage.total_input_tokens(),
                usage.total_output_tokens()
            );
        }
    }

    Ok(())
}

async fn cmd_next(workflow: &str, index: usize, oracle_args: &OracleArgs) -> anyhow::Result<()> {
    let config = WorkflowConfig::load(workflow)?;
    let (oracle, _) = build_oracle(oracle_args)?;
    let service = WorkflowService::new(config, oracle)?;
    let view = service.decide_from_index(index).await;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
