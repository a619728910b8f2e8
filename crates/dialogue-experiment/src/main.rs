//! Dialogue Experiment CLI.
//!
//! Commands:
//! - validate: Check an experiment configuration against a roster
//! - run: Execute the experiment and store the result bundle

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use dialogue_experiment::experiment::{
    generate_experiment_id, ExperimentConfig, ExperimentRunner, ExperimentSpecification,
};
use dialogue_experiment::llm_client::OpenAiClient;
use dialogue_experiment::roster::Roster;
use dialogue_experiment::storage::JsonFileStore;

#[derive(Parser)]
#[command(name = "dialogue-experiment")]
#[command(version)]
#[command(about = "Conversation experiments with synthetic participants")]
struct Cli {
    /// Experiment configuration (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Participant roster (CSV)
    #[arg(long)]
    roster: PathBuf,

    /// Roster column holding the unique participant identifier
    #[arg(long, default_value = "ID")]
    id_column: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the configuration and exit
    Validate,

    /// Run the experiment
    Run {
        /// OpenAI-compatible API base URL
        #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com")]
        api_base: String,

        /// API key, sent as a bearer token when set
        #[arg(long, env = "OPENAI_API_KEY")]
        api_key: Option<String>,

        /// Per-request timeout in seconds
        #[arg(long, default_value = "60")]
        request_timeout: u64,

        /// Wall-clock budget per session, in seconds
        #[arg(long)]
        session_deadline: Option<u64>,

        /// Base directory for stored bundles
        #[arg(long, default_value = ".")]
        output: PathBuf,

        /// Random seed (omit for a fresh stream)
        #[arg(long)]
        seed: Option<u64>,

        /// Run only the first session
        #[arg(long)]
        test: bool,
    },
}

fn load_specification(cli: &Cli) -> Result<ExperimentSpecification> {
    let config_text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read {}", cli.config.display()))?;
    let config: ExperimentConfig =
        serde_json::from_str(&config_text).context("Failed to parse experiment configuration")?;

    let roster_file = File::open(&cli.roster)
        .with_context(|| format!("Failed to open {}", cli.roster.display()))?;
    let roster = Roster::from_csv(roster_file, &cli.id_column)?;

    Ok(ExperimentSpecification::new(config, roster)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    match &cli.command {
        Commands::Validate => {
            let spec = load_specification(&cli)?;
            println!("Configuration is valid");
            println!("Sessions: {}", spec.config().num_sessions);
            println!(
                "Agents per session: {}",
                spec.config().num_agents_per_session
            );
            println!("Roster records: {}", spec.roster().len());
        }
        Commands::Run {
            api_base,
            api_key,
            request_timeout,
            session_deadline,
            output,
            seed,
            test,
        } => {
            let spec = load_specification(&cli)?;
            let client = OpenAiClient::new(
                api_base,
                api_key.clone(),
                Duration::from_secs(*request_timeout),
            )?;
            let store = JsonFileStore::new(output);

            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(*seed),
                None => StdRng::from_os_rng(),
            };
            let experiment_id = generate_experiment_id(&mut rng);
            info!(experiment = %experiment_id, "Prepared experiment");

            let mut runner = ExperimentRunner::new(
                spec,
                Arc::new(client),
                Arc::new(store),
                experiment_id.clone(),
            )
            .with_test_mode(*test);
            if let Some(secs) = session_deadline {
                runner = runner.with_session_deadline(Duration::from_secs(*secs));
            }

            let bundle = runner.run(&mut rng).await?;

            println!("\n=== Experiment Complete ===");
            println!("Experiment id: {}", experiment_id);
            println!("Sessions run: {}", bundle.sessions.len());
            for (session_id, session) in &bundle.sessions {
                println!(
                    "  session {}: treatment '{}', {} log entries",
                    session_id,
                    session.treatment,
                    session.message_history.len()
                );
            }
        }
    }

    Ok(())
}
