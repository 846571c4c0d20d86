//! mindloop CLI: the main entry point.
//!
//! Commands:
//! - `run`       : Execute a pattern for an agent and print the result
//! - `events`    : Replay the event trail of an execution
//! - `executions`: List recent executions
//! - `memory`    : Show an agent's memories
//! - `patterns`  : List available patterns
//! - `config`    : Show, create or validate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "mindloop",
    about = "mindloop: agent reasoning and orchestration engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow pattern
    Run {
        /// The task for the agent
        prompt: String,

        /// Agent whose memories are read and written
        #[arg(short, long, default_value = "default")]
        agent: String,

        /// Pattern to execute
        #[arg(short, long, default_value = "sequential-reflection")]
        pattern: String,

        /// Stream events while the execution runs
        #[arg(short, long)]
        follow: bool,
    },

    /// Print the event trail of an execution
    Events {
        execution_id: String,

        /// Print raw JSON, one event per line
        #[arg(long)]
        json: bool,
    },

    /// List recent executions
    Executions {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show an agent's memories
    Memory {
        agent_id: String,

        /// Only records of this type (observation, reflection, tool_result)
        #[arg(short, long)]
        kind: Option<String>,

        /// Rank by relevance to this text instead of recency
        #[arg(short, long)]
        query: Option<String>,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// List available patterns
    Patterns,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check the configuration for errors
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            prompt,
            agent,
            pattern,
            follow,
        } => commands::run::run(&agent, &pattern, &prompt, follow).await?,
        Commands::Events { execution_id, json } => {
            commands::events::show(&execution_id, json).await?
        }
        Commands::Executions { limit } => commands::events::list(limit).await?,
        Commands::Memory {
            agent_id,
            kind,
            query,
            limit,
        } => commands::memory::show(&agent_id, kind.as_deref(), query.as_deref(), limit).await?,
        Commands::Patterns => commands::run::patterns()?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Init { force } => commands::config_cmd::init(force)?,
            ConfigAction::Validate => commands::config_cmd::validate()?,
            ConfigAction::Path => commands::config_cmd::path(),
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["mindloop", "run", "summarize X"]).unwrap();
        match cli.command {
            Commands::Run {
                prompt,
                agent,
                pattern,
                follow,
            } => {
                assert_eq!(prompt, "summarize X");
                assert_eq!(agent, "default");
                assert_eq!(pattern, "sequential-reflection");
                assert!(!follow);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_with_flags() {
        let cli = Cli::try_parse_from([
            "mindloop",
            "-v",
            "run",
            "--agent",
            "a1",
            "--pattern",
            "parallel-exploration",
            "--follow",
            "think",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Run { ref agent, ref pattern, follow: true, .. }
                if agent == "a1" && pattern == "parallel-exploration"
        ));
    }

    #[test]
    fn memory_requires_agent() {
        assert!(Cli::try_parse_from(["mindloop", "memory"]).is_err());
        let cli = Cli::try_parse_from(["mindloop", "memory", "a1", "--kind", "reflection"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Memory { ref kind, limit: 10, .. } if kind.as_deref() == Some("reflection")
        ));
    }
}
