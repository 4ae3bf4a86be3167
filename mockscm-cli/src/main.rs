//! MockSCM command-line tool
//!
//! Replays a scenario file into a fresh controller and inspects the result.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mockscm_core::{Controller, Scenario};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mockscm")]
#[command(author = "MockSCM Contributors")]
#[command(version = "0.1.0")]
#[command(about = "In-memory mock source-control backend", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a scenario and list every repository's heads
    Replay {
        /// Scenario JSON file
        scenario: PathBuf,
    },

    /// Replay a scenario and print the history of one identifier
    Log {
        scenario: PathBuf,
        #[arg(short, long)]
        repo: String,
        /// Hash, branch, tag or change-request/<n>
        #[arg(short = 'i', long = "ref", default_value = "master")]
        identifier: String,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Replay a scenario and write one revision's files to a directory
    Checkout {
        scenario: PathBuf,
        #[arg(short, long)]
        repo: String,
        #[arg(short = 'i', long = "ref", default_value = "master")]
        identifier: String,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_tracing(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load(path: &Path) -> Result<Arc<Controller>> {
    let scenario = Scenario::load(path)
        .with_context(|| format!("Failed to load scenario from {}", path.display()))?;
    info!("Replaying {} steps from {}", scenario.steps.len(), path.display());
    let controller = scenario.instantiate().context("Failed to replay scenario")?;
    Ok(controller)
}

fn print_heads(controller: &Controller) -> Result<()> {
    for repo in controller.list_repositories() {
        println!("{}", repo);
        for branch in controller.list_branches(&repo)? {
            println!("  branch {:<24} {}", branch, controller.revision(&repo, &branch)?);
        }
        for tag in controller.list_tags(&repo)? {
            println!("  tag    {:<24} {}", tag, controller.revision(&repo, &tag)?);
        }
        for number in controller.list_change_requests(&repo)? {
            let reference = mockscm_core::change_request_ref(number);
            println!(
                "  change {:<24} {} -> {}",
                reference,
                controller.revision(&repo, &reference)?,
                controller.change_request_target(&repo, number)?
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Replay { scenario } => {
            let controller = load(&scenario)?;
            print_heads(&controller)?;
            controller.close();
        }

        Commands::Log {
            scenario,
            repo,
            identifier,
            json,
        } => {
            let controller = load(&scenario)?;
            let log = controller.log(&repo, &identifier)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&log)?);
            } else {
                for entry in &log {
                    println!("{}", entry);
                }
            }
            controller.close();
        }

        Commands::Checkout {
            scenario,
            repo,
            identifier,
            output,
        } => {
            let controller = load(&scenario)?;
            let hash = controller
                .checkout(&output, &repo, &identifier)
                .with_context(|| format!("Failed to check out {} into {}", identifier, output.display()))?;
            println!("Checked out {} ({}) into {}", identifier, hash, output.display());
            controller.close();
        }
    }

    Ok(())
}
