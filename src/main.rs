use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;

use stepflow_rs::engine::config::EngineConfig;
use stepflow_rs::engine::workflow::checkpoint::{content_hash, CheckpointStore};
use stepflow_rs::engine::workflow::loader::GraphLoader;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show what a checkpoint file records
    Inspect {
        /// Path to the checkpoint file, or an execution id in the checkpoint directory
        #[arg(short, long)]
        checkpoint: String,
    },
    /// Tell whether a checkpoint can resume the given graph
    Check {
        /// Path to the graph file (YAML or JSON)
        #[arg(short, long)]
        graph: PathBuf,

        /// Path to the checkpoint file, or an execution id in the checkpoint directory
        #[arg(short, long)]
        checkpoint: String,
    },
    /// Print the content hash of every step in a graph
    Hash {
        /// Path to the graph file (YAML or JSON)
        #[arg(short, long)]
        graph: PathBuf,
    },
}

fn checkpoint_store(config: &EngineConfig, checkpoint: &str) -> anyhow::Result<CheckpointStore> {
    let path = PathBuf::from(checkpoint);
    if path.extension().is_some() || path.components().count() > 1 {
        return Ok(CheckpointStore::at(path));
    }
    Ok(CheckpointStore::new(&config.checkpoint_dir, checkpoint)?)
}

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = EngineConfig::from_env()?;

    match args.command {
        Commands::Inspect { checkpoint } => {
            let store = checkpoint_store(&config, &checkpoint)?;
            let Some(saved) = store.load()? else {
                bail!("no checkpoint at {}", store.path().display());
            };

            println!("Checkpoint: {}", store.path().display());
            println!("Completed steps: {}", saved.completed_steps.len());
            for step_id in &saved.completed_steps {
                let action = saved
                    .action_for(step_id)
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("  {} -> {}", step_id, action);
            }
            match &saved.failed_step {
                Some(step_id) => println!("Failed step: {}", step_id),
                None => println!("Failed step: none"),
            }
            if saved.completed {
                println!("Run completed; the next attempt starts over");
            }
        }
        Commands::Check { graph, checkpoint } => {
            let description = GraphLoader::new()
                .load_graph(&graph)
                .with_context(|| format!("loading graph {}", graph.display()))?;
            let store = checkpoint_store(&config, &checkpoint)?;
            let Some(saved) = store.load()? else {
                bail!("no checkpoint at {}", store.path().display());
            };

            match saved.first_incompatibility(&description) {
                None => println!(
                    "Compatible: {} completed step(s) would be skipped",
                    saved.completed_steps.len()
                ),
                Some(step_id) => {
                    println!(
                        "Incompatible: step '{}' changed since it completed; the next attempt starts over",
                        step_id
                    );
                    std::process::exit(2);
                }
            }
        }
        Commands::Hash { graph } => {
            let description = GraphLoader::new()
                .load_graph(&graph)
                .with_context(|| format!("loading graph {}", graph.display()))?;
            for spec in &description.steps {
                println!("{}  {}", content_hash(spec), spec.id);
            }
        }
    }

    Ok(())
}
