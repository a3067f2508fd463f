//! A thin `clap` CLI over the engine facade, for manually exercising discovery/analysis against a
//! real host without embedding this crate in an editor integration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use toolset_intel::{AnalysisOptions, Engine, EngineConfig, InitializeOptions};

#[derive(Parser)]
#[command(name = "toolset-cli", about = "Discover and analyze C/C++ toolchains")]
struct Cli {
    /// Directories to search for `toolset.*.json` definitions.
    #[arg(long = "definitions", global = true)]
    definition_roots: Vec<PathBuf>,

    /// Directory to persist the detected-toolsets cache under.
    #[arg(long, global = true)]
    storage_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run discovery for every loaded definition and print the identities found.
    List,
    /// Resolve a single compiler path or name pattern to a toolset.
    Identify { candidate: String },
    /// Resolve the IntelliSense configuration for a compiler invocation.
    Analyze {
        toolset_name: String,
        #[arg(trailing_var_arg = true)]
        argv: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig { definition_roots: cli.definition_roots.clone(), ..EngineConfig::default() };
    let engine = Engine::new(config);
    engine
        .initialize(
            cli.definition_roots,
            InitializeOptions { quick: false, storage_path: cli.storage_path },
        )
        .await?;

    match cli.command {
        Command::List => {
            let toolsets = engine.get_toolsets().await?;
            for (path, toolset) in toolsets {
                println!("{}\t{}", toolset.name(), path.display());
            }
        }
        Command::Identify { candidate } => match engine.identify_toolset(&candidate).await? {
            Some(toolset) => println!("{}\t{}", toolset.name(), toolset.compiler_path.display()),
            None => println!("no toolset matched {candidate}"),
        },
        Command::Analyze { toolset_name, argv } => {
            let Some(toolset) = engine.identify_toolset(&toolset_name).await? else {
                anyhow::bail!("no toolset matched {toolset_name}");
            };
            let configuration = engine
                .get_intellisense_configuration(&toolset, &argv, &AnalysisOptions::default())
                .await?;
            println!("{}", serde_json::to_string_pretty(&configuration.0)?);
        }
    }

    Ok(())
}
