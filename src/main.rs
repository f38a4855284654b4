//! Command-line entry point: index a configuration directory, keep it fresh,
//! and answer questions about it interactively.

use infra_memory::config::QueryConfig;
use infra_memory::memory::{Answer, BuildOutcome};
use infra_memory::{Credentials, MemoryConfig, ProjectMemory, telemetry};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt as _;

#[derive(Parser)]
#[command(name = "infra-memory", version, about = "Ask questions about your infrastructure configuration")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory of configuration files to index.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Index, watch for changes, and answer questions interactively (default).
    Chat,
    /// Build the index once and exit.
    Index,
    /// Build the index, answer a single question, and exit.
    Ask {
        /// The question to answer.
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Checked before anything else touches disk or network.
    let credentials = Credentials::from_env()?;

    let mut config = MemoryConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data.dir = data_dir;
    }

    let _log_guard = telemetry::init(&config.logging)?;
    tracing::debug!(?credentials, "credentials loaded");

    let memory = ProjectMemory::open(&config, &credentials)
        .await
        .context("failed to initialise project memory")?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Index => {
            report_build(memory.build().await?);
            Ok(())
        }
        Command::Ask { question } => {
            report_build(memory.build().await?);
            let answer = memory.answer(&question.join(" ")).await?;
            print_answer(&answer, &config.query);
            Ok(())
        }
        Command::Chat => run_chat(&memory, &config).await,
    }
}

async fn run_chat(memory: &ProjectMemory, config: &MemoryConfig) -> anyhow::Result<()> {
    match memory.build().await {
        Ok(outcome) => report_build(outcome),
        // The watcher retries on the next change; the loop still starts.
        Err(error) => tracing::error!(%error, "initial index build failed"),
    }

    let watcher = memory.watch(config)?;
    let result = chat_loop(memory, &config.query).await;

    tracing::info!("shutting down");
    watcher.stop().await;
    result
}

async fn chat_loop(memory: &ProjectMemory, query: &QueryConfig) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nAsk about your project ('{}' to quit): ", query.exit_keyword);
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        // EOF on stdin ends the session like the exit keyword.
        let Some(line) = line else { break };

        let question = line.trim();
        if question.eq_ignore_ascii_case(&query.exit_keyword) {
            break;
        }
        if question.is_empty() {
            continue;
        }

        let result = tokio::select! {
            result = memory.answer(question) => result,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        match result {
            Ok(answer) => print_answer(&answer, query),
            Err(error) if error.is_user_facing() => println!("{error}"),
            Err(error) => {
                tracing::error!(%error, "failed to answer question");
                println!("Could not answer that question: {error}");
            }
        }
    }

    Ok(())
}

fn report_build(outcome: BuildOutcome) {
    match outcome {
        BuildOutcome::Built(stats) => println!(
            "Indexed {} files ({} fragments) in {:.1}s.",
            stats.documents,
            stats.records,
            stats.elapsed.as_secs_f32()
        ),
        BuildOutcome::NoData { data_dir } => println!(
            "No non-empty configuration files found in {}; add some and they will be indexed automatically.",
            data_dir.display()
        ),
    }
}

fn print_answer(answer: &Answer, query: &QueryConfig) {
    println!("\n{}", answer.text.trim());

    if answer.sources.is_empty() || query.preview_fragments == 0 {
        return;
    }
    println!("\nContext:");
    for (rank, source) in answer.sources.iter().take(query.preview_fragments).enumerate() {
        println!(
            "  {}. {} | {}",
            rank + 1,
            source.path,
            source.preview(query.preview_chars).replace('\n', " ")
        );
    }
}
