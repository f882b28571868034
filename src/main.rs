use aicf_store::{
    APP_NAME, AicfStore, Config, Conversation, DEFAULT_STORE_DIR, Decision, LockStrategy, Memory,
    PiiPolicy, RecordKind, TracingAuditSink, WorkState,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(about = "Append-only, git-friendly record store for AI context")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store directory.
    #[arg(short, long, default_value = DEFAULT_STORE_DIR)]
    store: PathBuf,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pii_policy: Option<PiiPolicy>,

    #[arg(long, value_enum)]
    lock_strategy: Option<LockStrategy>,
}

#[derive(Subcommand)]
enum Commands {
    Init {},
    AddConversation {
        #[arg(short, long, default_value = "user")]
        role: String,

        content: String,
    },
    AddDecision {
        decision: String,

        #[arg(short, long, default_value = "")]
        rationale: String,

        #[arg(short, long, default_value = "medium")]
        impact: String,
    },
    AddMemory {
        #[arg(short = 't', long = "type", default_value = "semantic")]
        memory_type: String,

        content: String,
    },
    SetWorkState {
        #[arg(short, long, default_value = "in_progress")]
        status: String,

        current_task: String,

        /// Repeat for each step.
        #[arg(short, long = "next")]
        next_steps: Vec<String>,
    },
    Last {
        #[arg(value_enum)]
        kind: RecordKind,

        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
    Search {
        term: String,

        /// Restrict to these kinds; repeatable.
        #[arg(short, long, value_enum)]
        kind: Vec<RecordKind>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    Stats {},
    Index {},
    RebuildIndex {},
    Validate {
        file: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(policy) = cli.pii_policy {
        config.pii_policy = policy;
    }
    if let Some(strategy) = cli.lock_strategy {
        config.lock_strategy = strategy;
    }

    let store = AicfStore::open_with_audit(&cli.store, config, Arc::new(TracingAuditSink)).await?;

    match cli.command {
        Commands::Init {} => {
            let index = store.rebuild_index().await?;
            println!("Initialized store at {:?}", store.root());
            println!("Sections: {}", index.section_names().collect::<Vec<_>>().join(", "));
        }
        Commands::AddConversation { role, content } => {
            let receipt = store
                .write_conversation(Conversation::new(role, content))
                .await?;
            print_json(&receipt)?;
        }
        Commands::AddDecision {
            decision,
            rationale,
            impact,
        } => {
            let receipt = store
                .write_decision(Decision::new(decision, rationale, impact))
                .await?;
            print_json(&receipt)?;
        }
        Commands::AddMemory {
            memory_type,
            content,
        } => {
            let receipt = store.write_memory(Memory::new(memory_type, content)).await?;
            print_json(&receipt)?;
        }
        Commands::SetWorkState {
            status,
            current_task,
            next_steps,
        } => {
            let mut work_state = WorkState::new(status, current_task);
            work_state.next_steps = next_steps;
            let receipt = store.write_work_state(work_state).await?;
            print_json(&receipt)?;
        }
        Commands::Last { kind, count } => {
            let records = store.get_last_records(kind, count).await?;
            print_json(&records)?;
        }
        Commands::Search { term, kind, limit } => {
            let report = store.search(&term, &kind, limit).await;
            for (kind, reason) in &report.failures {
                eprintln!("warning: could not search {kind}: {reason}");
            }
            println!("Found {} results:", report.hits.len());
            for (i, hit) in report.hits.iter().enumerate() {
                println!("{}. [{}] line {}: {}", i + 1, hit.kind, hit.line_number, hit.payload);
            }
        }
        Commands::Stats {} => {
            let stats = store.get_stats().await?;
            println!("Store Statistics:");
            println!("  Root: {}", stats.root.display());
            println!("  Total records: {}", stats.total_records);
            println!("  Total size: {} bytes", stats.total_bytes);
            if let Some(last) = &stats.last_updated {
                println!("  Last updated: {last}");
            }
        }
        Commands::Index {} => {
            let index = store.get_index().await?;
            print!("{}", index.render()?);
        }
        Commands::RebuildIndex {} => {
            let index = store.rebuild_index().await?;
            print!("{}", index.render()?);
        }
        Commands::Validate { file } => {
            let report = store.validate_file(&file).await?;
            print_json(&report)?;
            if !report.is_valid() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
