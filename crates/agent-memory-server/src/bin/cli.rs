//! `agent-memory-cli`: one-shot maintenance/export/import companion to
//! `agent-memory-server`, for operators running a decay/consolidate/gc tick
//! or a backup from a terminal or cron job without going through HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use agent_memory_core::{
    AppConfig, Category, CoreContext, Filter, MaintenancePhase, RecallInput, StoreInput,
};

#[derive(Parser)]
#[command(name = "agent-memory-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Maintenance, export/import, and recall CLI for agent-memory-core")]
struct Cli {
    /// Agent to operate on; "all" fans out across every known agent store.
    #[arg(long, global = true, default_value = "main")]
    agent: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show per-agent memory counts across the relational/vector/lexical tables.
    Stats,
    /// Run a full maintenance sweep: decay, consolidate, resolve conflicts, GC.
    Maintain,
    /// Run Ebbinghaus strength decay only.
    Decay,
    /// Run similarity-graph consolidation and exclusive-slot conflict resolution.
    Consolidate,
    /// Hard-purge memories already past their soft-delete retention window.
    Compress,
    /// Soft-delete weak/stale/unused memories and hard-purge expired ones.
    Gc,
    /// Insert a single memory.
    Store {
        text: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        importance: Option<f32>,
        #[arg(long)]
        pinned: bool,
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Insert a pinned, max-importance rule memory.
    Rule { text: String },
    /// Run a recall query and print ranked results.
    Recall {
        query: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Pin a memory by id, exempting it from all lifecycle attrition.
    Pin { id: String },
    /// Unpin a memory by id, resuming decay from its current strength.
    Unpin { id: String },
    /// Soft-delete a memory by id.
    Forget { id: String },
    /// Check recall coverage for a list of topics (detects catastrophic loss).
    AmnesiaCheck { topics: Vec<String> },
    /// Export memories as JSON to a file (or stdout if `-` / omitted).
    Export {
        #[arg(default_value = "-")]
        output: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Import memories from a JSON export file (idempotent by id).
    Import { input: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {e}", "configuration error".red().bold());
            std::process::exit(2);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let ctx = Arc::new(CoreContext::new(config));

    runtime.block_on(run(ctx, &cli.agent, cli.command))
}

async fn run(ctx: Arc<CoreContext>, agent: &str, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Stats => cmd_stats(&ctx, agent),
        Commands::Maintain => cmd_maintain(&ctx, agent),
        Commands::Decay => cmd_phase(&ctx, agent, MaintenancePhase::Decay),
        Commands::Consolidate => cmd_phase(&ctx, agent, MaintenancePhase::Consolidate),
        Commands::Compress => cmd_phase(&ctx, agent, MaintenancePhase::Compress),
        Commands::Gc => cmd_phase(&ctx, agent, MaintenancePhase::Gc),
        Commands::Store { text, category, importance, pinned, namespace } => {
            cmd_store(&ctx, agent, text, category, importance, pinned, namespace).await
        }
        Commands::Rule { text } => cmd_rule(&ctx, agent, text).await,
        Commands::Recall { query, limit } => cmd_recall(&ctx, agent, query, limit).await,
        Commands::Pin { id } => cmd_pin(&ctx, agent, &id, true),
        Commands::Unpin { id } => cmd_pin(&ctx, agent, &id, false),
        Commands::Forget { id } => cmd_forget(&ctx, agent, &id),
        Commands::AmnesiaCheck { topics } => cmd_amnesia_check(&ctx, agent, topics).await,
        Commands::Export { output, category, namespace } => cmd_export(&ctx, agent, output, category, namespace),
        Commands::Import { input } => cmd_import(&ctx, agent, input),
    }
}

fn cmd_stats(ctx: &CoreContext, agent: &str) -> anyhow::Result<()> {
    println!("{}", "=== agent-memory stats ===".cyan().bold());
    let agents = ctx.pool.resolve_agents(agent)?;
    for agent in agents {
        let (memory_rows, vec_rows, fts_rows) = ctx.stats(&agent)?;
        println!(
            "{}  memory={} vector={} lexical={}",
            agent.white().bold(),
            memory_rows,
            vec_rows,
            fts_rows,
        );
    }
    Ok(())
}

fn cmd_maintain(ctx: &CoreContext, agent: &str) -> anyhow::Result<()> {
    println!("{}", "=== running full maintenance sweep ===".cyan().bold());
    for (agent, result) in ctx.run_maintenance(agent)? {
        println!("{}", agent.white().bold());
        println!("  decayed:              {}", result.decayed);
        println!("  consolidated groups:  {}", result.consolidated_groups);
        println!("  consolidated merged:  {}", result.consolidated_memories);
        println!("  conflicts resolved:   {}", result.conflicts_resolved);
        println!("  soft-deleted:         {}", result.soft_deleted);
        println!("  hard-purged:          {}", result.hard_purged);
        println!("  {}", format!("duration: {}ms", result.duration_ms).dimmed());
    }
    Ok(())
}

fn cmd_phase(ctx: &CoreContext, agent: &str, phase: MaintenancePhase) -> anyhow::Result<()> {
    println!("{}", format!("=== running {} ===", phase.as_str()).cyan().bold());
    for (agent, value) in ctx.run_maintenance_phase(agent, phase)? {
        println!("{}: {}", agent.white().bold(), value);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_store(
    ctx: &CoreContext,
    agent: &str,
    text: String,
    category: Option<String>,
    importance: Option<f32>,
    pinned: bool,
    namespace: Option<String>,
) -> anyhow::Result<()> {
    let category = category.and_then(|c| Category::parse(&c));
    let record = ctx
        .store_single(StoreInput {
            text,
            agent: agent.to_string(),
            category,
            importance,
            pinned,
            namespace,
            session: None,
            source: Some("cli".to_string()),
        })
        .await?;
    println!("{} id={}", format!("{:?}", record.action).green().bold(), record.id);
    Ok(())
}

async fn cmd_rule(ctx: &CoreContext, agent: &str, text: String) -> anyhow::Result<()> {
    let record = ctx.store_rule(agent, &text, None).await?;
    println!("{} id={}", "rule stored".green().bold(), record.id);
    Ok(())
}

async fn cmd_recall(ctx: &Arc<CoreContext>, agent: &str, query: String, limit: usize) -> anyhow::Result<()> {
    let response = ctx
        .recall(RecallInput {
            query,
            agent: agent.to_string(),
            limit: Some(limit),
            namespace: None,
            filter: None,
            max_tokens: None,
            min_score: None,
        })
        .await?;

    println!(
        "{} (mode={:?} triggered={} degraded={})",
        "=== recall results ===".cyan().bold(),
        response.search_mode,
        response.triggered,
        response.degraded,
    );
    for (i, result) in response.results.iter().enumerate() {
        let tier = match result.confidence_tier {
            agent_memory_core::ConfidenceTier::High => "HIGH".green().bold(),
            agent_memory_core::ConfidenceTier::Medium => "MEDIUM".yellow().bold(),
            agent_memory_core::ConfidenceTier::Low => "LOW".red(),
        };
        println!("{:>2}. [{:.3}] {} {}", i + 1, result.score, tier, result.memory.text);
    }
    Ok(())
}

fn cmd_pin(ctx: &CoreContext, agent: &str, id: &str, pin: bool) -> anyhow::Result<()> {
    if pin {
        ctx.pin(agent, id)?;
        println!("{} {id}", "pinned".green().bold());
    } else {
        ctx.unpin(agent, id)?;
        println!("{} {id}", "unpinned".green().bold());
    }
    Ok(())
}

fn cmd_forget(ctx: &CoreContext, agent: &str, id: &str) -> anyhow::Result<()> {
    ctx.forget_by_id(agent, id)?;
    println!("{} {id}", "forgotten".green().bold());
    Ok(())
}

async fn cmd_amnesia_check(ctx: &Arc<CoreContext>, agent: &str, topics: Vec<String>) -> anyhow::Result<()> {
    println!("{}", "=== amnesia check ===".cyan().bold());
    for (topic, covered) in ctx.amnesia_check(agent, &topics).await {
        let label = if covered { "COVERED".green().bold() } else { "MISSING".red().bold() };
        println!("{label}  {topic}");
    }
    Ok(())
}

fn cmd_export(ctx: &CoreContext, agent: &str, output: String, category: Option<String>, namespace: Option<String>) -> anyhow::Result<()> {
    let filter = Filter {
        namespace,
        category: category.and_then(|c| Category::parse(&c)),
        include_soft_deleted: false,
        min_importance: None,
        time_range: None,
    };
    let records = ctx.export(agent, &filter)?;
    let json = serde_json::to_string_pretty(&records)?;

    if output == "-" {
        println!("{json}");
    } else {
        std::fs::write(&output, json)?;
        println!("{} {} records -> {}", "exported".green().bold(), records.len(), output);
    }
    Ok(())
}

fn cmd_import(ctx: &CoreContext, agent: &str, input: PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&input)?;
    let records: Vec<agent_memory_core::Memory> = serde_json::from_str(&raw)?;
    let count = records.len();
    ctx.import(agent, &records)?;
    println!("{} {count} records from {}", "imported".green().bold(), input.display());
    Ok(())
}
