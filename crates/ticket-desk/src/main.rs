use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ticket_classifier::{Category, Classifier, MemoryCache, MemoryLocks, TicketClassifier};
use ticket_desk::{
    select_for_bulk, BulkScope, ClassifyJob, DeskConfig, JobQueue, JobRunner,
    JsonFileTicketRepository, Ticket, TicketEdit, TicketRepository, TicketStatus,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "ticket-desk", about = "Support tickets with automatic classification")]
struct Cli {
    /// JSON document holding all tickets.
    #[arg(long, default_value = "tickets.json")]
    store: PathBuf,

    /// Optional TOML config (workers, job tries, [classifier] section).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a ticket.
    Create {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
        #[arg(long, default_value = "new")]
        status: TicketStatus,
        #[arg(long)]
        note: Option<String>,
    },
    /// Print one ticket as JSON.
    Show { id: String },
    /// Print all tickets as JSON.
    List,
    /// Edit a ticket. Setting a different category marks it manual.
    Update {
        id: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        body: Option<String>,
        #[arg(long)]
        status: Option<TicketStatus>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        category: Option<Category>,
    },
    /// Classify one ticket now and print the result.
    Classify {
        id: String,
        /// Override a manual category.
        #[arg(long)]
        force: bool,
    },
    /// Dispatch classification jobs for many tickets.
    BulkClassify(BulkArgs),
}

#[derive(Args)]
struct BulkArgs {
    /// Only classify tickets without category.
    #[arg(long, conflicts_with = "all")]
    unclassified: bool,
    /// Classify all tickets.
    #[arg(long)]
    all: bool,
    /// Force reclassification even if the category was set manually.
    #[arg(long)]
    force: bool,
    /// Worker count (defaults to config).
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = DeskConfig::load(cli.config.as_deref())?;
    let repo = Arc::new(
        JsonFileTicketRepository::open(&cli.store)
            .with_context(|| format!("Failed to open ticket store {}", cli.store.display()))?,
    );

    match cli.command {
        Command::Create {
            subject,
            body,
            status,
            note,
        } => {
            let mut ticket = Ticket::new(subject, body);
            ticket.status = status;
            ticket.note = note;
            repo.save(&ticket).await?;
            print_json(&ticket)?;
        }
        Command::Show { id } => {
            let ticket = find(repo.as_ref(), &id).await?;
            print_json(&ticket)?;
        }
        Command::List => {
            print_json(&repo.list().await?)?;
        }
        Command::Update {
            id,
            subject,
            body,
            status,
            note,
            category,
        } => {
            let mut ticket = find(repo.as_ref(), &id).await?;
            ticket.apply_edit(TicketEdit {
                subject,
                body,
                status,
                note,
                category,
            });
            repo.save(&ticket).await?;
            print_json(&ticket)?;
        }
        Command::Classify { id, force } => {
            let classifier = build_classifier(&config)?;
            let mut ticket = find(repo.as_ref(), &id).await?;
            let result = classifier.classify(&ticket.snapshot()).await?;
            ticket.apply_classification(&result, force);
            repo.save(&ticket).await?;
            print_json(&result)?;
        }
        Command::BulkClassify(args) => {
            let scope = match (args.unclassified, args.all) {
                (true, _) => BulkScope::Unclassified,
                (false, true) => BulkScope::All,
                (false, false) => {
                    eprintln!("Please specify --unclassified or --all option");
                    std::process::exit(1);
                }
            };
            bulk_classify(&config, repo, scope, args.force, args.workers).await?;
        }
    }

    Ok(())
}

fn build_classifier(config: &DeskConfig) -> Result<Arc<Classifier>> {
    let classifier = Classifier::with_openai(
        &config.classifier,
        MemoryCache::new().shared(),
        MemoryLocks::new().shared(),
    )
    .context("Failed to build classifier")?;
    if !classifier.is_enabled() {
        info!("Classification disabled, fallback results will be used");
    }
    Ok(Arc::new(classifier))
}

async fn bulk_classify(
    config: &DeskConfig,
    repo: Arc<JsonFileTicketRepository>,
    scope: BulkScope,
    force: bool,
    workers: Option<usize>,
) -> Result<()> {
    let tickets = repo.list().await?;
    let ids = select_for_bulk(&tickets, scope, force);
    if ids.is_empty() {
        info!("No tickets found for classification");
        return Ok(());
    }
    info!(count = ids.len(), ?scope, force, "Found tickets to classify");

    let job = ClassifyJob::new(build_classifier(config)?, repo).forced(force);
    let runner = JobRunner::new(job, config.job_tries, config.release_delay());
    let queue = JobQueue::start(Arc::new(runner), workers.unwrap_or(config.workers));

    for id in &ids {
        queue.dispatch(id.clone()).await?;
    }
    info!(count = ids.len(), "Dispatched classification jobs");

    let summary = queue.shutdown().await;
    info!(
        classified = summary.classified,
        missing = summary.missing,
        failed = summary.failed,
        "Bulk classification finished"
    );
    if summary.failed > 0 {
        bail!("{} of {} jobs failed", summary.failed, summary.total());
    }
    Ok(())
}

async fn find(repo: &dyn TicketRepository, id: &str) -> Result<Ticket> {
    match repo.get(id).await? {
        Some(ticket) => Ok(ticket),
        None => bail!("Ticket {id} not found"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
