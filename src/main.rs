mod codes;
mod config;
mod db;
mod error;
mod highlight;
mod models;
mod plans;
mod postings;
mod quota;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::StoreConfig;
use db::Database;
use error::PostingError;
use models::{NewPosting, Posting, PostingStatus, PostingUpdate};
use postings::PostingService;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobboard")]
#[command(about = "Job posting backend with plan-limited highlighted postings")]
struct Cli {
    #[command(flatten)]
    store: StoreConfig,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "JOBBOARD_LOG", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage commercial plans
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },

    /// Create, update and inspect postings
    Post {
        #[command(subcommand)]
        command: PostCommands,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Subscribe an owner to a plan
    Add {
        /// Owner (subscriber) ID
        #[arg(short, long)]
        owner: i64,

        /// Plan name
        #[arg(short, long)]
        name: String,

        /// Maximum simultaneously highlighted postings (omit for none)
        #[arg(short, long)]
        quota: Option<i64>,
    },

    /// End a plan subscription
    End {
        /// Plan ID
        id: i64,
    },

    /// Show highlight usage for a plan
    Usage {
        /// Plan ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum PostCommands {
    /// Create a posting
    Create {
        /// Owner ID
        #[arg(short, long)]
        owner: i64,

        /// Posting title
        #[arg(short, long)]
        title: String,

        /// Initial status
        #[arg(short, long, value_enum, default_value = "draft")]
        status: PostingStatus,

        /// Request a highlighted placement
        #[arg(long)]
        highlight: bool,
    },

    /// Update a posting
    Update {
        /// Posting ID
        id: i64,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long, value_enum)]
        status: Option<PostingStatus>,

        /// Turn highlighting on or off
        #[arg(long)]
        highlight: Option<bool>,

        /// Transfer the posting to another owner
        #[arg(short, long)]
        owner: Option<i64>,
    },

    /// Show posting details
    Show {
        /// Posting ID
        id: i64,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let db = Database::open(&cli.store)?;

    match cli.command {
        Commands::Init => {
            db.init().context("Failed to create schema")?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Plan { command } => {
            db.ensure_initialized()?;
            match command {
                PlanCommands::Add { owner, name, quota } => {
                    let id = db.add_plan(owner, &name, quota)?;
                    println!("Added plan #{} '{}' for owner {}", id, name, owner);
                }

                PlanCommands::End { id } => {
                    if db.end_plan(id)? {
                        println!("Ended plan #{}.", id);
                    } else {
                        println!("Plan #{} not found or already ended.", id);
                    }
                }

                PlanCommands::Usage { id } => {
                    let service = PostingService::new(db);
                    match service.plan_usage(id)? {
                        Some(usage) => {
                            let limit = usage
                                .limit
                                .filter(|l| *l > 0)
                                .map_or_else(|| "none".to_string(), |l| l.to_string());
                            println!("Plan #{}: {} highlighted / limit {}", id, usage.used, limit);
                        }
                        None => println!("Plan #{} not found.", id),
                    }
                }
            }
        }

        Commands::Post { command } => {
            db.ensure_initialized()?;
            let mut service = PostingService::new(db);
            match command {
                PostCommands::Create {
                    owner,
                    title,
                    status,
                    highlight,
                } => {
                    let input = NewPosting {
                        owner_id: owner,
                        title,
                        status,
                        highlight,
                    };
                    let posting = service.create(input).map_err(explain)?;
                    println!("Created posting #{} ({})", posting.posting.id, posting.posting.code);
                    if posting.is_highlighted() {
                        println!("Highlight: active");
                    }
                }

                PostCommands::Update {
                    id,
                    title,
                    status,
                    highlight,
                    owner,
                } => {
                    let input = PostingUpdate {
                        title,
                        status,
                        highlight,
                        owner_id: owner,
                    };
                    let posting = service.update(id, input).map_err(explain)?;
                    print_posting(&posting);
                }

                PostCommands::Show { id, json } => match service.get(id) {
                    Ok(posting) if json => println!("{}", serde_json::to_string_pretty(&posting)?),
                    Ok(posting) => print_posting(&posting),
                    Err(PostingError::NotFound(_)) => println!("Posting #{} not found.", id),
                    Err(e) => return Err(e.into()),
                },
            }
        }
    }

    Ok(())
}

fn explain(err: PostingError) -> anyhow::Error {
    let hint = match &err {
        PostingError::QuotaExceeded { limit, used } => Some(format!(
            "the plan allows {} highlighted postings and {} are in use",
            limit, used
        )),
        e if e.is_retryable() => Some("this is transient, try again".to_string()),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => err.into(),
    }
}

fn print_posting(posting: &Posting) {
    let p = &posting.posting;
    println!("Posting #{} ({})", p.id, p.code);
    println!("Title: {}", p.title);
    println!("Owner: {}", p.owner_id);
    println!("Status: {}", p.status);
    println!("Highlight requested: {}", if p.highlight_requested { "yes" } else { "no" });
    if let Some(allocation) = &posting.allocation {
        let state = if allocation.active { "active" } else { "inactive" };
        println!("Highlight: {} (plan #{})", state, allocation.plan_id);
        if let Some(at) = allocation.deactivated_at {
            println!("Deactivated: {}", at.format("%Y-%m-%d %H:%M:%S"));
        }
    }
    println!("Created: {}", p.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated: {}", p.updated_at.format("%Y-%m-%d %H:%M:%S"));
}
