use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pagescope_ingest::{IngestConfig, IngestOptions, Orchestrator};
use pagescope_storage::{EntityStore, PgStore};
use pagescope_web::{connect_store, WebConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pagescope")]
#[command(about = "Company page insights: scrape, store and serve company pages")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API (default).
    Serve,
    /// Apply database migrations to DATABASE_URL.
    Migrate,
    /// Scrape one page now and store the results.
    Scrape {
        page_id: String,
        #[arg(long)]
        skip_posts: bool,
        #[arg(long)]
        skip_employees: bool,
        #[arg(long)]
        comments: bool,
    },
    /// Print store-wide counts.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => pagescope_web::serve_from_env().await?,
        Commands::Migrate => {
            let url = WebConfig::from_env()
                .database_url
                .context("DATABASE_URL must be set to run migrations")?;
            let store = PgStore::connect(&url, 1)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            tracing::info!("migrations applied");
        }
        Commands::Scrape {
            page_id,
            skip_posts,
            skip_employees,
            comments,
        } => {
            let store = connect_store(WebConfig::from_env().database_url.as_deref()).await?;
            let orchestrator = Orchestrator::from_config(store, &IngestConfig::from_env());
            let options = IngestOptions {
                scrape_posts: !skip_posts,
                scrape_employees: !skip_employees,
                scrape_comments: comments,
            };
            let result = orchestrator.force_ingest(&page_id, options).await;
            orchestrator.close().await;
            let summary = result.with_context(|| format!("scraping {page_id}"))?;
            println!(
                "scrape complete: page={} name={:?} posts={} employees={} comments={}",
                summary.page_id,
                summary.page_name,
                summary.posts_ingested,
                summary.employees_ingested,
                summary.comments_ingested
            );
        }
        Commands::Stats => {
            let store = connect_store(WebConfig::from_env().database_url.as_deref()).await?;
            let stats = store.count_all().await.context("counting records")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
