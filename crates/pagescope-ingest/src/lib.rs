//! Scrape-then-persist orchestration.
//!
//! The orchestrator owns the one scraper session. Every ingestion run holds
//! the session lock for its whole duration and is bounded by a timeout that
//! also covers waiting for the lock.
//! Writes are upserts or full replaces, so a failed run can simply be rerun.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pagescope_adapters::{
    FixtureScraper, HttpSessionScraper, ProfileScraper, ScrapeError, ScraperConfig, SessionState,
};
use pagescope_core::{normalize_posted_at, Page, PageRequest, PageWithDetails};
use pagescope_storage::{EntityStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "pagescope-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("page '{0}' not found")]
    NotFound(String),
    #[error("failed to log in: {0}")]
    LoginFailed(String),
    #[error("scraping error: {0}")]
    Scrape(#[from] ScrapeError),
    #[error("ingestion timed out after {0:?}")]
    Timeout(Duration),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestLimits {
    pub max_posts: usize,
    pub max_employees: usize,
    pub max_comments: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_posts: 15,
            max_employees: 50,
            max_comments: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScraperKind {
    Http,
    Fixtures,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub limits: IngestLimits,
    pub timeout: Duration,
    pub scraper_kind: ScraperKind,
    pub fixtures_dir: PathBuf,
    pub scraper: ScraperConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = IngestLimits::default();
        Self {
            limits: IngestLimits {
                max_posts: env_parse("PAGESCOPE_MAX_POSTS").unwrap_or(defaults.max_posts),
                max_employees: env_parse("PAGESCOPE_MAX_EMPLOYEES")
                    .unwrap_or(defaults.max_employees),
                max_comments: env_parse("PAGESCOPE_MAX_COMMENTS")
                    .unwrap_or(defaults.max_comments),
            },
            timeout: Duration::from_secs(
                env_parse("PAGESCOPE_INGEST_TIMEOUT_SECS").unwrap_or(300),
            ),
            scraper_kind: match std::env::var("PAGESCOPE_SCRAPER").as_deref() {
                Ok("fixtures") | Ok("fixture") => ScraperKind::Fixtures,
                _ => ScraperKind::Http,
            },
            fixtures_dir: std::env::var("PAGESCOPE_FIXTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./fixtures")),
            scraper: ScraperConfig::from_env(),
        }
    }

    pub fn build_scraper(&self) -> Box<dyn ProfileScraper> {
        match self.scraper_kind {
            ScraperKind::Http => Box::new(HttpSessionScraper::new(self.scraper.clone())),
            ScraperKind::Fixtures => Box::new(FixtureScraper::from_dir(self.fixtures_dir.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsureOptions {
    pub force_rescrape: bool,
    pub include_posts: bool,
    pub include_employees: bool,
}

impl Default for EnsureOptions {
    fn default() -> Self {
        Self {
            force_rescrape: false,
            include_posts: true,
            include_employees: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub scrape_posts: bool,
    pub scrape_employees: bool,
    pub scrape_comments: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            scrape_posts: true,
            scrape_employees: true,
            scrape_comments: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub page_id: String,
    pub page_name: String,
    pub posts_ingested: usize,
    pub employees_ingested: usize,
    pub comments_ingested: usize,
}

fn login_error(err: ScrapeError) -> IngestError {
    match err {
        ScrapeError::LoginFailed(msg) => IngestError::LoginFailed(msg),
        other => IngestError::LoginFailed(other.to_string()),
    }
}

pub struct Orchestrator {
    store: Arc<dyn EntityStore>,
    session: Mutex<Box<dyn ProfileScraper>>,
    limits: IngestLimits,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn EntityStore>, scraper: Box<dyn ProfileScraper>) -> Self {
        Self {
            store,
            session: Mutex::new(scraper),
            limits: IngestLimits::default(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn from_config(store: Arc<dyn EntityStore>, config: &IngestConfig) -> Self {
        Self::new(store, config.build_scraper())
            .with_limits(config.limits)
            .with_timeout(config.timeout)
    }

    pub fn with_limits(mut self, limits: IngestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn limits(&self) -> IngestLimits {
        self.limits
    }

    /// Return the stored page, scraping it first when it is absent or when
    /// `force_rescrape` is set, and attach recent posts and employees.
    pub async fn ensure_page(
        &self,
        page_id: &str,
        options: EnsureOptions,
    ) -> Result<PageWithDetails, IngestError> {
        let page = match self.store.get_page(page_id).await? {
            Some(page) if !options.force_rescrape => {
                debug!(page_id, "page already stored; skipping scrape");
                page
            }
            _ => {
                let (page, summary) = self.run(page_id, IngestOptions::default()).await?;
                info!(
                    page_id,
                    posts = summary.posts_ingested,
                    employees = summary.employees_ingested,
                    "page ingested"
                );
                page
            }
        };
        self.assemble(page, options).await
    }

    /// Unconditionally re-scrape the page and commit what was requested.
    pub async fn force_ingest(
        &self,
        page_id: &str,
        options: IngestOptions,
    ) -> Result<IngestSummary, IngestError> {
        let (_, summary) = self.run(page_id, options).await?;
        Ok(summary)
    }

    /// Log the session out and release its resources.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        session.close().await;
        info!("scraper session closed");
    }

    async fn assemble(
        &self,
        page: Page,
        options: EnsureOptions,
    ) -> Result<PageWithDetails, IngestError> {
        let page_id = page.data.page_id.clone();
        let posts = if options.include_posts {
            self.store
                .get_posts_by_page(&page_id, self.limits.max_posts)
                .await?
        } else {
            Vec::new()
        };
        let employees = if options.include_employees {
            let page_size = u32::try_from(self.limits.max_employees).unwrap_or(u32::MAX);
            let request = PageRequest::new(1, page_size);
            self.store.get_employees_by_page(&page_id, request).await?.0
        } else {
            Vec::new()
        };
        let stats = self.store.page_stats(&page_id).await?;
        Ok(PageWithDetails {
            page,
            posts,
            employees,
            total_posts: stats.total_posts,
            total_employees: stats.total_employees,
        })
    }

    async fn run(
        &self,
        page_id: &str,
        options: IngestOptions,
    ) -> Result<(Page, IngestSummary), IngestError> {
        // The deadline covers waiting for the session as well as the run itself.
        let run = async {
            let mut session = self.session.lock().await;
            self.ingest(&mut **session, page_id, options).await
        };
        match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(page_id, timeout = ?self.timeout, "ingestion timed out");
                Err(IngestError::Timeout(self.timeout))
            }
        }
    }

    async fn ingest(
        &self,
        scraper: &mut dyn ProfileScraper,
        page_id: &str,
        options: IngestOptions,
    ) -> Result<(Page, IngestSummary), IngestError> {
        if scraper.state() == SessionState::LoggedOut {
            scraper.login().await.map_err(login_error)?;
        }

        info!(page_id, "scraping company profile");
        let profile = scraper.scrape_company(page_id).await?;
        let Some(data) = profile.into_page_data() else {
            return Err(IngestError::NotFound(page_id.to_string()));
        };
        let page = self.store.upsert_page(data).await?;

        let mut summary = IngestSummary {
            page_id: page_id.to_string(),
            page_name: page.data.name.clone(),
            posts_ingested: 0,
            employees_ingested: 0,
            comments_ingested: 0,
        };

        if options.scrape_posts {
            info!(page_id, max = self.limits.max_posts, "scraping posts");
            let scraped_at = Utc::now();
            let mut posts = scraper.scrape_posts(page_id, self.limits.max_posts).await?;
            for post in &mut posts {
                post.page_id = page_id.to_string();
                if post.posted_at_ts.is_none() {
                    post.posted_at_ts = post
                        .posted_at
                        .as_deref()
                        .and_then(|raw| normalize_posted_at(raw, scraped_at));
                }
            }
            let permalinks = posts
                .iter()
                .filter_map(|p| {
                    p.permalink
                        .clone()
                        .map(|link| (p.linkedin_post_id.clone(), link))
                })
                .collect::<Vec<_>>();
            summary.posts_ingested = self.store.upsert_posts(posts).await?;

            if options.scrape_comments {
                for (post_id, permalink) in permalinks {
                    debug!(page_id, post_id = %post_id, "scraping comments");
                    let comments = scraper
                        .scrape_comments(&permalink, self.limits.max_comments)
                        .await?;
                    summary.comments_ingested +=
                        self.store.replace_comments(&post_id, comments).await?;
                }
            }
        }

        if options.scrape_employees {
            info!(page_id, max = self.limits.max_employees, "scraping employees");
            let mut employees = scraper
                .scrape_employees(page_id, self.limits.max_employees)
                .await?;
            for employee in &mut employees {
                employee.page_id = page_id.to_string();
            }
            summary.employees_ingested = self.store.replace_employees(employees).await?;
        }

        Ok((page, summary))
    }
}
