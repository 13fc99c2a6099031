//! Scraper collaborator contracts: the session trait, the HTTP session
//! implementation, selector-based extractors and a fixture-backed scraper.

use async_trait::async_trait;
use pagescope_core::{CommentData, EmployeeData, PageData, PostData};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod extract;
mod fixture;
mod http;

pub use fixture::{FixtureBundle, FixtureScraper};
pub use http::{HttpSessionScraper, ScraperConfig};

pub const CRATE_NAME: &str = "pagescope-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    LoggedOut,
    LoggedIn,
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("session is not logged in")]
    NotLoggedIn,
    #[error("fixture error: {0}")]
    Fixture(String),
}

/// Page ids are plain URL slugs: ASCII alphanumerics plus `-`, `_` and `.`,
/// never starting with `.`.
pub fn is_valid_page_id(page_id: &str) -> bool {
    !page_id.is_empty()
        && !page_id.starts_with('.')
        && page_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Company profile as extracted from the site. Every field is optional; a
/// missing `name` means the profile could not be located.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    #[serde(default)]
    pub page_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub followers_count: Option<u64>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub headcount: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub founded_year: Option<i32>,
    #[serde(default)]
    pub specialities: Vec<String>,
}

impl CompanyProfile {
    /// Convert into a storable page, or `None` when no name was found.
    pub fn into_page_data(self) -> Option<PageData> {
        let name = self.name.filter(|n| !n.trim().is_empty())?;
        Some(PageData {
            page_id: self.page_id,
            name,
            url: self.url,
            profile_image_url: self.profile_image_url,
            description: self.description,
            website: self.website,
            industry: self.industry,
            followers_count: self.followers_count.unwrap_or(0),
            headcount: self.headcount,
            location: self.location,
            founded_year: self.founded_year,
            specialities: self.specialities,
        })
    }
}

/// One logical scraping session against the site.
///
/// Starts `LoggedOut`; a successful [`login`](ProfileScraper::login) moves it to
/// `LoggedIn` until [`close`](ProfileScraper::close). Scrape calls on a
/// logged-out session fail with [`ScrapeError::NotLoggedIn`].
#[async_trait]
pub trait ProfileScraper: Send + Sync {
    fn state(&self) -> SessionState;

    async fn login(&mut self) -> Result<(), ScrapeError>;

    async fn scrape_company(&mut self, page_id: &str) -> Result<CompanyProfile, ScrapeError>;

    async fn scrape_posts(
        &mut self,
        page_id: &str,
        max_posts: usize,
    ) -> Result<Vec<PostData>, ScrapeError>;

    async fn scrape_employees(
        &mut self,
        page_id: &str,
        max_employees: usize,
    ) -> Result<Vec<EmployeeData>, ScrapeError>;

    async fn scrape_comments(
        &mut self,
        post_url: &str,
        max_comments: usize,
    ) -> Result<Vec<CommentData>, ScrapeError>;

    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_ids_must_be_plain_slugs() {
        assert!(is_valid_page_id("acme-robotics_1"));
        assert!(is_valid_page_id("acme.inc"));
        assert!(!is_valid_page_id("../secrets"));
        assert!(!is_valid_page_id("a/b"));
        assert!(!is_valid_page_id("acme?trk=1"));
        assert!(!is_valid_page_id("acme#top"));
        assert!(!is_valid_page_id(".hidden"));
        assert!(!is_valid_page_id(""));
    }

    #[test]
    fn nameless_profiles_do_not_become_pages() {
        let profile = CompanyProfile {
            page_id: "ghost".into(),
            name: Some("  ".into()),
            ..Default::default()
        };
        assert!(profile.into_page_data().is_none());
    }

    #[test]
    fn missing_follower_count_defaults_to_zero() {
        let profile = CompanyProfile {
            page_id: "acme".into(),
            name: Some("Acme".into()),
            industry: Some("Manufacturing".into()),
            ..Default::default()
        };
        let page = profile.into_page_data().unwrap();
        assert_eq!(page.followers_count, 0);
        assert_eq!(page.name, "Acme");
        assert_eq!(page.industry.as_deref(), Some("Manufacturing"));
    }
}
