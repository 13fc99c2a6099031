use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pagescope_core::{CommentData, EmployeeData, PostData};
use scraper::Html;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{extract, is_valid_page_id, CompanyProfile, ProfileScraper, ScrapeError, SessionState};

/// Recorded scrape results for one page.
///
/// Each section is either structured data or raw HTML; when HTML is present it
/// is run through the same extractors as the live session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub page_id: String,
    #[serde(default)]
    pub company: Option<CompanyProfile>,
    #[serde(default)]
    pub company_html: Option<String>,
    #[serde(default)]
    pub posts: Vec<PostData>,
    #[serde(default)]
    pub posts_html: Option<String>,
    #[serde(default)]
    pub employees: Vec<EmployeeData>,
    #[serde(default)]
    pub employees_html: Option<String>,
    /// Comments keyed by post permalink.
    #[serde(default)]
    pub comments: BTreeMap<String, Vec<CommentData>>,
}

enum Source {
    Dir(PathBuf),
    Memory(HashMap<String, FixtureBundle>),
}

/// Offline scraper serving [`FixtureBundle`]s, from `<dir>/<page_id>.json`
/// or from memory. Login always succeeds.
pub struct FixtureScraper {
    source: Source,
    state: SessionState,
}

impl FixtureScraper {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::Dir(dir.into()),
            state: SessionState::LoggedOut,
        }
    }

    pub fn with_bundles(bundles: impl IntoIterator<Item = FixtureBundle>) -> Self {
        Self {
            source: Source::Memory(
                bundles
                    .into_iter()
                    .map(|b| (b.page_id.clone(), b))
                    .collect(),
            ),
            state: SessionState::LoggedOut,
        }
    }

    fn require_login(&self) -> Result<(), ScrapeError> {
        match self.state {
            SessionState::LoggedIn => Ok(()),
            SessionState::LoggedOut => Err(ScrapeError::NotLoggedIn),
        }
    }

    async fn bundle(&self, page_id: &str) -> Result<Option<FixtureBundle>, ScrapeError> {
        match &self.source {
            Source::Memory(bundles) => Ok(bundles.get(page_id).cloned()),
            Source::Dir(dir) => load_bundle(dir, page_id).await,
        }
    }

    async fn all_bundles(&self) -> Result<Vec<FixtureBundle>, ScrapeError> {
        match &self.source {
            Source::Memory(bundles) => Ok(bundles.values().cloned().collect()),
            Source::Dir(dir) => {
                let mut entries = tokio::fs::read_dir(dir)
                    .await
                    .map_err(|e| ScrapeError::Fixture(format!("{}: {e}", dir.display())))?;
                let mut bundles = Vec::new();
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| ScrapeError::Fixture(format!("{}: {e}", dir.display())))?
                {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    bundles.push(read_bundle(&path).await?);
                }
                Ok(bundles)
            }
        }
    }
}

async fn read_bundle(path: &Path) -> Result<FixtureBundle, ScrapeError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ScrapeError::Fixture(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| ScrapeError::Fixture(format!("{}: {e}", path.display())))
}

async fn load_bundle(dir: &Path, page_id: &str) -> Result<Option<FixtureBundle>, ScrapeError> {
    if !is_valid_page_id(page_id) {
        warn!(page_id, "refusing fixture lookup for unsafe page id");
        return Ok(None);
    }
    let path = dir.join(format!("{page_id}.json"));
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        debug!(path = %path.display(), "no fixture bundle");
        return Ok(None);
    }
    read_bundle(&path).await.map(Some)
}

#[async_trait]
impl ProfileScraper for FixtureScraper {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn login(&mut self) -> Result<(), ScrapeError> {
        self.state = SessionState::LoggedIn;
        Ok(())
    }

    async fn scrape_company(&mut self, page_id: &str) -> Result<CompanyProfile, ScrapeError> {
        self.require_login()?;
        let Some(bundle) = self.bundle(page_id).await? else {
            return Ok(CompanyProfile {
                page_id: page_id.to_string(),
                ..CompanyProfile::default()
            });
        };
        let url = format!("https://www.linkedin.com/company/{page_id}/");
        let mut profile = match bundle.company_html {
            Some(html) => extract::company_profile(&Html::parse_document(&html), page_id, &url),
            None => bundle.company.unwrap_or_default(),
        };
        profile.page_id = page_id.to_string();
        Ok(profile)
    }

    async fn scrape_posts(
        &mut self,
        page_id: &str,
        max_posts: usize,
    ) -> Result<Vec<PostData>, ScrapeError> {
        self.require_login()?;
        let Some(bundle) = self.bundle(page_id).await? else {
            return Ok(Vec::new());
        };
        Ok(match bundle.posts_html {
            Some(html) => extract::posts(&Html::parse_document(&html), page_id, max_posts),
            None => bundle
                .posts
                .into_iter()
                .take(max_posts)
                .map(|mut p| {
                    p.page_id = page_id.to_string();
                    p
                })
                .collect(),
        })
    }

    async fn scrape_employees(
        &mut self,
        page_id: &str,
        max_employees: usize,
    ) -> Result<Vec<EmployeeData>, ScrapeError> {
        self.require_login()?;
        let Some(bundle) = self.bundle(page_id).await? else {
            return Ok(Vec::new());
        };
        Ok(match bundle.employees_html {
            Some(html) => {
                extract::employees(&Html::parse_document(&html), page_id, max_employees)
            }
            None => bundle
                .employees
                .into_iter()
                .take(max_employees)
                .map(|mut e| {
                    e.page_id = page_id.to_string();
                    e
                })
                .collect(),
        })
    }

    async fn scrape_comments(
        &mut self,
        post_url: &str,
        max_comments: usize,
    ) -> Result<Vec<CommentData>, ScrapeError> {
        self.require_login()?;
        let post_id = extract::post_id_from_url(post_url);
        for bundle in self.all_bundles().await? {
            if let Some(found) = bundle.comments.get(post_url) {
                return Ok(found
                    .iter()
                    .take(max_comments)
                    .cloned()
                    .map(|mut c| {
                        c.post_id = post_id.clone();
                        c
                    })
                    .collect());
            }
        }
        Ok(Vec::new())
    }

    async fn close(&mut self) {
        self.state = SessionState::LoggedOut;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagescope_core::EmployeeKind;

    fn employee(name: &str) -> EmployeeData {
        EmployeeData {
            page_id: String::new(),
            full_name: name.into(),
            profile_url: None,
            headline: None,
            location: None,
            kind: EmployeeKind::Employee,
        }
    }

    #[tokio::test]
    async fn unknown_pages_yield_a_nameless_profile() {
        let mut scraper = FixtureScraper::with_bundles(Vec::new());
        scraper.login().await.unwrap();
        let profile = scraper.scrape_company("ghost").await.unwrap();
        assert_eq!(profile.page_id, "ghost");
        assert!(profile.name.is_none());
        assert!(scraper.scrape_posts("ghost", 15).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn requires_login_and_honors_limits() {
        let bundle = FixtureBundle {
            page_id: "acme".into(),
            company: Some(CompanyProfile {
                name: Some("Acme".into()),
                ..CompanyProfile::default()
            }),
            employees: (0..5).map(|i| employee(&format!("Person {i}"))).collect(),
            ..FixtureBundle::default()
        };
        let mut scraper = FixtureScraper::with_bundles([bundle]);
        assert!(matches!(
            scraper.scrape_company("acme").await,
            Err(ScrapeError::NotLoggedIn)
        ));

        scraper.login().await.unwrap();
        let profile = scraper.scrape_company("acme").await.unwrap();
        assert_eq!(profile.page_id, "acme");
        assert_eq!(profile.name.as_deref(), Some("Acme"));

        let staff = scraper.scrape_employees("acme", 3).await.unwrap();
        assert_eq!(staff.len(), 3);
        assert!(staff.iter().all(|e| e.page_id == "acme"));

        scraper.close().await;
        assert_eq!(scraper.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn html_sections_go_through_the_extractors() {
        let bundle = FixtureBundle {
            page_id: "acme".into(),
            company_html: Some(
                r#"<h1 class="org-top-card-summary__title">Acme HTML</h1>"#.into(),
            ),
            ..FixtureBundle::default()
        };
        let mut scraper = FixtureScraper::with_bundles([bundle]);
        scraper.login().await.unwrap();
        let profile = scraper.scrape_company("acme").await.unwrap();
        assert_eq!(profile.name.as_deref(), Some("Acme HTML"));
    }

    #[tokio::test]
    async fn unsafe_page_ids_never_touch_the_fixture_dir() {
        let mut scraper = FixtureScraper::from_dir("/nonexistent");
        scraper.login().await.unwrap();
        let profile = scraper.scrape_company("../secrets").await.unwrap();
        assert!(profile.name.is_none());
    }
}
