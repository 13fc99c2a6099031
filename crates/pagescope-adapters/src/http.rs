use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use pagescope_core::{CommentData, EmployeeData, PostData};
use reqwest::Url;
use scraper::Html;
use tracing::{info, info_span, Instrument};

use crate::{extract, is_valid_page_id, CompanyProfile, ProfileScraper, ScrapeError, SessionState};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Clone)]
pub struct ScraperConfig {
    pub base_url: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub user_agent: String,
    pub http_timeout: Duration,
}

impl ScraperConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("PAGESCOPE_BASE_URL")
                .unwrap_or_else(|_| "https://www.linkedin.com".to_string()),
            email: std::env::var("LINKEDIN_EMAIL").ok().filter(|v| !v.is_empty()),
            password: std::env::var("LINKEDIN_PASSWORD").ok().filter(|v| !v.is_empty()),
            user_agent: std::env::var("PAGESCOPE_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            http_timeout: Duration::from_secs(
                std::env::var("PAGESCOPE_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.linkedin.com".to_string(),
            email: None,
            password: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout: Duration::from_secs(20),
        }
    }
}

impl fmt::Debug for ScraperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScraperConfig")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("user_agent", &self.user_agent)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

/// Cookie-backed HTTP session. The client is built on first login and
/// dropped on [`close`](ProfileScraper::close).
pub struct HttpSessionScraper {
    config: ScraperConfig,
    client: Option<reqwest::Client>,
    state: SessionState,
}

impl HttpSessionScraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            config,
            client: None,
            state: SessionState::LoggedOut,
        }
    }

    fn url(&self, path: &str) -> Result<Url, ScrapeError> {
        let base = Url::parse(&self.config.base_url)
            .map_err(|e| ScrapeError::InvalidUrl(format!("{}: {e}", self.config.base_url)))?;
        base.join(path)
            .map_err(|e| ScrapeError::InvalidUrl(format!("{path}: {e}")))
    }

    fn company_url(&self, page_id: &str, section: &str) -> Result<Url, ScrapeError> {
        if !is_valid_page_id(page_id) {
            return Err(ScrapeError::InvalidUrl(format!("invalid page id: {page_id:?}")));
        }
        self.url(&format!("company/{page_id}/{section}"))
    }

    fn client(&mut self) -> Result<reqwest::Client, ScrapeError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .timeout(self.config.http_timeout)
            .user_agent(self.config.user_agent.clone())
            .build()?;
        self.client = Some(client.clone());
        Ok(client)
    }

    fn logged_in_client(&self) -> Result<reqwest::Client, ScrapeError> {
        match (&self.client, self.state) {
            (Some(client), SessionState::LoggedIn) => Ok(client.clone()),
            _ => Err(ScrapeError::NotLoggedIn),
        }
    }

    /// Returns the final URL after redirects and the body text.
    async fn fetch_html(client: &reqwest::Client, url: Url) -> Result<(Url, String), ScrapeError> {
        let span = info_span!("http_fetch", url = %url);
        async move {
            let resp = client.get(url.clone()).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(ScrapeError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            let final_url = resp.url().clone();
            let body = resp.text().await?;
            Ok((final_url, body))
        }
        .instrument(span)
        .await
    }
}

fn looks_logged_in(url: &Url) -> bool {
    let path = url.path();
    path.contains("feed") || path.contains("mynetwork")
}

#[async_trait]
impl ProfileScraper for HttpSessionScraper {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn login(&mut self) -> Result<(), ScrapeError> {
        if self.state == SessionState::LoggedIn {
            return Ok(());
        }
        let (Some(email), Some(password)) = (self.config.email.clone(), self.config.password.clone())
        else {
            return Err(ScrapeError::LoginFailed("credentials are not configured".into()));
        };

        let client = self.client()?;
        let login_url = self.url("login")?;
        let (page_url, body) = Self::fetch_html(&client, login_url).await?;

        let form = {
            let doc = Html::parse_document(&body);
            extract::login_form(&doc, &email, &password)
        }
        .ok_or_else(|| ScrapeError::LoginFailed("sign-in form not found".into()))?;

        let action = form.action.as_deref().unwrap_or("");
        let submit_url = page_url
            .join(action)
            .map_err(|e| ScrapeError::InvalidUrl(format!("{action}: {e}")))?;

        let span = info_span!("http_login", url = %submit_url);
        let resp = client
            .post(submit_url)
            .form(&form.fields)
            .send()
            .instrument(span)
            .await?;

        if !looks_logged_in(resp.url()) {
            return Err(ScrapeError::LoginFailed(format!(
                "landed on {} after sign-in",
                resp.url().path()
            )));
        }

        self.state = SessionState::LoggedIn;
        info!("scraper session logged in");
        Ok(())
    }

    async fn scrape_company(&mut self, page_id: &str) -> Result<CompanyProfile, ScrapeError> {
        let url = self.company_url(page_id, "")?;
        let client = self.logged_in_client()?;
        let (final_url, body) = Self::fetch_html(&client, url).await?;
        let doc = Html::parse_document(&body);
        Ok(extract::company_profile(&doc, page_id, final_url.as_str()))
    }

    async fn scrape_posts(
        &mut self,
        page_id: &str,
        max_posts: usize,
    ) -> Result<Vec<PostData>, ScrapeError> {
        let url = self.company_url(page_id, "posts/")?;
        let client = self.logged_in_client()?;
        let (_, body) = Self::fetch_html(&client, url).await?;
        let doc = Html::parse_document(&body);
        Ok(extract::posts(&doc, page_id, max_posts))
    }

    async fn scrape_employees(
        &mut self,
        page_id: &str,
        max_employees: usize,
    ) -> Result<Vec<EmployeeData>, ScrapeError> {
        let url = self.company_url(page_id, "people/")?;
        let client = self.logged_in_client()?;
        let (_, body) = Self::fetch_html(&client, url).await?;
        let doc = Html::parse_document(&body);
        Ok(extract::employees(&doc, page_id, max_employees))
    }

    async fn scrape_comments(
        &mut self,
        post_url: &str,
        max_comments: usize,
    ) -> Result<Vec<CommentData>, ScrapeError> {
        let client = self.logged_in_client()?;
        let url = self.url(post_url)?;
        let (_, body) = Self::fetch_html(&client, url).await?;
        let doc = Html::parse_document(&body);
        Ok(extract::comments(
            &doc,
            &extract::post_id_from_url(post_url),
            max_comments,
        ))
    }

    async fn close(&mut self) {
        self.client = None;
        self.state = SessionState::LoggedOut;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_the_password() {
        let config = ScraperConfig {
            email: Some("me@example.com".into()),
            password: Some("hunter2".into()),
            ..ScraperConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(rendered.contains("me@example.com"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn urls_resolve_against_the_base() {
        let scraper = HttpSessionScraper::new(ScraperConfig {
            base_url: "https://site.example".into(),
            ..ScraperConfig::default()
        });
        assert_eq!(
            scraper.url("company/acme/people/").unwrap().as_str(),
            "https://site.example/company/acme/people/"
        );
        assert_eq!(
            scraper.url("https://other.example/feed/update/1/").unwrap().as_str(),
            "https://other.example/feed/update/1/"
        );
    }

    #[test]
    fn company_urls_stay_under_the_company_path() {
        let scraper = HttpSessionScraper::new(ScraperConfig {
            base_url: "https://site.example".into(),
            ..ScraperConfig::default()
        });
        assert_eq!(
            scraper.company_url("acme", "posts/").unwrap().as_str(),
            "https://site.example/company/acme/posts/"
        );
        for bad in ["../../settings", "acme?redirect=x", "acme#frag", "a/b", ""] {
            assert!(
                matches!(scraper.company_url(bad, ""), Err(ScrapeError::InvalidUrl(_))),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn unsafe_page_ids_are_rejected_before_any_request() {
        let mut scraper = HttpSessionScraper::new(ScraperConfig::default());
        let err = scraper.scrape_employees("../../settings", 50).await.unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidUrl(_)));
    }

    #[test]
    fn sign_in_is_detected_from_the_landing_path() {
        assert!(looks_logged_in(&Url::parse("https://site.example/feed/").unwrap()));
        assert!(!looks_logged_in(&Url::parse("https://site.example/checkpoint/challenge").unwrap()));
    }

    #[tokio::test]
    async fn scraping_requires_a_logged_in_session() {
        let mut scraper = HttpSessionScraper::new(ScraperConfig::default());
        assert_eq!(scraper.state(), SessionState::LoggedOut);
        let err = scraper.scrape_company("acme").await.unwrap_err();
        assert!(matches!(err, ScrapeError::NotLoggedIn));
    }

    #[tokio::test]
    async fn login_without_credentials_fails_before_any_request() {
        let mut scraper = HttpSessionScraper::new(ScraperConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..ScraperConfig::default()
        });
        let err = scraper.login().await.unwrap_err();
        assert!(matches!(err, ScrapeError::LoginFailed(_)));
        assert_eq!(scraper.state(), SessionState::LoggedOut);
    }
}
