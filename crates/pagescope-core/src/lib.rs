//! Core domain model, filters and pagination types for pagescope.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pagescope-core";

/// Scraped company profile, keyed by the external `page_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageData {
    pub page_id: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default)]
    pub headcount: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub founded_year: Option<i32>,
    #[serde(default)]
    pub specialities: Vec<String>,
}

impl PageData {
    pub fn new(page_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            name: name.into(),
            url: None,
            profile_image_url: None,
            description: None,
            website: None,
            industry: None,
            followers_count: 0,
            headcount: None,
            location: None,
            founded_year: None,
            specialities: Vec::new(),
        }
    }
}

/// Persisted page: the scraped fields plus store identity and scrape time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    #[serde(flatten)]
    pub data: PageData,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostData {
    #[serde(default)]
    pub page_id: String,
    pub linkedin_post_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    /// Posted-at text exactly as it appeared on the page ("3d", "2w", ...).
    #[serde(default)]
    pub posted_at: Option<String>,
    /// `posted_at` resolved against the scrape time, when it could be parsed.
    #[serde(default)]
    pub posted_at_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub comments_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    #[serde(flatten)]
    pub data: PostData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeKind {
    #[default]
    Employee,
}

impl EmployeeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmployeeKind::Employee => "EMPLOYEE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EMPLOYEE" => Some(EmployeeKind::Employee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeData {
    #[serde(default)]
    pub page_id: String,
    pub full_name: String,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: EmployeeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: Uuid,
    #[serde(flatten)]
    pub data: EmployeeData,
}

/// Comment on a post. `post_id` is the owning post's `linkedin_post_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentData {
    #[serde(default)]
    pub post_id: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    #[serde(flatten)]
    pub data: CommentData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageStats {
    pub total_posts: u64,
    pub total_employees: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_pages: u64,
    pub total_posts: u64,
    pub total_employees: u64,
}

/// Page detail response: the page plus its recent posts and first employees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageWithDetails {
    #[serde(flatten)]
    pub page: Page,
    pub posts: Vec<Post>,
    pub employees: Vec<Employee>,
    pub total_posts: u64,
    pub total_employees: u64,
}

/// Search filters for stored pages. All set filters must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFilter {
    pub min_followers: Option<u64>,
    pub max_followers: Option<u64>,
    pub name: Option<String>,
    pub industry: Option<String>,
}

impl PageFilter {
    pub fn name_needle(&self) -> Option<&str> {
        self.name.as_deref().filter(|s| !s.is_empty())
    }

    pub fn industry_needle(&self) -> Option<&str> {
        self.industry.as_deref().filter(|s| !s.is_empty())
    }

    pub fn matches(&self, page: &PageData) -> bool {
        if let Some(min) = self.min_followers {
            if page.followers_count < min {
                return false;
            }
        }
        if let Some(max) = self.max_followers {
            if page.followers_count > max {
                return false;
            }
        }
        if let Some(needle) = self.name_needle() {
            if !contains_ignore_case(Some(&page.name), needle) {
                return false;
            }
        }
        if let Some(needle) = self.industry_needle() {
            if !contains_ignore_case(page.industry.as_deref(), needle) {
                return false;
            }
        }
        true
    }
}

fn contains_ignore_case(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

/// 1-indexed page request. Bounds are validated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub fn skip(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        if total == 0 {
            0
        } else {
            total.div_ceil(u64::from(self.page_size.max(1)))
        }
    }
}

/// Pagination envelope shared by list endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages: request.total_pages(total),
        }
    }
}

/// Resolve a scraped posted-at string against the time it was scraped.
///
/// Accepts RFC 3339 timestamps, `YYYY-MM-DD` dates and the relative forms the
/// site renders ("5h", "3d", "2w", "1mo", "1yr", "2 days ago", "now").
pub fn normalize_posted_at(raw: &str, scraped_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    let lower = text.to_lowercase();
    let tokens = lower
        .split(|c: char| c.is_whitespace() || c == '•' || c == '·')
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>();
    if tokens.first().is_some_and(|t| *t == "now" || *t == "just") {
        return Some(scraped_at);
    }

    let idx = tokens
        .iter()
        .position(|t| t.starts_with(|c: char| c.is_ascii_digit()))?;
    let token = tokens[idx];
    let digits_end = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    let amount: i64 = token[..digits_end].parse().ok()?;
    let unit = if digits_end < token.len() {
        &token[digits_end..]
    } else {
        tokens.get(idx + 1).copied()?
    };
    let unit = unit.trim_end_matches(|c: char| !c.is_ascii_alphabetic());
    scraped_at.checked_sub_signed(relative_span(unit, amount)?)
}

fn relative_span(unit: &str, amount: i64) -> Option<Duration> {
    if amount > 100_000 {
        return None;
    }
    let minutes = match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => return Some(Duration::seconds(amount)),
        "m" | "min" | "mins" | "minute" | "minutes" => 1,
        "h" | "hr" | "hrs" | "hour" | "hours" => 60,
        "d" | "day" | "days" => 60 * 24,
        "w" | "wk" | "wks" | "week" | "weeks" => 60 * 24 * 7,
        "mo" | "mos" | "month" | "months" => 60 * 24 * 30,
        "y" | "yr" | "yrs" | "year" | "years" => 60 * 24 * 365,
        _ => return None,
    };
    Some(Duration::minutes(amount * minutes))
}
