//! Entity store contracts plus in-memory and Postgres backends.

use std::cmp::Ordering;

use async_trait::async_trait;
use pagescope_core::{
    Comment, CommentData, Employee, EmployeeData, Page, PageData, PageFilter, PageRequest,
    PageStats, Post, PostData, StoreStats,
};
use thiserror::Error;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{page_search_query, PgStore};

pub const CRATE_NAME: &str = "pagescope-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// CRUD and upsert operations over pages, posts, employees and comments.
///
/// Pages and posts upsert by their natural keys. Employees and comments have
/// no stable external key, so each ingestion replaces the whole set.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get_page(&self, page_id: &str) -> Result<Option<Page>, StoreError>;

    /// Insert or overwrite the page and stamp `scraped_at` with the current time.
    async fn upsert_page(&self, data: PageData) -> Result<Page, StoreError>;

    async fn search_pages(
        &self,
        filter: &PageFilter,
        request: PageRequest,
    ) -> Result<(Vec<Page>, u64), StoreError>;

    /// Upsert each post by `linkedin_post_id`; returns how many were new.
    /// Malformed records are logged and skipped.
    async fn upsert_posts(&self, posts: Vec<PostData>) -> Result<usize, StoreError>;

    async fn get_posts_by_page(&self, page_id: &str, limit: usize) -> Result<Vec<Post>, StoreError>;

    /// Replace every employee of the first record's page with `employees`.
    /// An empty list leaves the stored set untouched.
    async fn replace_employees(&self, employees: Vec<EmployeeData>) -> Result<usize, StoreError>;

    async fn get_employees_by_page(
        &self,
        page_id: &str,
        request: PageRequest,
    ) -> Result<(Vec<Employee>, u64), StoreError>;

    async fn replace_comments(
        &self,
        post_id: &str,
        comments: Vec<CommentData>,
    ) -> Result<usize, StoreError>;

    async fn get_comments_by_post(&self, post_id: &str) -> Result<Vec<Comment>, StoreError>;

    async fn page_stats(&self, page_id: &str) -> Result<PageStats, StoreError>;

    async fn count_all(&self) -> Result<StoreStats, StoreError>;

    /// Delete the page with its posts, their comments, and its employees.
    /// Absent pages are not an error.
    async fn delete_page_cascade(&self, page_id: &str) -> Result<(), StoreError>;
}

pub fn validate_post(post: &PostData) -> Result<(), StoreError> {
    if post.linkedin_post_id.trim().is_empty() {
        return Err(StoreError::Invalid("post without linkedin_post_id".into()));
    }
    if post.page_id.trim().is_empty() {
        return Err(StoreError::Invalid(format!(
            "post {} without page_id",
            post.linkedin_post_id
        )));
    }
    Ok(())
}

pub fn validate_employee(employee: &EmployeeData) -> Result<(), StoreError> {
    if employee.full_name.trim().is_empty() {
        return Err(StoreError::Invalid(format!(
            "employee of {} without full_name",
            employee.page_id
        )));
    }
    Ok(())
}

/// Most recent first: normalized timestamp, then raw posted-at text, then id.
/// Posts without a timestamp sort last.
pub fn cmp_recency(a: &PostData, b: &PostData) -> Ordering {
    b.posted_at_ts
        .cmp(&a.posted_at_ts)
        .then_with(|| b.posted_at.cmp(&a.posted_at))
        .then_with(|| a.linkedin_post_id.cmp(&b.linkedin_post_id))
}
