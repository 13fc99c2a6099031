use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use pagescope_core::{
    Comment, CommentData, Employee, EmployeeData, Page, PageData, PageFilter, PageRequest,
    PageStats, Post, PostData, StoreStats,
};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::{cmp_recency, validate_employee, validate_post, EntityStore, StoreError};

#[derive(Debug, Default)]
struct Collections {
    /// Keyed by `page_id`.
    pages: BTreeMap<String, Page>,
    /// Keyed by `linkedin_post_id`.
    posts: BTreeMap<String, Post>,
    employees: Vec<Employee>,
    comments: Vec<Comment>,
}

/// Process-local store. Every operation holds the lock for its whole duration,
/// so replace operations are never observed half-applied.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T: Clone>(items: &[T], request: PageRequest) -> Vec<T> {
    items
        .iter()
        .skip(usize::try_from(request.skip()).unwrap_or(usize::MAX))
        .take(request.page_size as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_page(&self, page_id: &str) -> Result<Option<Page>, StoreError> {
        Ok(self.inner.read().await.pages.get(page_id).cloned())
    }

    async fn upsert_page(&self, data: PageData) -> Result<Page, StoreError> {
        if data.page_id.trim().is_empty() {
            return Err(StoreError::Invalid("page without page_id".into()));
        }
        let mut inner = self.inner.write().await;
        let id = inner
            .pages
            .get(&data.page_id)
            .map(|existing| existing.id)
            .unwrap_or_else(Uuid::new_v4);
        let page = Page {
            id,
            data,
            scraped_at: Utc::now(),
        };
        inner.pages.insert(page.data.page_id.clone(), page.clone());
        Ok(page)
    }

    async fn search_pages(
        &self,
        filter: &PageFilter,
        request: PageRequest,
    ) -> Result<(Vec<Page>, u64), StoreError> {
        let inner = self.inner.read().await;
        let matched = inner
            .pages
            .values()
            .filter(|p| filter.matches(&p.data))
            .cloned()
            .collect::<Vec<_>>();
        let total = matched.len() as u64;
        Ok((paginate(&matched, request), total))
    }

    async fn upsert_posts(&self, posts: Vec<PostData>) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut inserted = 0usize;
        for data in posts {
            if let Err(err) = validate_post(&data) {
                warn!(error = %err, "skipping post");
                continue;
            }
            match inner.posts.entry(data.linkedin_post_id.clone()) {
                Entry::Occupied(mut slot) => slot.get_mut().data = data,
                Entry::Vacant(slot) => {
                    slot.insert(Post {
                        id: Uuid::new_v4(),
                        data,
                    });
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    async fn get_posts_by_page(&self, page_id: &str, limit: usize) -> Result<Vec<Post>, StoreError> {
        let inner = self.inner.read().await;
        let mut posts = inner
            .posts
            .values()
            .filter(|p| p.data.page_id == page_id)
            .cloned()
            .collect::<Vec<_>>();
        posts.sort_by(|a, b| cmp_recency(&a.data, &b.data));
        posts.truncate(limit);
        Ok(posts)
    }

    async fn replace_employees(&self, employees: Vec<EmployeeData>) -> Result<usize, StoreError> {
        let Some(page_id) = employees.first().map(|e| e.page_id.clone()) else {
            return Ok(0);
        };
        let mut inner = self.inner.write().await;
        inner.employees.retain(|e| e.data.page_id != page_id);
        let mut inserted = 0usize;
        for data in employees {
            if let Err(err) = validate_employee(&data) {
                warn!(error = %err, "skipping employee");
                continue;
            }
            inner.employees.push(Employee {
                id: Uuid::new_v4(),
                data,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_employees_by_page(
        &self,
        page_id: &str,
        request: PageRequest,
    ) -> Result<(Vec<Employee>, u64), StoreError> {
        let inner = self.inner.read().await;
        let matched = inner
            .employees
            .iter()
            .filter(|e| e.data.page_id == page_id)
            .cloned()
            .collect::<Vec<_>>();
        let total = matched.len() as u64;
        Ok((paginate(&matched, request), total))
    }

    async fn replace_comments(
        &self,
        post_id: &str,
        comments: Vec<CommentData>,
    ) -> Result<usize, StoreError> {
        if comments.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.write().await;
        inner.comments.retain(|c| c.data.post_id != post_id);
        let count = comments.len();
        inner.comments.extend(comments.into_iter().map(|mut data| {
            data.post_id = post_id.to_string();
            Comment {
                id: Uuid::new_v4(),
                data,
            }
        }));
        Ok(count)
    }

    async fn get_comments_by_post(&self, post_id: &str) -> Result<Vec<Comment>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .comments
            .iter()
            .filter(|c| c.data.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn page_stats(&self, page_id: &str) -> Result<PageStats, StoreError> {
        let inner = self.inner.read().await;
        Ok(PageStats {
            total_posts: inner.posts.values().filter(|p| p.data.page_id == page_id).count() as u64,
            total_employees: inner
                .employees
                .iter()
                .filter(|e| e.data.page_id == page_id)
                .count() as u64,
        })
    }

    async fn count_all(&self) -> Result<StoreStats, StoreError> {
        let inner = self.inner.read().await;
        Ok(StoreStats {
            total_pages: inner.pages.len() as u64,
            total_posts: inner.posts.len() as u64,
            total_employees: inner.employees.len() as u64,
        })
    }

    async fn delete_page_cascade(&self, page_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.pages.remove(page_id);
        let removed_posts = inner
            .posts
            .values()
            .filter(|p| p.data.page_id == page_id)
            .map(|p| p.data.linkedin_post_id.clone())
            .collect::<Vec<_>>();
        for key in &removed_posts {
            inner.posts.remove(key);
        }
        inner.comments.retain(|c| !removed_posts.contains(&c.data.post_id));
        inner.employees.retain(|e| e.data.page_id != page_id);
        Ok(())
    }
}
