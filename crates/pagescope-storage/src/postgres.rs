use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagescope_core::{
    Comment, CommentData, Employee, EmployeeData, EmployeeKind, Page, PageData, PageFilter,
    PageRequest, PageStats, Post, PostData, StoreStats,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{validate_employee, validate_post, EntityStore, StoreError};

const PAGE_COLUMNS: &str = "id, page_id, name, url, profile_image_url, description, website, \
     industry, followers_count, headcount, location, founded_year, specialities, scraped_at";

const POST_COLUMNS: &str = "id, page_id, linkedin_post_id, content, permalink, posted_at, \
     posted_at_ts, likes_count, comments_count";

const EMPLOYEE_COLUMNS: &str = "id, page_id, full_name, profile_url, headline, location, kind";

/// Rows per multi-row INSERT, well under the Postgres bind limit.
const INSERT_CHUNK: usize = 1000;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Escape LIKE wildcards so user input matches literally, then wrap for substring search.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Build the filtered page query. `request = None` builds the matching COUNT query.
pub fn page_search_query(
    filter: &PageFilter,
    request: Option<PageRequest>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = match request {
        Some(_) => QueryBuilder::new(format!("SELECT {PAGE_COLUMNS} FROM pages")),
        None => QueryBuilder::new("SELECT COUNT(*) AS total FROM pages"),
    };

    let mut sep = " WHERE ";
    if let Some(min) = filter.min_followers {
        qb.push(sep).push("followers_count >= ").push_bind(to_i64(min));
        sep = " AND ";
    }
    if let Some(max) = filter.max_followers {
        qb.push(sep).push("followers_count <= ").push_bind(to_i64(max));
        sep = " AND ";
    }
    if let Some(needle) = filter.name_needle() {
        qb.push(sep).push("name ILIKE ").push_bind(like_pattern(needle));
        sep = " AND ";
    }
    if let Some(needle) = filter.industry_needle() {
        qb.push(sep).push("industry ILIKE ").push_bind(like_pattern(needle));
    }

    if let Some(request) = request {
        qb.push(" ORDER BY page_id OFFSET ")
            .push_bind(to_i64(request.skip()))
            .push(" LIMIT ")
            .push_bind(to_i64(request.limit()));
    }
    qb
}

fn page_from_row(row: &PgRow) -> Result<Page, sqlx::Error> {
    Ok(Page {
        id: row.try_get("id")?,
        data: PageData {
            page_id: row.try_get("page_id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            profile_image_url: row.try_get("profile_image_url")?,
            description: row.try_get("description")?,
            website: row.try_get("website")?,
            industry: row.try_get("industry")?,
            followers_count: to_u64(row.try_get("followers_count")?),
            headcount: row.try_get("headcount")?,
            location: row.try_get("location")?,
            founded_year: row.try_get("founded_year")?,
            specialities: row.try_get("specialities")?,
        },
        scraped_at: row.try_get("scraped_at")?,
    })
}

fn post_from_row(row: &PgRow) -> Result<Post, sqlx::Error> {
    Ok(Post {
        id: row.try_get("id")?,
        data: PostData {
            page_id: row.try_get("page_id")?,
            linkedin_post_id: row.try_get("linkedin_post_id")?,
            content: row.try_get("content")?,
            permalink: row.try_get("permalink")?,
            posted_at: row.try_get("posted_at")?,
            posted_at_ts: row.try_get::<Option<DateTime<Utc>>, _>("posted_at_ts")?,
            likes_count: to_u64(row.try_get("likes_count")?),
            comments_count: to_u64(row.try_get("comments_count")?),
        },
    })
}

fn employee_from_row(row: &PgRow) -> Result<Employee, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    Ok(Employee {
        id: row.try_get("id")?,
        data: EmployeeData {
            page_id: row.try_get("page_id")?,
            full_name: row.try_get("full_name")?,
            profile_url: row.try_get("profile_url")?,
            headline: row.try_get("headline")?,
            location: row.try_get("location")?,
            kind: EmployeeKind::parse(&kind).unwrap_or_default(),
        },
    })
}

fn comment_from_row(row: &PgRow) -> Result<Comment, sqlx::Error> {
    Ok(Comment {
        id: row.try_get("id")?,
        data: CommentData {
            post_id: row.try_get("post_id")?,
            author_name: row.try_get("author_name")?,
            text: row.try_get("comment_text")?,
            created_at: row.try_get("created_at")?,
        },
    })
}

impl PgStore {
    async fn upsert_post(&self, post: &PostData) -> Result<bool, StoreError> {
        validate_post(post)?;
        let row = sqlx::query(
            r#"
            INSERT INTO posts (id, page_id, linkedin_post_id, content, permalink, posted_at,
                               posted_at_ts, likes_count, comments_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (linkedin_post_id) DO UPDATE
               SET page_id = EXCLUDED.page_id,
                   content = EXCLUDED.content,
                   permalink = EXCLUDED.permalink,
                   posted_at = EXCLUDED.posted_at,
                   posted_at_ts = EXCLUDED.posted_at_ts,
                   likes_count = EXCLUDED.likes_count,
                   comments_count = EXCLUDED.comments_count
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&post.page_id)
        .bind(&post.linkedin_post_id)
        .bind(&post.content)
        .bind(&post.permalink)
        .bind(&post.posted_at)
        .bind(post.posted_at_ts)
        .bind(to_i64(post.likes_count))
        .bind(to_i64(post.comments_count))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("inserted")?)
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_page(&self, page_id: &str) -> Result<Option<Page>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PAGE_COLUMNS} FROM pages WHERE page_id = $1"))
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(page_from_row).transpose()?)
    }

    async fn upsert_page(&self, data: PageData) -> Result<Page, StoreError> {
        if data.page_id.trim().is_empty() {
            return Err(StoreError::Invalid("page without page_id".into()));
        }
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pages (id, page_id, name, url, profile_image_url, description, website,
                               industry, followers_count, headcount, location, founded_year,
                               specialities, scraped_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            ON CONFLICT (page_id) DO UPDATE
               SET name = EXCLUDED.name,
                   url = EXCLUDED.url,
                   profile_image_url = EXCLUDED.profile_image_url,
                   description = EXCLUDED.description,
                   website = EXCLUDED.website,
                   industry = EXCLUDED.industry,
                   followers_count = EXCLUDED.followers_count,
                   headcount = EXCLUDED.headcount,
                   location = EXCLUDED.location,
                   founded_year = EXCLUDED.founded_year,
                   specialities = EXCLUDED.specialities,
                   scraped_at = EXCLUDED.scraped_at
            RETURNING {PAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&data.page_id)
        .bind(&data.name)
        .bind(&data.url)
        .bind(&data.profile_image_url)
        .bind(&data.description)
        .bind(&data.website)
        .bind(&data.industry)
        .bind(to_i64(data.followers_count))
        .bind(&data.headcount)
        .bind(&data.location)
        .bind(data.founded_year)
        .bind(&data.specialities)
        .fetch_one(&self.pool)
        .await?;
        Ok(page_from_row(&row)?)
    }

    async fn search_pages(
        &self,
        filter: &PageFilter,
        request: PageRequest,
    ) -> Result<(Vec<Page>, u64), StoreError> {
        let total: i64 = page_search_query(filter, None)
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;
        let rows = page_search_query(filter, Some(request))
            .build()
            .fetch_all(&self.pool)
            .await?;
        let pages = rows.iter().map(page_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((pages, to_u64(total)))
    }

    async fn upsert_posts(&self, posts: Vec<PostData>) -> Result<usize, StoreError> {
        let mut inserted = 0usize;
        for post in &posts {
            match self.upsert_post(post).await {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(linkedin_post_id = %post.linkedin_post_id, error = %err, "skipping post");
                }
            }
        }
        Ok(inserted)
    }

    async fn get_posts_by_page(&self, page_id: &str, limit: usize) -> Result<Vec<Post>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {POST_COLUMNS}
              FROM posts
             WHERE page_id = $1
             ORDER BY posted_at_ts DESC NULLS LAST, posted_at DESC NULLS LAST, linkedin_post_id
             LIMIT $2
            "#
        ))
        .bind(page_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(post_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn replace_employees(&self, employees: Vec<EmployeeData>) -> Result<usize, StoreError> {
        let Some(page_id) = employees.first().map(|e| e.page_id.clone()) else {
            return Ok(0);
        };
        let valid = employees
            .into_iter()
            .filter(|e| match validate_employee(e) {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "skipping employee");
                    false
                }
            })
            .collect::<Vec<_>>();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM employees WHERE page_id = $1")
            .bind(&page_id)
            .execute(&mut *tx)
            .await?;
        for chunk in valid.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("INSERT INTO employees ({EMPLOYEE_COLUMNS}) "));
            qb.push_values(chunk, |mut b, e| {
                b.push_bind(Uuid::new_v4())
                    .push_bind(e.page_id.clone())
                    .push_bind(e.full_name.clone())
                    .push_bind(e.profile_url.clone())
                    .push_bind(e.headline.clone())
                    .push_bind(e.location.clone())
                    .push_bind(e.kind.as_str());
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(valid.len())
    }

    async fn get_employees_by_page(
        &self,
        page_id: &str,
        request: PageRequest,
    ) -> Result<(Vec<Employee>, u64), StoreError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM employees WHERE page_id = $1")
            .bind(page_id)
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EMPLOYEE_COLUMNS}
              FROM employees
             WHERE page_id = $1
             ORDER BY full_name, id
            OFFSET $2
             LIMIT $3
            "#
        ))
        .bind(page_id)
        .bind(to_i64(request.skip()))
        .bind(to_i64(request.limit()))
        .fetch_all(&self.pool)
        .await?;
        let employees = rows.iter().map(employee_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((employees, to_u64(total)))
    }

    async fn replace_comments(
        &self,
        post_id: &str,
        comments: Vec<CommentData>,
    ) -> Result<usize, StoreError> {
        if comments.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM comments WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
        for chunk in comments.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO comments (id, post_id, author_name, comment_text, created_at) ",
            );
            qb.push_values(chunk, |mut b, c| {
                b.push_bind(Uuid::new_v4())
                    .push_bind(post_id.to_string())
                    .push_bind(c.author_name.clone())
                    .push_bind(c.text.clone())
                    .push_bind(c.created_at.clone());
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(comments.len())
    }

    async fn get_comments_by_post(&self, post_id: &str) -> Result<Vec<Comment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, author_name, comment_text, created_at
              FROM comments
             WHERE post_id = $1
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(comment_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn page_stats(&self, page_id: &str) -> Result<PageStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT (SELECT COUNT(*) FROM posts WHERE page_id = $1) AS total_posts,
                   (SELECT COUNT(*) FROM employees WHERE page_id = $1) AS total_employees
            "#,
        )
        .bind(page_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(PageStats {
            total_posts: to_u64(row.try_get("total_posts")?),
            total_employees: to_u64(row.try_get("total_employees")?),
        })
    }

    async fn count_all(&self) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT (SELECT COUNT(*) FROM pages) AS total_pages,
                   (SELECT COUNT(*) FROM posts) AS total_posts,
                   (SELECT COUNT(*) FROM employees) AS total_employees
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreStats {
            total_pages: to_u64(row.try_get("total_pages")?),
            total_posts: to_u64(row.try_get("total_posts")?),
            total_employees: to_u64(row.try_get("total_employees")?),
        })
    }

    async fn delete_page_cascade(&self, page_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM comments WHERE post_id IN (SELECT linkedin_post_id FROM posts WHERE page_id = $1)",
        )
        .bind(page_id)
        .execute(&mut *tx)
        .await?;
        for statement in [
            "DELETE FROM posts WHERE page_id = $1",
            "DELETE FROM employees WHERE page_id = $1",
            "DELETE FROM pages WHERE page_id = $1",
        ] {
            sqlx::query(statement).bind(page_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("tech"), "%tech%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn search_query_without_filters_has_no_where_clause() {
        let qb = page_search_query(&PageFilter::default(), Some(PageRequest::new(2, 10)));
        let sql = qb.sql();
        assert!(sql.starts_with("SELECT id, page_id"));
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("ORDER BY page_id OFFSET $1 LIMIT $2"));
    }

    #[test]
    fn search_query_ands_every_filter() {
        let filter = PageFilter {
            min_followers: Some(20_000),
            max_followers: Some(40_000),
            name: Some("tech".into()),
            industry: Some("software".into()),
        };
        let qb = page_search_query(&filter, None);
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) AS total FROM pages WHERE followers_count >= $1 \
             AND followers_count <= $2 AND name ILIKE $3 AND industry ILIKE $4"
        );
    }

    #[test]
    fn blank_text_filters_are_not_bound() {
        let filter = PageFilter {
            name: Some(String::new()),
            industry: Some("retail".into()),
            ..Default::default()
        };
        let qb = page_search_query(&filter, None);
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) AS total FROM pages WHERE industry ILIKE $1"
        );
    }
}
