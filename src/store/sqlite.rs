use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use super::{InsertOutcome, LinkStore};
use crate::{
    error::StoreError,
    models::{Click, ClickEvent, Link},
};

/// SQLite-backed store. Short code uniqueness is the `UNIQUE` constraint on
/// `links.short_code`; inserts use `ON CONFLICT DO NOTHING` so a lost race is
/// reported as a conflict rather than an error.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the pool (creating the file if needed) and apply the embedded
    /// migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(
                database_url
                    .parse::<sqlx::sqlite::SqliteConnectOptions>()?
                    .create_if_missing(true)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                    .foreign_keys(true),
            )
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");

        Ok(Self { pool })
    }
}

#[async_trait]
impl LinkStore for SqliteStore {
    async fn insert_if_absent(&self, link: &Link) -> Result<InsertOutcome, StoreError> {
        let affected = sqlx::query(
            "INSERT INTO links (id, owner_id, original_url, short_code, created_at, click_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)
             ON CONFLICT (short_code) DO NOTHING",
        )
        .bind(&link.id)
        .bind(&link.owner_id)
        .bind(&link.original_url)
        .bind(&link.short_code)
        .bind(link.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(if affected == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Conflict
        })
    }

    async fn get_by_code(&self, short_code: &str) -> Result<Option<Link>, StoreError> {
        let link: Option<Link> = sqlx::query_as(
            "SELECT id, owner_id, original_url, short_code, created_at, click_count
             FROM links WHERE short_code = ?1",
        )
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Link>, StoreError> {
        let links: Vec<Link> = sqlx::query_as(
            "SELECT id, owner_id, original_url, short_code, created_at, click_count
             FROM links
             WHERE owner_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    async fn all_links(&self) -> Result<Vec<Link>, StoreError> {
        let links: Vec<Link> = sqlx::query_as(
            "SELECT id, owner_id, original_url, short_code, created_at, click_count FROM links",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    async fn increment_click(&self, click: &ClickEvent) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let link_id: Option<String> = sqlx::query_scalar(
            "UPDATE links SET click_count = click_count + 1 WHERE short_code = ?1 RETURNING id",
        )
        .bind(&click.short_code)
        .fetch_optional(&mut *tx)
        .await?;

        // Unknown code: dropping the transaction rolls it back.
        let Some(link_id) = link_id else {
            return Ok(false);
        };

        sqlx::query(
            "INSERT INTO clicks
                 (link_id, clicked_at, referer, user_agent, browser, os, device_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&link_id)
        .bind(click.clicked_at)
        .bind(click.referer.as_deref())
        .bind(click.user_agent.as_deref())
        .bind(click.browser.as_deref())
        .bind(click.os.as_deref())
        .bind(click.device_type.as_deref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn recent_clicks(&self, link_id: &str, limit: u32) -> Result<Vec<Click>, StoreError> {
        let clicks: Vec<Click> = sqlx::query_as(
            "SELECT clicked_at, referer, user_agent, browser, os, device_type
             FROM clicks
             WHERE link_id = ?1
             ORDER BY clicked_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(link_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(clicks)
    }
}
