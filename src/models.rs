use chrono::{DateTime, Utc};
use serde::Serialize;

/// A shortened link record from the `links` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Link {
    pub id: String,
    pub owner_id: String,
    pub original_url: String,
    pub short_code: String,
    pub created_at: DateTime<Utc>,
    pub click_count: i64,
}

impl Link {
    /// Build a fresh, not-yet-persisted link. The click counter always starts
    /// at zero; only the click recorder moves it afterwards.
    pub fn new(
        owner_id: impl Into<String>,
        original_url: impl Into<String>,
        short_code: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            original_url: original_url.into(),
            short_code: short_code.into(),
            created_at: Utc::now(),
            click_count: 0,
        }
    }
}

/// A single resolution of a short code, as handed to the click recorder.
#[derive(Debug, Clone)]
pub struct ClickEvent {
    pub short_code: String,
    pub clicked_at: DateTime<Utc>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<String>,
}

impl ClickEvent {
    pub fn new(short_code: impl Into<String>, visit: Visit) -> Self {
        Self {
            short_code: short_code.into(),
            clicked_at: Utc::now(),
            referer: visit.referer,
            user_agent: visit.user_agent,
            browser: None,
            os: None,
            device_type: None,
        }
    }
}

/// Request metadata captured on the redirect path. Everything else about the
/// click is derived later by the click worker.
#[derive(Debug, Clone, Default)]
pub struct Visit {
    pub referer: Option<String>,
    pub user_agent: Option<String>,
}

/// A single click event from the `clicks` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Click {
    pub clicked_at: DateTime<Utc>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<String>,
}

/// One row of a click breakdown: how often `name` shows up among the recent
/// clicks, and what share of them that is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakdown {
    pub name: String,
    pub count: i64,
    pub pct: i64,
}

/// Summary statistics for a single link.
#[derive(Debug, Clone, Serialize)]
pub struct Analytics {
    pub link: Link,
    pub total_clicks: i64,
    pub top_browsers: Vec<Breakdown>,
    pub top_os: Vec<Breakdown>,
    pub top_devices: Vec<Breakdown>,
    pub top_referers: Vec<Breakdown>,
    pub recent_clicks: Vec<Click>,
}
