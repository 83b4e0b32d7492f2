//! Storage contract for links and their click history, plus the backends that
//! implement it. The service only ever talks to a `dyn LinkStore`, so the
//! engine behind it can be swapped through configuration.

pub mod memory;
pub mod sqlite;


use std::{fmt, str::FromStr};

use async_trait::async_trait;

use crate::{
    error::StoreError,
    models::{Click, ClickEvent, Link},
};

/// Result of an atomic insert keyed on the short code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another link already owns the short code; nothing was written.
    Conflict,
}

/// Persistence operations the link service depends on.
///
/// # Consistency
/// `insert_if_absent` must be linearizable with respect to short code
/// uniqueness: of two concurrent inserts with the same code exactly one gets
/// `Inserted`. `increment_click` must be a commutative add, never a
/// read-modify-write that can lose updates.
#[async_trait]
pub trait LinkStore: Send + Sync + 'static {
    /// Persist `link` unless its short code is taken.
    async fn insert_if_absent(&self, link: &Link) -> Result<InsertOutcome, StoreError>;

    /// Look up a link by short code. A missing code is `Ok(None)`, not an error.
    async fn get_by_code(&self, short_code: &str) -> Result<Option<Link>, StoreError>;

    /// All links of one owner, newest first.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Link>, StoreError>;

    /// Every stored link, used to warm the resolution cache at startup.
    async fn all_links(&self) -> Result<Vec<Link>, StoreError>;

    /// Bump the click counter of `click.short_code` and keep the event in the
    /// click history. Returns `false` if the code is unknown.
    async fn increment_click(&self, click: &ClickEvent) -> Result<bool, StoreError>;

    /// The most recent `limit` clicks of a link, newest first.
    async fn recent_clicks(&self, link_id: &str, limit: u32) -> Result<Vec<Click>, StoreError>;
}

/// Which `LinkStore` implementation to run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Sqlite,
    Memory,
}

impl BackendType {
    pub const fn as_str(self) -> &'static str {
        match self {
            BackendType::Sqlite => "sqlite",
            BackendType::Memory => "memory",
        }
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(BackendType::Sqlite),
            "memory" => Ok(BackendType::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
