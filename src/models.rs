use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PostingStatus {
    Draft,
    UnderReview,
    Published,
    Unpublished,
    Paused,
    Expired,
    Closed,
}

/// SQL list literal of the statuses whose highlights count toward a plan's quota.
/// Must stay in sync with [`PostingStatus::counts_toward_quota`].
pub const QUOTA_STATUSES_SQL: &str = "('under_review', 'published', 'paused')";

impl PostingStatus {
    pub const ALL: [PostingStatus; 7] = [
        PostingStatus::Draft,
        PostingStatus::UnderReview,
        PostingStatus::Published,
        PostingStatus::Unpublished,
        PostingStatus::Paused,
        PostingStatus::Expired,
        PostingStatus::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PostingStatus::Draft => "draft",
            PostingStatus::UnderReview => "under_review",
            PostingStatus::Published => "published",
            PostingStatus::Unpublished => "unpublished",
            PostingStatus::Paused => "paused",
            PostingStatus::Expired => "expired",
            PostingStatus::Closed => "closed",
        }
    }

    pub fn counts_toward_quota(self) -> bool {
        matches!(
            self,
            PostingStatus::UnderReview | PostingStatus::Published | PostingStatus::Paused
        )
    }
}

impl fmt::Display for PostingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown posting status: {0}")]
pub struct UnknownStatus(String);

impl FromStr for PostingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PostingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl ToSql for PostingStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for PostingStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: i64,
    pub code: String,
    pub owner_id: i64,
    pub title: String,
    pub status: PostingStatus,
    pub highlight_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub highlight_quota: Option<i64>, // null or <= 0: no highlight benefit
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn offers_highlight(&self) -> bool {
        self.highlight_quota.is_some_and(|quota| quota > 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightAllocation {
    pub id: i64,
    pub posting_id: i64,
    pub plan_id: i64,
    pub active: bool,
    pub activated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// A posting as returned to callers: the row plus its highlight allocation, if one was ever made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    #[serde(flatten)]
    pub posting: JobPosting,
    pub allocation: Option<HighlightAllocation>,
}

impl Posting {
    pub fn is_highlighted(&self) -> bool {
        self.allocation.as_ref().is_some_and(|a| a.active)
    }
}

#[derive(Debug, Clone)]
pub struct NewPosting {
    pub owner_id: i64,
    pub title: String,
    pub status: PostingStatus,
    pub highlight: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PostingUpdate {
    pub title: Option<String>,
    pub status: Option<PostingStatus>,
    pub highlight: Option<bool>,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanUsage {
    pub plan_id: i64,
    pub limit: Option<i64>,
    pub used: i64,
}
