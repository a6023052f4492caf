use rusqlite::Connection;
use serde::Serialize;

use crate::db;
use crate::error::PostingError;

/// An owner's current plan as seen by the highlight path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActivePlan {
    pub plan_id: i64,
    pub highlight_quota: Option<i64>,
    pub eligible: bool,
}

/// Resolves which plan an owner is currently subscribed to.
///
/// Lookups receive the open transaction so the answer is consistent with the writes that follow.
pub trait PlanLookup {
    fn find_active_plan(&self, conn: &Connection, owner_id: i64) -> Result<Option<ActivePlan>, PostingError>;
}

/// Reads the `plans` table of the posting store.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlitePlanLookup;

impl PlanLookup for SqlitePlanLookup {
    fn find_active_plan(&self, conn: &Connection, owner_id: i64) -> Result<Option<ActivePlan>, PostingError> {
        let plan = db::find_active_plan_for_owner(conn, owner_id)?;
        Ok(plan.map(|plan| ActivePlan {
            plan_id: plan.id,
            highlight_quota: plan.highlight_quota,
            eligible: plan.offers_highlight(),
        }))
    }
}
