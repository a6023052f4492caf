//! Highlight allocation state machine.
//!
//! An allocation is either Inactive or Active. Activation and plan reassignment go through
//! the quota guard; deactivation never does. Everything here runs on the caller's open
//! transaction, so a rejected transition rolls back the whole posting write.

use chrono::Utc;
use rusqlite::Connection;

use crate::db;
use crate::error::PostingError;
use crate::models::{HighlightAllocation, PostingStatus};
use crate::plans::{ActivePlan, PlanLookup};
use crate::quota;

/// What a posting write asks of its highlight.
#[derive(Debug, Clone)]
pub struct HighlightChange {
    pub posting_id: i64,
    pub owner_id: i64,
    /// `None` for a posting created in this transaction.
    pub status_before: Option<PostingStatus>,
    pub status_after: PostingStatus,
    pub wants_highlight: bool,
    /// The caller explicitly asked for highlight in this write, which re-resolves the plan.
    pub requested_now: bool,
    pub owner_changed: bool,
}

impl HighlightChange {
    fn reenters_quota_statuses(&self) -> bool {
        self.status_before
            .is_some_and(|before| !before.counts_toward_quota())
            && self.status_after.counts_toward_quota()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Activated { plan_id: i64 },
    Deactivated,
    Reassigned { from: i64, to: i64 },
    /// Same plan, but the posting came back into a counted status and was re-checked.
    Revalidated { plan_id: i64 },
}

pub fn reconcile(
    conn: &Connection,
    plans: &dyn PlanLookup,
    change: &HighlightChange,
) -> Result<Transition, PostingError> {
    let allocation = db::get_allocation(conn, change.posting_id)?;
    let current = allocation.filter(|a| a.active);

    if !change.wants_highlight {
        return match current {
            Some(_) => {
                deactivate(conn, change.posting_id)?;
                Ok(Transition::Deactivated)
            }
            None => Ok(Transition::Unchanged),
        };
    }

    let reenters = change.reenters_quota_statuses();
    if current.is_some() && !change.requested_now && !change.owner_changed && !reenters {
        return Ok(Transition::Unchanged);
    }

    let plan = resolve_eligible_plan(conn, plans, change.owner_id)?;

    match current {
        Some(HighlightAllocation { plan_id, .. }) if plan_id == plan.plan_id => {
            if reenters {
                quota::assert_can_activate(conn, plan_id, Some(change.posting_id))?;
                Ok(Transition::Revalidated { plan_id })
            } else {
                Ok(Transition::Unchanged)
            }
        }
        Some(HighlightAllocation { plan_id: from, .. }) => {
            reassign(conn, change.posting_id, plan.plan_id)?;
            Ok(Transition::Reassigned {
                from,
                to: plan.plan_id,
            })
        }
        None => {
            activate(conn, change.posting_id, plan.plan_id)?;
            Ok(Transition::Activated {
                plan_id: plan.plan_id,
            })
        }
    }
}

fn resolve_eligible_plan(
    conn: &Connection,
    plans: &dyn PlanLookup,
    owner_id: i64,
) -> Result<ActivePlan, PostingError> {
    match plans.find_active_plan(conn, owner_id)? {
        Some(plan) if plan.eligible => Ok(plan),
        Some(plan) => Err(PostingError::PlanNotEligible {
            plan_id: Some(plan.plan_id),
        }),
        None => Err(PostingError::PlanNotEligible { plan_id: None }),
    }
}

/// Inactive -> Active.
pub fn activate(conn: &Connection, posting_id: i64, plan_id: i64) -> Result<(), PostingError> {
    let usage = quota::assert_can_activate(conn, plan_id, None)?;
    db::upsert_active_allocation(conn, posting_id, plan_id, Utc::now())?;
    tracing::info!(posting_id, plan_id, used = usage.used + 1, limit = ?usage.limit, "highlight activated");
    Ok(())
}

/// Active -> Inactive. Returns `false` when there was nothing to switch off.
pub fn deactivate(conn: &Connection, posting_id: i64) -> Result<bool, PostingError> {
    let changed = db::deactivate_allocation(conn, posting_id, Utc::now())?;
    if changed {
        tracing::info!(posting_id, "highlight deactivated");
    }
    Ok(changed)
}

/// Active -> Active under a different plan. The posting's own slot is excluded from the
/// new plan's count, and nothing is written unless the new plan has room.
pub fn reassign(conn: &Connection, posting_id: i64, new_plan_id: i64) -> Result<(), PostingError> {
    quota::assert_can_activate(conn, new_plan_id, Some(posting_id))?;
    db::repoint_allocation(conn, posting_id, new_plan_id)?;
    tracing::info!(posting_id, plan_id = new_plan_id, "highlight moved to new plan");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_posting, Database};
    use crate::models::NewPosting;

    struct NoPlan;

    impl PlanLookup for NoPlan {
        fn find_active_plan(&self, _conn: &Connection, _owner_id: i64) -> Result<Option<ActivePlan>, PostingError> {
            Ok(None)
        }
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn posting(db: &Database, code: &str, owner_id: i64, status: PostingStatus) -> i64 {
        let input = NewPosting {
            owner_id,
            title: "Course Instructor".to_string(),
            status,
            highlight: false,
        };
        insert_posting(db.conn(), code, &input, Utc::now()).unwrap()
    }

    fn change(posting_id: i64, owner_id: i64, wants: bool) -> HighlightChange {
        HighlightChange {
            posting_id,
            owner_id,
            status_before: Some(PostingStatus::Published),
            status_after: PostingStatus::Published,
            wants_highlight: wants,
            requested_now: wants,
            owner_changed: false,
        }
    }

    #[test]
    fn test_deactivating_inactive_allocation_is_a_noop() {
        let db = setup();
        let id = posting(&db, "AAAAAA", 1, PostingStatus::Published);

        assert!(!deactivate(db.conn(), id).unwrap());
        let transition = reconcile(db.conn(), &NoPlan, &change(id, 1, false)).unwrap();
        assert_eq!(transition, Transition::Unchanged);
        assert!(db::get_allocation(db.conn(), id).unwrap().is_none());
    }

    #[test]
    fn test_deactivating_twice_keeps_first_timestamp() {
        let db = setup();
        let plan = db.add_plan(1, "pro", Some(1)).unwrap();
        let id = posting(&db, "AAAAAA", 1, PostingStatus::Published);
        activate(db.conn(), id, plan).unwrap();

        assert!(deactivate(db.conn(), id).unwrap());
        let first = db::get_allocation(db.conn(), id).unwrap().unwrap();
        assert!(!deactivate(db.conn(), id).unwrap());
        let second = db::get_allocation(db.conn(), id).unwrap().unwrap();
        assert!(!second.active);
        assert_eq!(first.deactivated_at, second.deactivated_at);
    }

    #[test]
    fn test_missing_plan_rejects_activation() {
        let db = setup();
        let id = posting(&db, "AAAAAA", 1, PostingStatus::Published);
        let err = reconcile(db.conn(), &NoPlan, &change(id, 1, true)).unwrap_err();
        assert!(matches!(err, PostingError::PlanNotEligible { plan_id: None }));
    }

    #[test]
    fn test_reassign_fails_without_touching_allocation() {
        let db = setup();
        let a = db.add_plan(1, "a", Some(1)).unwrap();
        let b = db.add_plan(2, "b", Some(1)).unwrap();
        let x = posting(&db, "XXXXXX", 1, PostingStatus::Published);
        let y = posting(&db, "YYYYYY", 2, PostingStatus::Published);
        activate(db.conn(), x, a).unwrap();
        activate(db.conn(), y, b).unwrap();

        let err = reassign(db.conn(), x, b).unwrap_err();
        assert!(matches!(err, PostingError::QuotaExceeded { limit: 1, used: 1 }));
        assert_eq!(db::get_allocation(db.conn(), x).unwrap().unwrap().plan_id, a);
    }

    #[test]
    fn test_reentering_counted_status_is_rechecked() {
        let db = setup();
        let plan = db.add_plan(1, "pro", Some(1)).unwrap();
        let drafted = posting(&db, "AAAAAA", 1, PostingStatus::Draft);
        activate(db.conn(), drafted, plan).unwrap();
        // A draft's slot is not counted, so another posting can take the only slot.
        let other = posting(&db, "BBBBBB", 1, PostingStatus::Published);
        activate(db.conn(), other, plan).unwrap();

        let mut back = change(drafted, 1, true);
        back.requested_now = false;
        back.status_before = Some(PostingStatus::Draft);
        back.status_after = PostingStatus::Published;
        let err = reconcile(db.conn(), &crate::plans::SqlitePlanLookup, &back).unwrap_err();
        assert!(matches!(err, PostingError::QuotaExceeded { limit: 1, used: 1 }));
    }

    #[test]
    fn test_untouched_highlight_skips_plan_lookup() {
        let db = setup();
        let plan = db.add_plan(1, "pro", Some(1)).unwrap();
        let id = posting(&db, "AAAAAA", 1, PostingStatus::Published);
        activate(db.conn(), id, plan).unwrap();

        // NoPlan would fail the write if it were consulted.
        let mut edit = change(id, 1, true);
        edit.requested_now = false;
        assert_eq!(reconcile(db.conn(), &NoPlan, &edit).unwrap(), Transition::Unchanged);
    }
}
