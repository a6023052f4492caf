//! Per-plan highlight quota enforcement.

use rusqlite::Connection;

use crate::db;
use crate::error::PostingError;
use crate::models::PlanUsage;

/// Checks that one more highlight fits in the plan's quota.
///
/// Must be called inside the write transaction that records the allocation. The plan lock
/// taken here is held until that transaction ends, so two activations on the same plan can
/// never both see spare capacity.
pub fn assert_can_activate(
    conn: &Connection,
    plan_id: i64,
    exclude_posting_id: Option<i64>,
) -> Result<PlanUsage, PostingError> {
    let plan = db::get_plan(conn, plan_id)?.ok_or(PostingError::PlanNotEligible {
        plan_id: Some(plan_id),
    })?;
    let limit = match plan.highlight_quota {
        Some(quota) if quota > 0 => quota,
        _ => return Err(PostingError::PlanNotEligible { plan_id: Some(plan_id) }),
    };

    db::lock_plan(conn, plan_id)?;
    let used = db::count_active_allocations(conn, plan_id, exclude_posting_id)?;

    if used >= limit {
        tracing::warn!(plan_id, limit, used, "highlight quota exhausted");
        return Err(PostingError::QuotaExceeded { limit, used });
    }

    Ok(PlanUsage {
        plan_id,
        limit: Some(limit),
        used,
    })
}

/// Current usage for display. Takes no lock, so the figure may already be stale.
pub fn plan_usage(conn: &Connection, plan_id: i64) -> Result<Option<PlanUsage>, PostingError> {
    let Some(plan) = db::get_plan(conn, plan_id)? else {
        return Ok(None);
    };
    let used = db::count_active_allocations(conn, plan_id, None)?;
    Ok(Some(PlanUsage {
        plan_id,
        limit: plan.highlight_quota,
        used,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_posting, upsert_active_allocation, Database};
    use crate::models::{NewPosting, PostingStatus};
    use chrono::Utc;

    fn published(db: &Database, code: &str, plan_id: i64) -> i64 {
        let input = NewPosting {
            owner_id: 1,
            title: "Data Analyst".to_string(),
            status: PostingStatus::Published,
            highlight: true,
        };
        let id = insert_posting(db.conn(), code, &input, Utc::now()).unwrap();
        upsert_active_allocation(db.conn(), id, plan_id, Utc::now()).unwrap();
        id
    }

    #[test]
    fn test_zero_or_null_quota_is_never_eligible() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let none = db.add_plan(1, "free", None).unwrap();
        let zero = db.add_plan(1, "trial", Some(0)).unwrap();
        let negative = db.add_plan(1, "legacy", Some(-1)).unwrap();

        for plan in [none, zero, negative] {
            let err = assert_can_activate(db.conn(), plan, None).unwrap_err();
            assert!(matches!(err, PostingError::PlanNotEligible { plan_id: Some(p) } if p == plan));
        }
    }

    #[test]
    fn test_unknown_plan_is_not_eligible() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        assert!(matches!(
            assert_can_activate(db.conn(), 404, None),
            Err(PostingError::PlanNotEligible { .. })
        ));
    }

    #[test]
    fn test_rejects_when_quota_is_full() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let plan = db.add_plan(1, "pro", Some(2)).unwrap();

        assert_eq!(assert_can_activate(db.conn(), plan, None).unwrap().used, 0);
        let first = published(&db, "AAAAAA", plan);
        published(&db, "BBBBBB", plan);

        let err = assert_can_activate(db.conn(), plan, None).unwrap_err();
        assert!(matches!(err, PostingError::QuotaExceeded { limit: 2, used: 2 }));

        // A posting already holding a slot is not counted against itself.
        let usage = assert_can_activate(db.conn(), plan, Some(first)).unwrap();
        assert_eq!(usage.used, 1);
    }

    #[test]
    fn test_plan_usage_reports_limit_and_used() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let plan = db.add_plan(1, "pro", Some(4)).unwrap();
        published(&db, "CCCCCC", plan);

        assert_eq!(
            plan_usage(db.conn(), plan).unwrap(),
            Some(PlanUsage {
                plan_id: plan,
                limit: Some(4),
                used: 1
            })
        );
        assert!(plan_usage(db.conn(), 404).unwrap().is_none());
    }
}
