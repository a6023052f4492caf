use chrono::Utc;

use crate::codes::CodeGenerator;
use crate::db::{self, Database};
use crate::error::PostingError;
use crate::highlight::{self, HighlightChange, Transition};
use crate::models::{JobPosting, NewPosting, PlanUsage, Posting, PostingStatus, PostingUpdate};
use crate::plans::{PlanLookup, SqlitePlanLookup};
use crate::quota;

const MAX_TITLE_CHARS: usize = 200;
const CREATABLE_STATUSES: [PostingStatus; 3] = [
    PostingStatus::Draft,
    PostingStatus::UnderReview,
    PostingStatus::Published,
];

/// Create/update entry points for job postings.
///
/// Each call is one immediate transaction: the code, the posting row and any highlight
/// transition commit together or not at all.
pub struct PostingService<L: PlanLookup = SqlitePlanLookup> {
    db: Database,
    plans: L,
    codes: CodeGenerator,
}

impl PostingService {
    pub fn new(db: Database) -> Self {
        Self::with_parts(db, SqlitePlanLookup, CodeGenerator::default())
    }
}

impl<L: PlanLookup> PostingService<L> {
    pub fn with_parts(db: Database, plans: L, codes: CodeGenerator) -> Self {
        Self { db, plans, codes }
    }

    #[cfg(test)]
    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn create(&mut self, input: NewPosting) -> Result<Posting, PostingError> {
        validate_owner(input.owner_id)?;
        let title = validate_title(&input.title)?;
        if !CREATABLE_STATUSES.contains(&input.status) {
            return Err(PostingError::Validation(format!(
                "postings cannot be created as {}",
                input.status
            )));
        }
        let input = NewPosting { title, ..input };

        let tx = self.db.write_transaction()?;
        let now = Utc::now();

        let code = self.codes.ensure_unique_code(&*tx)?;
        db::issue_code(&tx, &code, now)?;
        let posting_id = db::insert_posting(&tx, &code, &input, now)?;

        if input.highlight {
            let change = HighlightChange {
                posting_id,
                owner_id: input.owner_id,
                status_before: None,
                status_after: input.status,
                wants_highlight: true,
                requested_now: true,
                owner_changed: false,
            };
            highlight::reconcile(&tx, &self.plans, &change)?;
        }

        let posting = db::load_posting(&tx, posting_id)?;
        tx.commit()?;

        tracing::info!(
            posting_id,
            code = %posting.posting.code,
            owner_id = input.owner_id,
            highlighted = posting.is_highlighted(),
            "posting created"
        );
        Ok(posting)
    }

    pub fn update(&mut self, posting_id: i64, input: PostingUpdate) -> Result<Posting, PostingError> {
        let title = input.title.as_deref().map(validate_title).transpose()?;
        if let Some(owner_id) = input.owner_id {
            validate_owner(owner_id)?;
        }

        let tx = self.db.write_transaction()?;
        let before = db::get_posting(&tx, posting_id)?.ok_or(PostingError::NotFound(posting_id))?;

        if before.status == PostingStatus::Closed && input.status.is_some_and(|s| s != PostingStatus::Closed) {
            return Err(PostingError::Validation(
                "closed postings cannot be reopened".to_string(),
            ));
        }

        let after = JobPosting {
            title: title.unwrap_or_else(|| before.title.clone()),
            status: input.status.unwrap_or(before.status),
            highlight_requested: input.highlight.unwrap_or(before.highlight_requested),
            owner_id: input.owner_id.unwrap_or(before.owner_id),
            updated_at: Utc::now(),
            ..before.clone()
        };
        db::update_posting(&tx, &after)?;

        let change = HighlightChange {
            posting_id,
            owner_id: after.owner_id,
            status_before: Some(before.status),
            status_after: after.status,
            wants_highlight: after.highlight_requested,
            requested_now: input.highlight == Some(true),
            owner_changed: after.owner_id != before.owner_id,
        };
        let transition = highlight::reconcile(&tx, &self.plans, &change)?;

        let posting = db::load_posting(&tx, posting_id)?;
        tx.commit()?;

        if transition != Transition::Unchanged {
            tracing::info!(posting_id, ?transition, "posting highlight changed");
        }
        tracing::debug!(posting_id, status = %posting.posting.status, "posting updated");
        Ok(posting)
    }

    pub fn get(&self, posting_id: i64) -> Result<Posting, PostingError> {
        db::load_posting(self.db.conn(), posting_id)
    }

    pub fn plan_usage(&self, plan_id: i64) -> Result<Option<PlanUsage>, PostingError> {
        quota::plan_usage(self.db.conn(), plan_id)
    }
}

fn validate_title(title: &str) -> Result<String, PostingError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PostingError::Validation("title must not be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(PostingError::Validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

fn validate_owner(owner_id: i64) -> Result<(), PostingError> {
    if owner_id <= 0 {
        return Err(PostingError::Validation(format!("invalid owner id {owner_id}")));
    }
    Ok(())
}
