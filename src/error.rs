use thiserror::Error;

/// Failures surfaced by the posting write path.
///
/// Every variant aborts the surrounding transaction; none are downgraded or retried here.
#[derive(Debug, Error)]
pub enum PostingError {
    #[error("invalid input: {0}")]
    Validation(String),

    /// The owner has no plan, or the plan's highlight quota is null or not positive.
    #[error("plan does not include highlighted postings")]
    PlanNotEligible { plan_id: Option<i64> },

    #[error("highlight quota exceeded: {used} of {limit} already in use")]
    QuotaExceeded { limit: i64, used: i64 },

    /// Safe for the caller to retry.
    #[error("could not generate a unique posting code after {attempts} attempts")]
    CodeGenerationExhausted { attempts: u32 },

    /// The code passed the probe but lost the insert to a concurrent writer. Safe to retry.
    #[error("posting code {0} was claimed concurrently")]
    CodeCollision(String),

    #[error("posting #{0} not found")]
    NotFound(i64),

    #[error("database not initialized, run 'jobboard init' first")]
    Uninitialized,

    #[error("storage error")]
    Storage(#[from] rusqlite::Error),
}

impl PostingError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PostingError::CodeGenerationExhausted { .. } | PostingError::CodeCollision(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_message_carries_limit_and_used() {
        let err = PostingError::QuotaExceeded { limit: 2, used: 2 };
        assert_eq!(err.to_string(), "highlight quota exceeded: 2 of 2 already in use");
    }

    #[test]
    fn test_only_code_failures_are_retryable() {
        assert!(PostingError::CodeGenerationExhausted { attempts: 40 }.is_retryable());
        assert!(PostingError::CodeCollision("ABC123".to_string()).is_retryable());
        assert!(!PostingError::QuotaExceeded { limit: 1, used: 1 }.is_retryable());
        assert!(!PostingError::PlanNotEligible { plan_id: None }.is_retryable());
        assert!(!PostingError::NotFound(7).is_retryable());
    }
}
