// =============================================================================
// Error taxonomy — status kinds for the feed/book/orchestrator hot path
// =============================================================================
//
// The book, metric pipeline and orchestrator never throw: every fallible
// operation returns a typed result struct. These variants exist so that
// callers and logs can classify *why* something failed without the hot path
// using `Result<_, Error>` propagation. Only the outer I/O boundary (REST
// fetch, WS connect, config load) uses `anyhow::Result`.
// =============================================================================

/// Error taxonomy kinds, matching the ERROR HANDLING DESIGN section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FeedErrorKind {
    #[error("TransientNetwork")]
    TransientNetwork,
    #[error("SequenceGap")]
    SequenceGap,
    #[error("IntegrityViolation")]
    IntegrityViolation,
    #[error("InputValidation")]
    InputValidation,
    #[error("QueueOverflow")]
    QueueOverflow,
    #[error("OrchestratorBlocked")]
    OrchestratorBlocked,
    #[error("KillSwitch")]
    KillSwitch,
}

/// A classified, non-exceptional fault. Carried in result structs (never
/// propagated with `?`) so the caller can decide whether to retry, resync,
/// or merely count it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FeedFault {
    pub kind: FeedErrorKind,
    pub message: String,
    pub retry_after_ms: Option<u64>,
}

impl FeedFault {
    pub fn new(kind: FeedErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_display_includes_kind_and_message() {
        let fault = FeedFault::new(FeedErrorKind::SequenceGap, "gap at u=1003");
        assert_eq!(fault.to_string(), "SequenceGap: gap at u=1003");
    }

    #[test]
    fn with_retry_after_sets_field() {
        let fault = FeedFault::new(FeedErrorKind::TransientNetwork, "timeout").with_retry_after(500);
        assert_eq!(fault.retry_after_ms, Some(500));
    }
}
