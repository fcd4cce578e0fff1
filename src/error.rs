use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown confirmation token")]
    UnknownToken,

    #[error("confirmation already responded")]
    AlreadyResponded {
        /// Original intent reference, returned so duplicate replies can be
        /// answered without creating a new charge.
        payment_intent_id: Option<String>,
    },

    #[error("confirmation expired")]
    ConfirmationExpired,

    #[error("unknown payment intent: {0}")]
    UnknownIntent(String),

    #[error("webhook signature rejected")]
    WebhookRejected,

    #[error("group not found: {0}")]
    GroupNotFound(Uuid),

    #[error("destination not found: {0}")]
    DestinationNotFound(Uuid),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("state invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl CoreError {
    /// Invalid-input errors are reported to the caller and cause no state
    /// change; everything else is either a conflict or internal.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownToken
                | CoreError::ConfirmationExpired
                | CoreError::UnknownIntent(_)
                | CoreError::WebhookRejected
                | CoreError::GroupNotFound(_)
                | CoreError::DestinationNotFound(_)
                | CoreError::InvalidTransition(_)
        )
    }
}

/// Typed result for inbound operations. Callers never retry on `Internal`;
/// the workflow self-heals on subsequent timer ticks.
#[derive(Debug)]
pub enum OpOutcome<T> {
    Ok(T),
    Invalid(String),
    Conflict(String),
    Internal,
}

impl<T> OpOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, OpOutcome::Ok(_))
    }

    pub fn unwrap_ok(self) -> T {
        match self {
            OpOutcome::Ok(v) => v,
            other => panic!("expected OpOutcome::Ok, got {}", other.label()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OpOutcome::Ok(_) => "ok",
            OpOutcome::Invalid(_) => "invalid",
            OpOutcome::Conflict(_) => "conflict",
            OpOutcome::Internal => "internal",
        }
    }
}
