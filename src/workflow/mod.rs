pub mod engine;
pub mod refunds;
pub mod token;

pub use engine::{InitiateOutcome, ReplyOutcome, ReplyStatus, SweepAction, WorkflowEngine};
