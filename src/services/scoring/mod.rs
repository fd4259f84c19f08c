/// Batched persistence of scored answers.
pub mod batch;
/// Pure point computation.
pub mod calculator;
/// Per-session scoring workers.
pub mod pipeline;

pub use self::pipeline::{ScoringOutcome, ScoringPipeline, SubmissionNotice};
