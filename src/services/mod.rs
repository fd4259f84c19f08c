/// Per-session holding area for submitted answers.
pub mod answer_buffer;
/// Audit trail for moderation and scoring failures.
pub mod audit;
/// Event fan-out to the session channels.
pub mod broadcast;
/// Durable quiz catalog and seeding.
pub mod catalog;
/// OpenAPI documentation generation.
pub mod documentation;
/// Durable write guard with fast-store fallback.
pub mod fallback_guard;
/// Operator view over parked durable writes.
pub mod fallback_service;
/// Fastest-finger-first winner resolution.
pub mod ffi;
/// Health check service.
pub mod health_service;
/// Ranked leaderboard over running scores.
pub mod leaderboard;
/// System metrics published to controllers.
pub mod metrics;
/// Participant directory and moderation status.
pub mod participants;
/// Running participant scores.
pub mod scores;
/// Score calculation, pipeline and batched persistence.
pub mod scoring;
/// Session lifecycle orchestration.
pub mod session_service;
/// Server-Sent Events stream adaptation.
pub mod sse_service;
/// Durable store connection supervisor.
pub mod storage_supervisor;
