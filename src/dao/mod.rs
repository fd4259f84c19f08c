/// Authoritative store of record (sessions, answers, quizzes).
pub mod durable_store;
/// Low-latency store for live reads and transient buffering.
pub mod fast_store;
/// Fast-store key layout.
pub mod keys;
/// Entities shared by both stores.
pub mod models;
/// Storage error taxonomy and availability classification.
pub mod storage;
