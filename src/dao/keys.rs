//! Fast-store key layout. Every component builds its keys here so the layout
//! stays in one place.

use uuid::Uuid;

/// Flag set while the durable store is considered unavailable.
pub const DURABLE_UNAVAILABLE: &str = "durable:unavailable";
/// FIFO list of durable writes waiting for replay.
pub const FALLBACK_PENDING: &str = "fallback:pending";

/// Authoritative live session record.
pub fn session_state(session_id: Uuid) -> String {
    format!("session:{session_id}:state")
}

/// Join code to session id mapping.
pub fn join_code(code: &str) -> String {
    format!("joincode:{}", code.to_ascii_uppercase())
}

/// Hash of participant records keyed by participant id.
pub fn participants(session_id: Uuid) -> String {
    format!("session:{session_id}:participants")
}

/// Set of banned nicknames (hash, value unused).
pub fn banned_nicknames(session_id: Uuid) -> String {
    format!("session:{session_id}:banned")
}

/// Hash of running scores keyed by participant id.
pub fn scores(session_id: Uuid) -> String {
    format!("session:{session_id}:scores")
}

/// Ranked leaderboard (sorted set of rank scores).
pub fn leaderboard(session_id: Uuid) -> String {
    format!("session:{session_id}:leaderboard")
}

/// Answer buffer hash keyed by answer id.
pub fn answer_buffer(session_id: Uuid) -> String {
    format!("session:{session_id}:answers")
}

/// Legacy list-shaped answer queue.
pub fn legacy_answer_queue(session_id: Uuid) -> String {
    format!("session:{session_id}:answer_queue")
}

/// Hash of already-scored answer ids and their breakdowns.
pub fn scored_answers(session_id: Uuid) -> String {
    format!("session:{session_id}:scored")
}

/// Arrival order of submissions for one question (sorted by timestamp).
pub fn submission_order(session_id: Uuid, question_id: Uuid) -> String {
    format!("session:{session_id}:question:{question_id}:order")
}

/// Per-question outcome of each scored participant.
pub fn question_results(session_id: Uuid, question_id: Uuid) -> String {
    format!("session:{session_id}:question:{question_id}:results")
}

/// Snapshot of a document whose durable write fell back.
pub fn fallback_document(collection: &str, document_id: &str) -> String {
    format!("fallback:doc:{collection}:{document_id}")
}
