use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the live quiz backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::display_stream,
        crate::routes::sse::controller_stream,
        crate::routes::sse::participants_stream,
        crate::routes::sse::participant_stream,
        crate::routes::session::create_session,
        crate::routes::session::get_session,
        crate::routes::session::start_quiz,
        crate::routes::session::reveal_question,
        crate::routes::session::next_question,
        crate::routes::session::end_quiz,
        crate::routes::session::leaderboard,
        crate::routes::session::ffi_result,
        crate::routes::session::set_participant_status,
        crate::routes::participant::join_session,
        crate::routes::participant::submit_answer,
        crate::routes::participant::participant_standing,
        crate::routes::fallback::pending_writes,
        crate::routes::fallback::clear_pending,
        crate::routes::fallback::replay,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::StoreHealth,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::SessionSummary,
            crate::dto::session::JoinRequest,
            crate::dto::session::JoinResponse,
            crate::dto::session::SubmitAnswerRequest,
            crate::dto::session::SubmitAnswerResponse,
            crate::dto::session::ParticipantStatusRequest,
            crate::dto::session::LeaderboardEntry,
            crate::dto::session::ParticipantStanding,
            crate::dto::session::FfiResultResponse,
            crate::dto::session::ActionResponse,
            crate::dto::fallback::PendingWriteView,
            crate::dto::fallback::PendingWritesResponse,
            crate::dto::fallback::ClearPendingResponse,
            crate::dto::fallback::ReplayResponse,
            crate::dao::models::ExamMode,
            crate::dao::models::ParticipantEntity,
            crate::dao::models::ParticipantStatus,
            crate::services::ffi::FfiRanking,
            crate::services::ffi::FfiRankEntry,
            crate::state::state_machine::SessionPhase,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent event streams per audience"),
        (name = "sessions", description = "Controller operations on live sessions"),
        (name = "participants", description = "Joining, answering and moderation"),
        (name = "fallback", description = "Pending durable writes parked during outages"),
    )
)]
pub struct ApiDoc;
