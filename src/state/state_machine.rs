use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle phases of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    /// Participants are joining; nothing has been asked yet.
    Lobby,
    /// A question is open for answers.
    ActiveQuestion,
    /// The answer of the current question is disclosed.
    Reveal,
    /// The quiz is over. Terminal.
    Ended,
}

/// Events that can be applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Host starts the quiz from the lobby.
    Start,
    /// Timer expiry or manual trigger discloses the answer.
    Reveal,
    /// Host (or auto-advance) opens the next question after a reveal.
    NextQuestion,
    /// Host action or last-question completion ends the quiz.
    End,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the session was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

impl SessionPhase {
    /// Compute the phase reached by applying `event`, if the move is legal.
    ///
    /// Phases only move forward, except `Reveal -> ActiveQuestion` for each new
    /// question; `Ended` accepts nothing.
    pub fn apply(self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        let next = match (self, event) {
            (SessionPhase::Lobby, SessionEvent::Start) => SessionPhase::ActiveQuestion,
            (SessionPhase::ActiveQuestion, SessionEvent::Reveal) => SessionPhase::Reveal,
            (SessionPhase::Reveal, SessionEvent::NextQuestion) => SessionPhase::ActiveQuestion,
            (from, SessionEvent::End) if from != SessionPhase::Ended => SessionPhase::Ended,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }

    /// Whether new participants may join in this phase.
    pub fn accepts_joins(self, allow_late_joiners: bool) -> bool {
        match self {
            SessionPhase::Lobby => true,
            SessionPhase::Ended => false,
            SessionPhase::ActiveQuestion | SessionPhase::Reveal => allow_late_joiners,
        }
    }
}
