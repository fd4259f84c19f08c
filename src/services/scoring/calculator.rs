//! Pure point computation for one submission.
//!
//! Rules, in order: exact-set correctness, base points, partial credit,
//! linear speed bonus, streak bonus, negative marking (capped at the current
//! score), then the net total. [`apply_to_score`] folds a breakdown into a
//! running score and floors it at zero.

use std::collections::HashSet;

use thiserror::Error;

use crate::{
    dao::models::{ExamMode, ParticipantScore, ScoreBreakdown},
    state::quiz::Question,
};

/// Share of the base points granted per streak step beyond the first.
const STREAK_BONUS_RATE: f64 = 0.1;

/// Failures of the scoring math.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// Speed bonus requested for a question without a time limit.
    #[error("question has no time limit; cannot compute speed bonus")]
    InvalidTimeLimit,
    /// Multiplier is negative or not finite.
    #[error("invalid speed bonus multiplier {0}")]
    InvalidMultiplier(f64),
    /// Negative marking percentage above 100.
    #[error("invalid negative marking percentage {0}")]
    InvalidPercentage(u8),
    /// Integer overflow while summing points.
    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),
}

/// Everything the calculator reads for one submission.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    /// Question being answered.
    pub question: &'a Question,
    /// Selected option ids.
    pub selected_option_ids: &'a [String],
    /// Free-form value, if any.
    pub value: Option<&'a str>,
    /// Client-observed response time.
    pub response_time_ms: u64,
    /// Participant score before this answer.
    pub current: &'a ParticipantScore,
    /// Session exam-mode switches.
    pub exam_mode: &'a ExamMode,
}

/// Whether a submission is fully correct.
pub fn is_fully_correct(question: &Question, selected_option_ids: &[String], value: Option<&str>) -> bool {
    if question.is_free_form() {
        let Some(value) = value else {
            return false;
        };
        let value = value.trim().to_lowercase();
        return question
            .accepted_answers
            .iter()
            .any(|accepted| accepted.trim().to_lowercase() == value);
    }

    let selected: HashSet<&str> = selected_option_ids.iter().map(String::as_str).collect();
    selected == question.correct_option_ids()
}

/// Compute the point breakdown of a submission.
pub fn calculate(input: &ScoringInput<'_>) -> Result<ScoreBreakdown, ScoringError> {
    let question = input.question;
    let base = i64::from(question.base_points);
    let is_correct = is_fully_correct(question, input.selected_option_ids, input.value);

    let base_points = if is_correct { base } else { 0 };
    let partial_credit = if is_correct || !question.partial_credit || question.is_free_form() {
        0
    } else {
        partial_credit(question, input.selected_option_ids, base)
    };
    let speed_bonus = if is_correct {
        speed_bonus(question, input.response_time_ms, base)?
    } else {
        0
    };

    let (streak, streak_bonus) = if is_correct {
        let streak = input
            .current
            .streak_count
            .checked_add(1)
            .ok_or(ScoringError::Overflow("streak"))?;
        let bonus = if streak <= 1 {
            0
        } else {
            (base as f64 * STREAK_BONUS_RATE * f64::from(streak - 1)).round() as i64
        };
        (streak, bonus)
    } else {
        (0, 0)
    };

    let negative_deduction = if input.exam_mode.negative_marking && !is_correct && partial_credit == 0 {
        let percentage = input.exam_mode.negative_marking_percentage;
        if percentage > 100 {
            return Err(ScoringError::InvalidPercentage(percentage));
        }
        let deduction = base * i64::from(percentage) / 100;
        deduction.min(input.current.total_score.max(0))
    } else {
        0
    };

    let total = base_points
        .checked_add(partial_credit)
        .and_then(|sum| sum.checked_add(speed_bonus))
        .and_then(|sum| sum.checked_add(streak_bonus))
        .and_then(|sum| sum.checked_sub(negative_deduction))
        .ok_or(ScoringError::Overflow("total"))?;

    Ok(ScoreBreakdown {
        base_points,
        speed_bonus,
        streak_bonus,
        partial_credit,
        negative_deduction,
        total,
        is_correct,
        streak,
    })
}

fn partial_credit(question: &Question, selected_option_ids: &[String], base: i64) -> i64 {
    let correct = question.correct_option_ids();
    if correct.is_empty() {
        return 0;
    }
    let selected: HashSet<&str> = selected_option_ids.iter().map(String::as_str).collect();
    let correct_selected = selected.intersection(&correct).count();
    let incorrect_selected = selected.len() - correct_selected;
    if incorrect_selected > 0 || correct_selected == 0 {
        return 0;
    }
    (correct_selected as f64 / correct.len() as f64 * base as f64).round() as i64
}

fn speed_bonus(question: &Question, response_time_ms: u64, base: i64) -> Result<i64, ScoringError> {
    let multiplier = question.speed_bonus_multiplier;
    if !multiplier.is_finite() || multiplier < 0.0 {
        return Err(ScoringError::InvalidMultiplier(multiplier));
    }
    if multiplier == 0.0 {
        return Ok(0);
    }
    let time_limit_ms = question.time_limit.as_millis();
    if time_limit_ms == 0 {
        return Err(ScoringError::InvalidTimeLimit);
    }
    let remaining = (1.0 - response_time_ms as f64 / time_limit_ms as f64).max(0.0);
    Ok((base as f64 * multiplier * remaining).round() as i64)
}

/// Fold a breakdown into a running score. The stored total never drops below zero.
pub fn apply_to_score(
    current: &ParticipantScore,
    breakdown: &ScoreBreakdown,
    response_time_ms: u64,
) -> ParticipantScore {
    ParticipantScore {
        total_score: current.total_score.saturating_add(breakdown.total).max(0),
        total_time_ms: current.total_time_ms.saturating_add(response_time_ms),
        streak_count: breakdown.streak,
        last_question_score: breakdown.total,
    }
}
