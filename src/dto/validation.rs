//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::dao::models::ExamMode;

/// Longest nickname accepted, in characters.
pub const MAX_NICKNAME_CHARS: usize = 24;

/// Validates a participant nickname: 1 to 24 visible characters once trimmed.
///
/// # Examples
///
/// ```ignore
/// validate_nickname("Ada")      // Ok
/// validate_nickname("   ")      // Err - blank
/// validate_nickname("a\u{7}b")  // Err - control character
/// ```
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    let trimmed = nickname.trim();
    let length = trimmed.chars().count();
    if length == 0 || length > MAX_NICKNAME_CHARS {
        let mut err = ValidationError::new("nickname_length");
        err.message = Some(
            format!("Nickname must have between 1 and {MAX_NICKNAME_CHARS} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("nickname_format");
        err.message = Some("Nickname must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates exam-mode switches: the deduction share is a percentage.
pub fn validate_exam_mode(mode: &ExamMode) -> Result<(), ValidationError> {
    if mode.negative_marking_percentage > 100 {
        let mut err = ValidationError::new("negative_marking_percentage");
        err.message = Some(
            format!(
                "Negative marking percentage must be within 0..=100 (got {})",
                mode.negative_marking_percentage
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}
