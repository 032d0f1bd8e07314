//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::session::MAX_NAME_CHARS;

/// Validates that a player name is not blank and fits the display limit once trimmed.
///
/// # Examples
///
/// ```ignore
/// validate_player_name("  Sarah ") // Ok
/// validate_player_name("   ")      // Err - blank
/// ```
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    let chars = name.trim().chars().count();
    if chars == 0 {
        let mut err = ValidationError::new("name_blank");
        err.message = Some("Name must not be empty".into());
        return Err(err);
    }

    if chars > MAX_NAME_CHARS {
        let mut err = ValidationError::new("name_length");
        err.message = Some(
            format!("Name must be at most {MAX_NAME_CHARS} characters (got {chars})").into(),
        );
        return Err(err);
    }

    Ok(())
}
