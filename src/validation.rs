//! Format and range checks that run before any transaction is opened.
//!
//! Everything here is pure; business-rule preconditions (capacity, state,
//! membership) are re-checked inside transactions on fresh reads and do
//! not live in this module.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

pub const TEAM_NAME_MIN: usize = 3;
pub const TEAM_NAME_MAX: usize = 25;
pub const DISPLAY_NAME_MIN: usize = 2;
pub const DISPLAY_NAME_MAX: usize = 20;
pub const INITIALS_LEN: usize = 3;
pub const MAX_PLAYERS_LIMIT: u32 = 20;
pub const DEFAULT_MAX_PLAYERS: u32 = 10;
pub const MAX_TEAMS_PER_USER: usize = 2;
pub const JOIN_CODE_LEN: usize = 6;
pub const DIVISION_MAX: usize = 16;

static TEAM_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 _-]+$").unwrap());
static INITIALS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z0-9]{3}$").unwrap());
static JOIN_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z0-9]{6}$").unwrap());
static DIVISION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").unwrap());

/// Trimmed, length- and charset-checked team name.
pub fn validate_team_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.len() < TEAM_NAME_MIN || name.len() > TEAM_NAME_MAX {
        return Err(AppError::InvalidArgument(format!(
            "team name must be {}-{} characters",
            TEAM_NAME_MIN, TEAM_NAME_MAX
        )));
    }
    if !TEAM_NAME_RE.is_match(name) {
        return Err(AppError::InvalidArgument(
            "team name may only contain letters, digits, spaces, dashes and underscores"
                .to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Normalized key used for the active-name uniqueness check.
pub fn normalize_team_name(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn validate_display_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.len() < DISPLAY_NAME_MIN || name.len() > DISPLAY_NAME_MAX {
        return Err(AppError::InvalidArgument(format!(
            "display name must be {}-{} characters",
            DISPLAY_NAME_MIN, DISPLAY_NAME_MAX
        )));
    }
    Ok(name.to_string())
}

/// Uppercased three-character initials.
pub fn validate_initials(initials: &str) -> Result<String, AppError> {
    let initials = initials.trim().to_uppercase();
    if !INITIALS_RE.is_match(&initials) {
        return Err(AppError::InvalidArgument(format!(
            "initials must be exactly {} uppercase letters or digits",
            INITIALS_LEN
        )));
    }
    Ok(initials)
}

/// Uppercased join code, checked for shape only. Whether it matches a
/// team is a transactional question.
pub fn validate_join_code(code: &str) -> Result<String, AppError> {
    let code = code.trim().to_uppercase();
    if !JOIN_CODE_RE.is_match(&code) {
        return Err(AppError::InvalidArgument(format!(
            "join code must be exactly {} letters or digits",
            JOIN_CODE_LEN
        )));
    }
    Ok(code)
}

/// Deduplicated, non-empty division set.
pub fn validate_divisions(divisions: &[String]) -> Result<BTreeSet<String>, AppError> {
    let mut out = BTreeSet::new();
    for raw in divisions {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        if token.len() > DIVISION_MAX || !DIVISION_RE.is_match(token) {
            return Err(AppError::InvalidArgument(format!(
                "invalid division label: {}",
                raw
            )));
        }
        out.insert(token.to_string());
    }
    if out.is_empty() {
        return Err(AppError::InvalidArgument(
            "at least one division is required".to_string(),
        ));
    }
    Ok(out)
}

pub fn validate_max_players(max_players: u32) -> Result<u32, AppError> {
    if max_players < 1 || max_players > MAX_PLAYERS_LIMIT {
        return Err(AppError::InvalidArgument(format!(
            "maxPlayers must be between 1 and {}",
            MAX_PLAYERS_LIMIT
        )));
    }
    Ok(max_players)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_names_are_trimmed_and_bounded() {
        assert_eq!(validate_team_name("  Alpha Squad  ").unwrap(), "Alpha Squad");
        assert!(validate_team_name("ab").is_err());
        assert!(validate_team_name(&"x".repeat(26)).is_err());
        assert!(validate_team_name("bad!name").is_err());
        assert!(validate_team_name("ok_name-1").is_ok());
    }

    #[test]
    fn initials_normalize_to_uppercase() {
        assert_eq!(validate_initials("abc").unwrap(), "ABC");
        assert_eq!(validate_initials(" a1z ").unwrap(), "A1Z");
        assert!(validate_initials("ab").is_err());
        assert!(validate_initials("abcd").is_err());
        assert!(validate_initials("a!c").is_err());
    }

    #[test]
    fn join_codes_are_case_insensitive_on_input() {
        assert_eq!(validate_join_code("abc123").unwrap(), "ABC123");
        assert!(validate_join_code("abc12").is_err());
        assert!(validate_join_code("abc 12").is_err());
    }

    #[test]
    fn divisions_dedupe_and_reject_empty() {
        let set = validate_divisions(&[
            "1".to_string(),
            " 1 ".to_string(),
            "open".to_string(),
        ])
        .unwrap();
        assert_eq!(set.len(), 2);
        assert!(validate_divisions(&[]).is_err());
        assert!(validate_divisions(&["  ".to_string()]).is_err());
        assert!(validate_divisions(&["no spaces".to_string()]).is_err());
    }

    #[test]
    fn max_players_range() {
        assert!(validate_max_players(0).is_err());
        assert!(validate_max_players(21).is_err());
        assert_eq!(validate_max_players(1).unwrap(), 1);
        assert_eq!(validate_max_players(20).unwrap(), 20);
    }
}
