use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EngineError;

pub const MODULE_NAME_PATTERN: &str = "^[A-Za-z_][A-Za-z0-9_.+-]*$";
pub const VARIATION_NAME_PATTERN: &str = "^[A-Za-z0-9_][A-Za-z0-9_.-]*$";

static MODULE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(MODULE_NAME_PATTERN).expect("module name pattern must compile"));

static VARIATION_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(VARIATION_NAME_PATTERN).expect("variation name pattern must compile"));

/// Checks a module name against the canonical pattern.
pub fn check_module_name(name: &str) -> Result<(), EngineError> {
    if MODULE_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(EngineError::InvalidName(name.to_string()))
    }
}

/// Checks a variation name against the canonical pattern.
///
/// The empty variation name is reserved for the unsplit identity and is
/// only produced internally by the transition driver.
pub fn check_variation_name(name: &str) -> Result<(), EngineError> {
    if VARIATION_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(EngineError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_module_names() {
        for name in ["libfoo", "libc++", "foo.bar", "_hidden", "a-b"] {
            assert!(check_module_name(name).is_ok(), "rejected `{name}`");
        }
    }

    #[test]
    fn rejects_malformed_names() {
        for name in ["", " ", "has space", "+lead", "tab\tname"] {
            assert!(check_module_name(name).is_err(), "accepted `{name}`");
        }
        assert!(check_variation_name("").is_err());
        assert!(check_variation_name("arm64").is_ok());
    }
}
