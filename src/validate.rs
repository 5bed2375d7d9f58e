//! Field validators shared by the entity models
//!
//! Identifiers follow `[a-z_][a-z0-9_]*`; lengths are counted in characters.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, SchemaError};

pub const KEYNAME_MIN: usize = 3;
pub const KEYNAME_MAX: usize = 50;
pub const NAME_MIN: usize = 3;
pub const NAME_MAX: usize = 100;
pub const DESCRIPTION_MIN: usize = 10;
pub const DESCRIPTION_MAX: usize = 255;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("identifier pattern is valid"))
}

/// Check that `value` has between `min` and `max` characters (inclusive)
pub fn validate_length(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len < min {
        return Err(SchemaError::Validation(format!(
            "'{}' must be at least {} characters long: {}",
            field, min, len
        )));
    }
    if len > max {
        return Err(SchemaError::Validation(format!(
            "'{}' must be at most {} characters long: {}",
            field, max, len
        )));
    }
    Ok(())
}

/// Check an identifier field against the identifier grammar and the keyname bounds
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    validate_length(field, value, KEYNAME_MIN, KEYNAME_MAX)?;
    if !identifier_pattern().is_match(value) {
        return Err(SchemaError::Validation(format!(
            "'{}' must be a valid identifier ([a-z_][a-z0-9_]*): {:?}",
            field, value
        )));
    }
    Ok(())
}

pub fn validate_keyname(value: &str) -> Result<()> {
    validate_identifier("schema_keyname", value)
}

pub fn validate_name(value: &str) -> Result<()> {
    validate_length("schema_name", value, NAME_MIN, NAME_MAX)
}

pub fn validate_description(value: &str) -> Result<()> {
    validate_length("schema_description", value, DESCRIPTION_MIN, DESCRIPTION_MAX)
}
