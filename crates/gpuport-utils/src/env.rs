//! `${VAR}` substitution from the process environment.
//!
//! Substitution fails closed: a reference to an unset variable is an error,
//! never an empty string, so secrets cannot silently go missing.

use regex::Regex;
use std::env;
use std::sync::LazyLock;

use crate::errors::{Result, UtilsError};

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid regex pattern")
});

/// Replace every `${VAR}` in `input` with the value of `VAR`.
///
/// All missing variables are reported together.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        match env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(UtilsError::MissingEnvVar(missing.join(", ")));
    }

    Ok(text.into_owned())
}
