//! Command string tokenisation for direct (shell-less) execution.

use thiserror::Error;

/// Raised when a command token carries an ASCII control character.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "command arguments must not contain control characters (ASCII 0x00-0x1F or 0x7F), found {found:?} in {token:?}"
)]
pub struct ControlCharacterError {
    /// Offending token.
    pub token: String,
    /// First control character found in the token.
    pub found: char,
}

/// Splits a configured command into argument tokens.
///
/// Tokens are separated on whitespace, empty tokens are dropped, and the
/// order is preserved. No shell interpretation happens: operators such as
/// `&&` or `>` survive as literal tokens.
///
/// # Examples
///
/// ```
/// # use hal_agent::exec::sanitize_command;
/// assert_eq!(sanitize_command("  make   test "), vec!["make", "test"]);
/// ```
#[must_use]
pub fn sanitize_command(command: &str) -> Vec<String> {
    command
        .split_whitespace()
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Checks that no token carries an ASCII control character.
///
/// Whitespace splitting already removes tabs and newlines, so this catches
/// the characters that would otherwise reach the process verbatim, such as
/// NUL or escape.
///
/// # Errors
///
/// Returns [`ControlCharacterError`] for the first offending token.
pub fn validate_tokens(tokens: &[String]) -> Result<(), ControlCharacterError> {
    for token in tokens {
        if let Some(found) = token.chars().find(char::is_ascii_control) {
            return Err(ControlCharacterError {
                token: token.clone(),
                found,
            });
        }
    }
    Ok(())
}
