//! Target language codes accepted at submission.

use crate::domain::ORIGINAL_LANGUAGE;
use crate::{Error, Result};

const MAX_LANGUAGE_LEN: usize = 16;

/// Validate and normalize a target language code such as `es`, `pt-BR` or `zh_Hans`.
///
/// The code is trimmed; it must be 2 to 16 characters of ASCII letters, digits,
/// `-` or `_`, and may not collide with the original-language sentinel.
pub fn normalize_language(raw: &str) -> Result<String> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(Error::validation("target language is required"));
    }
    if code.len() < 2 || code.len() > MAX_LANGUAGE_LEN {
        return Err(Error::validation(format!(
            "target language '{code}' must be between 2 and {MAX_LANGUAGE_LEN} characters"
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::validation(format!(
            "target language '{code}' contains invalid characters"
        )));
    }
    if code.eq_ignore_ascii_case(ORIGINAL_LANGUAGE) {
        return Err(Error::validation(format!(
            "'{ORIGINAL_LANGUAGE}' is reserved for source transcripts"
        )));
    }
    Ok(code.to_string())
}

/// Like [`normalize_language`] but also accepts the original-language sentinel,
/// for reading and editing transcripts.
pub fn normalize_transcript_language(raw: &str) -> Result<String> {
    if raw.trim() == ORIGINAL_LANGUAGE {
        return Ok(ORIGINAL_LANGUAGE.to_string());
    }
    normalize_language(raw)
}
