//! Token id → bytes → text.

use crate::{
    error::{DecodeError, ErrorMode},
    types::Token,
    vocab::Vocabulary,
};

/// Concatenates the byte sequences of `tokens`.
///
/// Special token ids decode to their literal text.
///
/// # Errors
///
/// Returns [`DecodeError::UnknownToken`] for the first id with no entry in `vocab`.
pub(crate) fn decode_bytes(vocab: &Vocabulary, tokens: &[Token]) -> Result<Vec<u8>, DecodeError> {
    // tokens average a few bytes each
    let mut bytes = Vec::with_capacity(tokens.len() * 4);
    for &token in tokens {
        let seq = vocab
            .id_to_bytes(token)
            .ok_or(DecodeError::UnknownToken(token))?;
        bytes.extend_from_slice(seq);
    }
    Ok(bytes)
}

/// Decodes `tokens` into a string.
///
/// # Errors
///
/// Returns [`DecodeError::UnknownToken`] if a token ID is not found in the
/// vocabulary, or [`DecodeError::InvalidUtf8`] if the decoded bytes are not
/// valid UTF-8 (only in `Strict` mode).
pub(crate) fn decode_text(
    vocab: &Vocabulary,
    tokens: &[Token],
    errors: ErrorMode,
) -> Result<String, DecodeError> {
    let bytes = decode_bytes(vocab, tokens)?;

    match errors {
        ErrorMode::Strict => String::from_utf8(bytes).map_err(DecodeError::InvalidUtf8),
        ErrorMode::Replace => Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }),
    }
}
