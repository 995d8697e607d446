use axum::http::HeaderMap;

use crate::error::AppError;

/// Check the request against the configured shared token.
///
/// A server started without a token accepts every request.
pub fn authorize(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let token = extract_bearer_token(headers)?;
    if !tokens_match(token.as_bytes(), expected.as_bytes()) {
        return Err(AppError::unauthorized("Bearer token is not valid"));
    }
    Ok(())
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

// Length leaks, contents do not.
fn tokens_match(given: &[u8], expected: &[u8]) -> bool {
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (left, right)| diff | (left ^ right))
        == 0
}
