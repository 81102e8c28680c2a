use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::error::{GateError, GateResult};

/// Token from `Authorization: Bearer <token>`.
///
/// A missing header is `Ok(None)` so the authentication stage reports it.
/// A header in any other format is rejected here.
pub fn extract_bearer_token(headers: &HeaderMap) -> GateResult<Option<String>> {
    let Some(header) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let value = header.to_str().map_err(|_| malformed())?;
    // auth schemes are case-insensitive
    match value.trim_start().split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(Some(token.trim().to_string()))
        }
        _ => Err(malformed()),
    }
}

fn malformed() -> GateError {
    GateError::authentication(
        "authentication: Authorization header must use Bearer token format",
        "token not found",
    )
}
