use axum::extract::{FromRequest, FromRequestParts, Path, Query};

use crate::error::AppError;

/// JSON body whose rejection is reported through [`AppError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct Payload<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
pub struct Params<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(AppError))]
pub struct Id<T>(pub T);

/// Trims `value` and rejects it when blank or longer than `max_chars`.
pub fn required_text(
    value: Option<&str>,
    field: &str,
    max_chars: usize,
) -> Result<String, AppError> {
    let trimmed = value.map(str::trim).unwrap_or_default();

    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} required")));
    }

    if trimmed.chars().count() > max_chars {
        return Err(AppError::validation(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }

    Ok(trimmed.to_string())
}

/// Blank strings count as absent.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Display name used when a login supplies no username: the local part of the email.
pub fn default_username(email: &str) -> &str {
    email.split_once('@').map_or(email, |(local, _)| local)
}

/// Wraps `term` for a `LIKE ... ESCAPE '\'` substring match, escaping wildcards.
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');

    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }

    pattern.push('%');
    pattern
}

pub fn total_pages(total: i64, limit: i64) -> i64 {
    if limit <= 0 {
        return 0;
    }

    (total + limit - 1) / limit
}
