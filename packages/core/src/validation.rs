//! Boundary validation for registry and alert identifiers.

use reqwest::Url;

/// Maximum length of a sensor id or sensor API URL.
pub const MAX_FIELD_LEN: usize = 127;

/// `^[A-Za-z][0-9A-Za-z._-]{0,126}$`
pub fn is_valid_sensor_id(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    candidate.len() <= MAX_FIELD_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// A plain-HTTP base URL without a trailing slash.
pub fn is_valid_sensor_api(candidate: &str) -> bool {
    if candidate.is_empty() || candidate.len() > MAX_FIELD_LEN || candidate.ends_with('/') {
        return false;
    }
    match Url::parse(candidate) {
        Ok(url) => url.scheme() == "http" && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// A look-back window in hours: a finite number greater than zero.
pub fn parse_hours(candidate: &str) -> Option<f64> {
    candidate
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|hours| hours.is_finite() && *hours > 0.0)
}

/// `^HG\d+E\d+$`
pub fn is_valid_alert_id(candidate: &str) -> bool {
    let Some(rest) = candidate.strip_prefix("HG") else {
        return false;
    };
    let Some((epoch, index)) = rest.split_once('E') else {
        return false;
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(epoch) && all_digits(index)
}
