//! Redaction of bearer tokens in log lines and error strings.

use url::Url;

/// Mask bearer tokens, `token=` style assignments, and JWT-looking values.
pub fn redact_sensitive_detail(raw: &str) -> String {
    let mut value = raw.to_string();
    let patterns = [
        (r"(?i)\b(bearer)\s+[a-z0-9._\-~+/]+=*", "$1 [REDACTED]"),
        (
            r"(?i)\b(token|auth_token|signature|api[_\-]?key|secret|password)\b(\s*[:=]\s*)([^,\s&]+)",
            "$1$2[REDACTED]",
        ),
        (
            r"\beyJ[a-zA-Z0-9_\-]+\.[a-zA-Z0-9_\-]+\.[a-zA-Z0-9_\-]+",
            "[REDACTED_JWT]",
        ),
    ];

    for (pattern, replacement) in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            value = re.replace_all(&value, replacement).to_string();
        }
    }

    value
}

/// Copy of `url` with the `token` query parameter masked, for logging.
pub fn redact_url(url: &Url) -> String {
    if !url.query_pairs().any(|(k, _)| k == "token") {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == "token" {
                (k.into_owned(), "[REDACTED]".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
