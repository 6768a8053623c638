//! Endpoint URL helpers used when opening a connection.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;

/// Query parameter carrying the authentication token.
pub const TOKEN_PARAM: &str = "token";

const REDACTED: &str = "redacted";

/// Everything but the characters a URI component may carry unescaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// The URL with embedded credentials removed, for logging.
///
/// Userinfo is stripped and a `token` query value is masked. Input that does
/// not parse as a URL has anything before an `@` in its authority dropped.
#[must_use]
pub fn redact(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return redact_unparsed(url);
    };

    let has_userinfo = !parsed.username().is_empty() || parsed.password().is_some();
    let has_token = parsed.query_pairs().any(|(key, _)| key == TOKEN_PARAM);
    if !has_userinfo && !has_token {
        return url.to_owned();
    }

    if has_userinfo {
        // Only fails for URLs that cannot carry credentials in the first place
        _ = parsed.set_username("");
        _ = parsed.set_password(None);
    }

    if has_token {
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(key, value)| {
                let value = if key == TOKEN_PARAM {
                    REDACTED.to_owned()
                } else {
                    value.into_owned()
                };
                (key.into_owned(), value)
            })
            .collect();
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }

    parsed.into()
}

fn redact_unparsed(url: &str) -> String {
    let (scheme, rest) = url.split_once("://").unwrap_or(("", url));
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);

    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);

    if scheme.is_empty() {
        format!("{host}{path}")
    } else {
        format!("{scheme}://{host}{path}")
    }
}

/// The URL with `token` appended as a query credential.
///
/// Returned unchanged when the token is empty, when the URL already carries
/// credentials (userinfo or a `token` parameter), or when it does not parse,
/// leaving the transport to report the malformed input. The value is
/// percent-encoded as a URI component, so a space becomes `%20`.
#[must_use]
pub fn with_token(url: &str, token: &str) -> String {
    if token.is_empty() {
        return url.to_owned();
    }

    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_owned();
    };

    let has_userinfo = !parsed.username().is_empty() || parsed.password().is_some();
    let has_token = parsed.query_pairs().any(|(key, _)| key == TOKEN_PARAM);
    if has_userinfo || has_token {
        return url.to_owned();
    }

    let pair = format!("{TOKEN_PARAM}={}", utf8_percent_encode(token, COMPONENT));
    let query = match parsed.query() {
        Some(query) if !query.is_empty() => format!("{query}&{pair}"),
        _ => pair,
    };
    parsed.set_query(Some(&query));
    parsed.into()
}
