//! CORS header set for chat responses

use axum::http::{header, HeaderMap, HeaderValue};
use chatproxy_core::CorsConfig;
use tracing::warn;

pub const ALLOWED_METHODS: &str = "OPTIONS,POST,GET,DELETE,PUT";
pub const ALLOWED_HEADERS: &str = "Content-Type";

/// Add the CORS headers to `headers` when enabled in `cors`.
pub fn apply(headers: &mut HeaderMap, cors: &CorsConfig) {
    if !cors.enabled {
        return;
    }
    headers.insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    match HeaderValue::from_str(&cors.allowed_origin) {
        Ok(origin) => {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        Err(_) => warn!(
            "Allowed origin {:?} is not a valid header value; omitting it",
            cors.allowed_origin
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cors(enabled: bool, origin: &str) -> CorsConfig {
        CorsConfig {
            enabled,
            allowed_origin: origin.into(),
        }
    }

    #[test]
    fn emits_full_header_set() {
        let mut headers = HeaderMap::new();
        apply(&mut headers, &cors(true, "https://app.test"));
        assert_eq!(headers[header::ALLOW], ALLOWED_METHODS);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.test");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS);
    }

    #[test]
    fn empty_origin_is_still_sent() {
        let mut headers = HeaderMap::new();
        apply(&mut headers, &cors(true, ""));
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "");
    }

    #[test]
    fn disabled_emits_nothing() {
        let mut headers = HeaderMap::new();
        apply(&mut headers, &cors(false, "https://app.test"));
        assert!(headers.is_empty());
    }

    #[test]
    fn invalid_origin_is_skipped() {
        let mut headers = HeaderMap::new();
        apply(&mut headers, &cors(true, "bad\norigin"));
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(headers.get(header::ALLOW).is_some());
    }
}
