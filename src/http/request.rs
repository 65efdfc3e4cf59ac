//! Request helpers.
//!
//! # Responsibilities
//! - Correlation id header handling
//! - Request-target forms for direct and proxied requests

use http::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use http::uri::{Authority, PathAndQuery, Scheme, Uri};

/// Header carrying the request correlation id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation id sent with the request, if any and if it is valid text.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// Set `X-Request-ID` on `headers`; invalid header text is ignored.
pub fn set_request_id(headers: &mut HeaderMap, id: &str) {
    if let Ok(value) = HeaderValue::from_str(id) {
        headers.insert(X_REQUEST_ID, value);
    }
}

/// Set `Host` to `authority` unless the caller already did.
pub(crate) fn ensure_host(headers: &mut HeaderMap, authority: &str) {
    if !headers.contains_key(HOST) {
        if let Ok(value) = HeaderValue::from_str(authority) {
            headers.insert(HOST, value);
        }
    }
}

fn path_and_query(uri: &Uri) -> PathAndQuery {
    uri.path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"))
}

/// Origin-form target (`/path?query`).
pub(crate) fn origin_form(uri: &Uri) -> Uri {
    Uri::from(path_and_query(uri))
}

/// Absolute-form target (`scheme://authority/path?query`).
pub(crate) fn absolute_form(uri: &Uri, scheme: Scheme, authority: &str) -> Result<Uri, http::Error> {
    let authority: Authority = authority.parse()?;
    Ok(Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query(uri))
        .build()?)
}
