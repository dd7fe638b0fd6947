use crate::http::RequestHead;
use crate::router::Route;
use std::borrow::Cow;
use std::str;
use std::sync::Arc;
use url::Url;

/// A request as the transport delivered it, before any routing.
///
/// `method` and `url` are optional because a transport may hand over a
/// request whose request line is incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRequest {
    pub method: Option<String>,
    pub url: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl RawRequest {
    /// Create a new raw request
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: Some(method.to_string()),
            url: Some(url.to_string()),
            headers: Vec::new(),
        }
    }

    /// Add a header, builder style
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_lowercase(), value.to_string()));
        self
    }

    /// Get a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl From<RequestHead> for RawRequest {
    fn from(head: RequestHead) -> Self {
        Self {
            method: head.method,
            url: head.target,
            headers: head.headers,
        }
    }
}

/// The per-exchange request state between header arrival and cleanup.
///
/// The body is accumulated as text. Once the exchange reaches a terminal
/// path the body is cleared, the resolved URL is dropped and the request is
/// marked damaged.
#[derive(Debug)]
pub struct CompleteRequest {
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    route: Arc<Route>,
    full_url: Option<Url>,
    body: String,
    body_chars: usize,
    pending_bytes: Vec<u8>,
    damaged: bool,
}

impl CompleteRequest {
    pub(crate) fn new(
        url: String,
        method: String,
        headers: Vec<(String, String)>,
        route: Arc<Route>,
    ) -> Self {
        Self {
            url,
            method,
            headers,
            route,
            full_url: None,
            body: String::new(),
            body_chars: 0,
            pending_bytes: Vec::new(),
            damaged: false,
        }
    }

    /// The request target exactly as received
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Get a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The route that was selected for this request
    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    /// The absolute URL. Set before the handler runs.
    pub fn full_url(&self) -> Option<&Url> {
        self.full_url.as_ref()
    }

    /// First query parameter called `name` in the absolute URL
    pub fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        self.full_url
            .as_ref()?
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// The body received so far
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Body length in characters, the unit the size cap is measured in
    pub fn body_len(&self) -> usize {
        self.body_chars
    }

    pub fn is_damaged(&self) -> bool {
        self.damaged
    }

    /// A copy of the method, target and headers, without the body.
    pub fn to_raw(&self) -> RawRequest {
        RawRequest {
            method: Some(self.method.clone()),
            url: Some(self.url.clone()),
            headers: self.headers.clone(),
        }
    }

    /// Append a body chunk.
    ///
    /// Bytes of a UTF-8 sequence cut off at the end of the chunk are held
    /// back until the next chunk; invalid sequences become U+FFFD.
    pub(crate) fn append(&mut self, chunk: &[u8]) {
        let mut input = std::mem::take(&mut self.pending_bytes);
        input.extend_from_slice(chunk);

        let mut start = 0;
        loop {
            match str::from_utf8(&input[start..]) {
                Ok(text) => {
                    push_text(&mut self.body, &mut self.body_chars, text);
                    input.clear();
                    break;
                }
                Err(err) => {
                    let valid = start + err.valid_up_to();
                    let text = String::from_utf8_lossy(&input[start..valid]);
                    push_text(&mut self.body, &mut self.body_chars, &text);
                    match err.error_len() {
                        Some(len) => {
                            push_text(&mut self.body, &mut self.body_chars, "\u{FFFD}");
                            start = valid + len;
                        }
                        None => {
                            input.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        self.pending_bytes = input;
    }

    /// Turn bytes still held back at end of body into replacement text.
    pub(crate) fn flush_pending(&mut self) {
        if self.pending_bytes.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.pending_bytes).into_owned();
        self.pending_bytes.clear();
        push_text(&mut self.body, &mut self.body_chars, &text);
    }

    pub(crate) fn set_full_url(&mut self, url: Url) {
        self.full_url = Some(url);
    }

    pub(crate) fn mark_damaged(&mut self) {
        self.damaged = true;
    }

    /// Clear the buffers and mark the request terminal. Safe to call again.
    pub(crate) fn finalize(&mut self) {
        self.body = String::new();
        self.body_chars = 0;
        self.pending_bytes = Vec::new();
        self.full_url = None;
        self.damaged = true;
    }
}

fn push_text(body: &mut String, chars: &mut usize, text: &str) {
    body.push_str(text);
    *chars += text.chars().count();
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// The request an error observer is told about.
///
/// Failures before routing only have the raw request; later ones have the
/// pending request with whatever body it has accumulated.
#[derive(Debug, Clone, Copy)]
pub enum ObservedRequest<'a> {
    Raw(&'a RawRequest),
    Pending(&'a CompleteRequest),
}

impl<'a> ObservedRequest<'a> {
    pub fn url(&self) -> Option<&'a str> {
        match self {
            ObservedRequest::Raw(raw) => raw.url.as_deref(),
            ObservedRequest::Pending(req) => Some(req.url()),
        }
    }

    pub fn method(&self) -> Option<&'a str> {
        match self {
            ObservedRequest::Raw(raw) => raw.method.as_deref(),
            ObservedRequest::Pending(req) => Some(req.method()),
        }
    }

    pub fn header(&self, name: &str) -> Option<&'a str> {
        match self {
            ObservedRequest::Raw(raw) => raw.header(name),
            ObservedRequest::Pending(req) => req.header(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Outcome, Route};

    fn pending() -> CompleteRequest {
        let route = Arc::new(Route::new("/", |_, _| Ok(Outcome::Done)));
        CompleteRequest::new("/".to_string(), "POST".to_string(), Vec::new(), route)
    }

    #[test]
    fn test_append_counts_characters_not_bytes() {
        let mut req = pending();
        req.append("héllo".as_bytes());
        assert_eq!(req.body(), "héllo");
        assert_eq!(req.body_len(), 5);
    }

    #[test]
    fn test_split_multibyte_sequence_is_carried() {
        let mut req = pending();
        let bytes = "añb".as_bytes();
        req.append(&bytes[..2]);
        assert_eq!(req.body(), "a");
        req.append(&bytes[2..]);
        assert_eq!(req.body(), "añb");
        assert_eq!(req.body_len(), 3);
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut req = pending();
        req.append(&[b'a', 0xff, b'b']);
        assert_eq!(req.body(), "a\u{FFFD}b");

        req.append(&[0xe2, 0x82]);
        req.flush_pending();
        assert_eq!(req.body(), "a\u{FFFD}b\u{FFFD}");
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut req = pending();
        req.append(b"data");
        req.finalize();
        req.finalize();
        assert!(req.is_damaged());
        assert_eq!(req.body(), "");
        assert_eq!(req.body_len(), 0);
        assert!(req.full_url().is_none());
    }

    #[test]
    fn test_observed_request_accessors() {
        let raw = RawRequest::new("GET", "/x").with_header("Host", "example.com");
        let observed = ObservedRequest::Raw(&raw);
        assert_eq!(observed.url(), Some("/x"));
        assert_eq!(observed.method(), Some("GET"));
        assert_eq!(observed.header("HOST"), Some("example.com"));
    }
}
