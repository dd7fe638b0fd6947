use crate::http::Status;
use crate::logger::SharedLogger;
use crate::router::Route;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, OnceLock};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// The transport's outbound side of one exchange.
///
/// Implementations follow the usual server-response life cycle: headers may
/// be set until the head is written, the body may be written until the
/// stream is ended, and `destroy` tears the connection down.
pub trait ResponseChannel: Send {
    /// Set a header, replacing an existing one with the same name
    /// (case-insensitive). Ignored once the head is written.
    fn set_header(&mut self, name: &str, value: &str);

    /// Write the status line. Ignored if already written.
    fn write_head(&mut self, status: u16, reason: Option<&str>);

    /// Write body bytes. Returns `false` when the channel is applying
    /// backpressure or has already ended.
    fn write(&mut self, chunk: &[u8]) -> bool;

    /// Finish the response.
    fn end(&mut self);

    /// Tear the connection down without finishing anything further.
    fn destroy(&mut self);

    fn headers_sent(&self) -> bool;

    fn is_ended(&self) -> bool;
}

/// Everything a [`MemoryChannel`] has been asked to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedResponse {
    pub status: Option<u16>,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub ended: bool,
    pub destroyed: bool,
    /// Number of times the head was written, duplicates included
    pub head_writes: usize,
}

impl RecordedResponse {
    /// Get a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A [`ResponseChannel`] that records into memory.
///
/// Clones share the same record, so one clone can be handed to the
/// dispatcher and another kept to inspect the result.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    record: Arc<Mutex<RecordedResponse>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far
    pub fn snapshot(&self) -> RecordedResponse {
        self.record.lock().clone()
    }
}

impl ResponseChannel for MemoryChannel {
    fn set_header(&mut self, name: &str, value: &str) {
        let mut record = self.record.lock();
        if record.status.is_some() {
            return;
        }
        match record
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => record.headers.push((name.to_string(), value.to_string())),
        }
    }

    fn write_head(&mut self, status: u16, reason: Option<&str>) {
        let mut record = self.record.lock();
        record.head_writes += 1;
        if record.status.is_some() {
            return;
        }
        record.status = Some(status);
        record.reason = reason.map(str::to_string);
    }

    fn write(&mut self, chunk: &[u8]) -> bool {
        let mut record = self.record.lock();
        if record.ended || record.destroyed {
            return false;
        }
        if record.status.is_none() {
            record.status = Some(Status::Ok.code());
        }
        record.body.extend_from_slice(chunk);
        true
    }

    fn end(&mut self) {
        let mut record = self.record.lock();
        if record.status.is_none() {
            record.status = Some(Status::Ok.code());
        }
        record.ended = true;
    }

    fn destroy(&mut self) {
        self.record.lock().destroyed = true;
    }

    fn headers_sent(&self) -> bool {
        self.record.lock().status.is_some()
    }

    fn is_ended(&self) -> bool {
        let record = self.record.lock();
        record.ended || record.destroyed
    }
}

struct ResponderInner {
    channel: Mutex<Box<dyn ResponseChannel>>,
    route: OnceLock<Arc<Route>>,
    request_url: String,
    auto_headers: Arc<[(String, String)]>,
    logger: SharedLogger,
}

/// Response handle given to handlers and observers.
///
/// At most one of [`send`](Self::send), [`send_json`](Self::send_json) or
/// [`indicate_error_if_possible`](Self::indicate_error_if_possible) puts a
/// status and body on the wire; later attempts are no-ops. Cloning is cheap
/// and every clone drives the same channel.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<ResponderInner>,
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("request_url", &self.inner.request_url)
            .field("route", &self.inner.route.get().map(|r| r.prefix().to_string()))
            .field("auto_headers", &self.inner.auto_headers)
            .finish()
    }
}

impl Responder {
    pub fn new(
        channel: Box<dyn ResponseChannel>,
        logger: SharedLogger,
        auto_headers: Arc<[(String, String)]>,
        request_url: Option<&str>,
    ) -> Self {
        Self {
            inner: Arc::new(ResponderInner {
                channel: Mutex::new(channel),
                route: OnceLock::new(),
                request_url: request_url.unwrap_or("<no url>").to_string(),
                auto_headers,
                logger,
            }),
        }
    }

    /// The raw target of the request this responder answers
    pub fn request_url(&self) -> &str {
        &self.inner.request_url
    }

    /// The route selected for the request, once routing has happened
    pub fn route(&self) -> Option<&Arc<Route>> {
        self.inner.route.get()
    }

    pub(crate) fn set_route(&self, route: Arc<Route>) {
        let _ = self.inner.route.set(route);
    }

    pub fn headers_sent(&self) -> bool {
        self.inner.channel.lock().headers_sent()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.channel.lock().is_ended()
    }

    /// Send a complete response.
    ///
    /// Preset headers are applied first, then `headers`, so the call wins on
    /// a name clash. Returns whether the body was accepted without
    /// backpressure; `false` as well when a response was already started.
    pub fn send(
        &self,
        status: u16,
        body: Option<&[u8]>,
        headers: &[(&str, &str)],
        reason: Option<&str>,
    ) -> bool {
        let logger = &self.inner.logger;
        let mut channel = self.inner.channel.lock();
        if channel.headers_sent() || channel.is_ended() {
            logger.warn(format_args!(
                "resp to {} already started, dropping response with code {}",
                self.inner.request_url, status
            ));
            return false;
        }

        for (name, value) in self.inner.auto_headers.iter() {
            channel.set_header(name, value);
        }
        for (name, value) in headers {
            channel.set_header(name, value);
        }

        logger.debug(format_args!(
            "resp to {} sending response with code {}",
            self.inner.request_url, status
        ));
        channel.write_head(status, reason);

        let accepted = match body {
            Some(body) => {
                let accepted = channel.write(body);
                if !accepted {
                    logger.debug(format_args!(
                        "resp to {} body write hit backpressure",
                        self.inner.request_url
                    ));
                }
                accepted
            }
            None => true,
        };
        channel.end();
        accepted
    }

    /// Send `status` with no body and no extra headers
    pub fn send_status(&self, status: u16) -> bool {
        self.send(status, None, &[], None)
    }

    /// Serialize `data` and send it as JSON.
    ///
    /// A `Content-Type` is added unless `headers` already carries one. If
    /// serialization fails a 500 is sent instead, when still possible.
    pub fn send_json<T>(
        &self,
        status: u16,
        data: &T,
        headers: &[(&str, &str)],
        reason: Option<&str>,
    ) -> bool
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_string(data) {
            Ok(text) => self.send_json_text(status, &text, headers, reason),
            Err(err) => {
                self.inner.logger.error(format_args!(
                    "resp to {} serializing JSON failed: {}",
                    self.inner.request_url, err
                ));
                self.indicate_error_if_possible(Status::InternalServerError.code());
                false
            }
        }
    }

    /// Send an already serialized JSON document
    pub fn send_json_text(
        &self,
        status: u16,
        json: &str,
        headers: &[(&str, &str)],
        reason: Option<&str>,
    ) -> bool {
        let has_content_type = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));

        if has_content_type {
            self.send(status, Some(json.as_bytes()), headers, reason)
        } else {
            let mut merged = Vec::with_capacity(headers.len() + 1);
            merged.extend_from_slice(headers);
            merged.push(("Content-Type", JSON_CONTENT_TYPE));
            self.send(status, Some(json.as_bytes()), &merged, reason)
        }
    }

    /// Report `status` if nothing was sent yet, otherwise just make sure the
    /// response stream is ended.
    pub fn indicate_error_if_possible(&self, status: u16) {
        let mut channel = self.inner.channel.lock();
        if !channel.headers_sent() && !channel.is_ended() {
            drop(channel);
            self.send(status, None, &[], None);
        } else if !channel.is_ended() {
            channel.end();
        }
    }

    /// Tear the underlying connection down
    pub fn destroy(&self) {
        self.inner.channel.lock().destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::log_none;

    fn responder(auto: &[(&str, &str)]) -> (Responder, MemoryChannel) {
        let channel = MemoryChannel::new();
        let auto: Arc<[(String, String)]> = auto
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let resp = Responder::new(Box::new(channel.clone()), log_none(), auto, Some("/t"));
        (resp, channel)
    }

    #[test]
    fn test_call_headers_override_auto_headers() {
        let (resp, channel) = responder(&[("X-Origin", "auto"), ("X-Keep", "1")]);
        assert!(resp.send(200, Some(b"hi"), &[("x-origin", "call")], Some("FINE")));

        let out = channel.snapshot();
        assert_eq!(out.status, Some(200));
        assert_eq!(out.reason.as_deref(), Some("FINE"));
        assert_eq!(out.header("X-Origin"), Some("call"));
        assert_eq!(out.header("X-Keep"), Some("1"));
        assert_eq!(out.body_text(), "hi");
        assert!(out.ended);
    }

    #[test]
    fn test_second_send_is_noop() {
        let (resp, channel) = responder(&[]);
        assert!(resp.send(201, Some(b"first"), &[], None));
        assert!(!resp.send(500, Some(b"second"), &[], None));
        resp.indicate_error_if_possible(400);

        let out = channel.snapshot();
        assert_eq!(out.status, Some(201));
        assert_eq!(out.body_text(), "first");
        assert_eq!(out.head_writes, 1);
    }

    #[test]
    fn test_indicate_error_uses_given_status() {
        let (resp, channel) = responder(&[]);
        resp.indicate_error_if_possible(405);
        let out = channel.snapshot();
        assert_eq!(out.status, Some(405));
        assert!(out.body.is_empty());
        assert!(out.ended);
    }

    #[test]
    fn test_indicate_error_ends_started_stream() {
        let (resp, mut channel) = responder(&[]);
        channel.write_head(200, None);
        channel.write(b"partial");
        resp.indicate_error_if_possible(500);

        let out = channel.snapshot();
        assert_eq!(out.status, Some(200));
        assert_eq!(out.body_text(), "partial");
        assert!(out.ended);
    }

    #[test]
    fn test_send_json_adds_content_type() {
        let (resp, channel) = responder(&[]);
        let data = serde_json::json!({"say": "hi", "n": 2});
        assert!(resp.send_json(200, &data, &[], None));

        let out = channel.snapshot();
        assert_eq!(out.header("content-type"), Some(JSON_CONTENT_TYPE));
        let parsed: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn test_send_json_keeps_caller_content_type() {
        let (resp, channel) = responder(&[]);
        resp.send_json_text(
            200,
            "{}",
            &[("CONTENT-TYPE", "application/json; charset=UTF-8; custom=data")],
            None,
        );

        let out = channel.snapshot();
        assert_eq!(out.headers.len(), 1);
        assert_eq!(
            out.header("content-type"),
            Some("application/json; charset=UTF-8; custom=data")
        );
    }
}
