use crate::error::{ServerError, ServerResult};
use bytes::{Buf, BytesMut};
use std::io::Write;
use std::str;

/// HTTP Status Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Continue = 100,
    SwitchingProtocols = 101,

    Ok = 200,
    Created = 201,
    Accepted = 202,
    NoContent = 204,

    MovedPermanently = 301,
    Found = 302,
    NotModified = 304,

    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    RequestTimeout = 408,
    Gone = 410,
    PayloadTooLarge = 413,
    RequestHeaderFieldsTooLarge = 431,

    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
}

impl Status {
    /// Numeric status code
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Get the text description for this status code
    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Continue => "Continue",
            Status::SwitchingProtocols => "Switching Protocols",

            Status::Ok => "OK",
            Status::Created => "Created",
            Status::Accepted => "Accepted",
            Status::NoContent => "No Content",

            Status::MovedPermanently => "Moved Permanently",
            Status::Found => "Found",
            Status::NotModified => "Not Modified",

            Status::BadRequest => "Bad Request",
            Status::Unauthorized => "Unauthorized",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::RequestTimeout => "Request Timeout",
            Status::Gone => "Gone",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",

            Status::InternalServerError => "Internal Server Error",
            Status::NotImplemented => "Not Implemented",
            Status::BadGateway => "Bad Gateway",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Look up a known status by its numeric code
    pub fn from_code(code: u16) -> Option<Self> {
        let status = match code {
            100 => Status::Continue,
            101 => Status::SwitchingProtocols,
            200 => Status::Ok,
            201 => Status::Created,
            202 => Status::Accepted,
            204 => Status::NoContent,
            301 => Status::MovedPermanently,
            302 => Status::Found,
            304 => Status::NotModified,
            400 => Status::BadRequest,
            401 => Status::Unauthorized,
            403 => Status::Forbidden,
            404 => Status::NotFound,
            405 => Status::MethodNotAllowed,
            408 => Status::RequestTimeout,
            410 => Status::Gone,
            413 => Status::PayloadTooLarge,
            431 => Status::RequestHeaderFieldsTooLarge,
            500 => Status::InternalServerError,
            501 => Status::NotImplemented,
            502 => Status::BadGateway,
            503 => Status::ServiceUnavailable,
            _ => return None,
        };
        Some(status)
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> u16 {
        status.code()
    }
}

/// Default reason phrase for any numeric status
pub fn reason_phrase(code: u16) -> &'static str {
    Status::from_code(code).map(|s| s.as_str()).unwrap_or("Unknown")
}

/// HTTP Parser State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpParserState {
    RequestLine,
    Complete,
}

/// The request line and headers of one request.
///
/// `method` and `target` are `None` when the request line does not carry
/// them; the dispatcher decides what to do with such a request. Header names
/// are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Option<String>,
    pub target: Option<String>,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Get a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Work out how the body of this request is delimited
    pub fn body_framing(&self) -> ServerResult<BodyFraming> {
        if let Some(encoding) = self.header("transfer-encoding") {
            if encoding
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
            {
                return Ok(BodyFraming::Chunked);
            }
            return Err(ServerError::HttpParse(format!(
                "Unsupported transfer encoding: {}",
                encoding
            )));
        }

        match self.header("content-length") {
            Some(value) => {
                let length: usize = value.trim().parse().map_err(|_| {
                    ServerError::HttpParse(format!("Invalid content-length: {}", value))
                })?;
                if length == 0 {
                    Ok(BodyFraming::Empty)
                } else {
                    Ok(BodyFraming::Length(length))
                }
            }
            None => Ok(BodyFraming::Empty),
        }
    }
}

/// How the request body is delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
}

/// HTTP request head parser
pub struct HttpParser {
    pub state: HttpParserState,
    max_header_size: usize,
}

impl HttpParser {
    /// Create a new HTTP parser
    pub fn new() -> Self {
        Self::with_max_header_size(16 * 1024)
    }

    /// Create a parser that rejects heads larger than `max_header_size`
    pub fn with_max_header_size(max_header_size: usize) -> Self {
        Self {
            state: HttpParserState::RequestLine,
            max_header_size,
        }
    }

    /// Try to parse a request head from the start of `data`.
    ///
    /// Returns the head and the number of bytes it occupied, or `None` if
    /// more data is needed.
    pub fn parse(&mut self, data: &[u8]) -> ServerResult<Option<(RequestHead, usize)>> {
        let headers_end = match find(data, b"\r\n\r\n") {
            Some(pos) => pos,
            None => {
                if data.len() > self.max_header_size {
                    return Err(ServerError::HttpParse("Request head too large".to_string()));
                }
                return Ok(None);
            }
        };
        if headers_end > self.max_header_size {
            return Err(ServerError::HttpParse("Request head too large".to_string()));
        }

        let headers_part = str::from_utf8(&data[..headers_end])
            .map_err(|_| ServerError::HttpParse("Invalid UTF-8".to_string()))?;

        let mut lines = headers_part.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut head = Self::parse_request_line(request_line)?;

        for line in lines {
            if !line.is_empty() {
                head.headers.push(Self::parse_header(line)?);
            }
        }

        self.state = HttpParserState::Complete;
        Ok(Some((head, headers_end + 4)))
    }

    /// Parse a request line
    fn parse_request_line(line: &str) -> ServerResult<RequestHead> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(ServerError::HttpParse("Invalid request line".to_string()));
        }

        Ok(RequestHead {
            method: parts.first().map(|s| s.to_string()),
            target: parts.get(1).map(|s| s.to_string()),
            version: parts.get(2).unwrap_or(&"HTTP/1.0").to_string(),
            headers: Vec::new(),
        })
    }

    /// Parse a header line
    fn parse_header(line: &str) -> ServerResult<(String, String)> {
        if let Some(colon_idx) = line.find(':') {
            let key = line[..colon_idx].trim().to_lowercase();
            let value = line[colon_idx + 1..].trim().to_string();
            Ok((key, value))
        } else {
            Err(ServerError::HttpParse("Invalid header".to_string()))
        }
    }

    /// Check if the parser has completed parsing a head
    pub fn is_complete(&self) -> bool {
        self.state == HttpParserState::Complete
    }

    /// Reset the parser for a new request
    pub fn reset(&mut self) {
        self.state = HttpParserState::RequestLine;
    }
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    DataEnd,
    Trailer,
    Done,
}

/// Decoder for the chunked transfer coding
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
}

const MAX_CHUNK_LINE: usize = 4096;

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size,
        }
    }

    /// Consume as much of `input` as possible, appending payload bytes to
    /// `out`. Returns `true` once the terminating chunk and trailers have
    /// been read.
    pub fn decode(&mut self, input: &mut BytesMut, out: &mut Vec<u8>) -> ServerResult<bool> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let line = match take_line(input)? {
                        Some(line) => line,
                        None => return Ok(false),
                    };
                    let size_part = line.split(';').next().unwrap_or_default().trim();
                    let size = usize::from_str_radix(size_part, 16).map_err(|_| {
                        ServerError::HttpParse(format!("Invalid chunk size: {}", size_part))
                    })?;
                    self.state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if input.is_empty() {
                        return Ok(false);
                    }
                    let take = remaining.min(input.len());
                    out.extend_from_slice(&input[..take]);
                    input.advance(take);
                    self.state = if take == remaining {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(remaining - take)
                    };
                }
                ChunkState::DataEnd => {
                    if input.len() < 2 {
                        return Ok(false);
                    }
                    if &input[..2] != b"\r\n" {
                        return Err(ServerError::HttpParse(
                            "Missing CRLF after chunk data".to_string(),
                        ));
                    }
                    input.advance(2);
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let line = match take_line(input)? {
                        Some(line) => line,
                        None => return Ok(false),
                    };
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => return Ok(true),
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Split one CRLF-terminated line off the front of `input`.
fn take_line(input: &mut BytesMut) -> ServerResult<Option<String>> {
    match find(input, b"\r\n") {
        Some(pos) => {
            let line = input.split_to(pos + 2);
            let text = str::from_utf8(&line[..pos])
                .map_err(|_| ServerError::HttpParse("Invalid UTF-8 in chunk line".to_string()))?;
            Ok(Some(text.to_string()))
        }
        None if input.len() > MAX_CHUNK_LINE => {
            Err(ServerError::HttpParse("Chunk line too long".to_string()))
        }
        None => Ok(None),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Status line and headers of an outgoing response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: Vec::new(),
        }
    }

    /// Set a header, replacing any existing one with the same name
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Get a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Serialize the status line and headers, terminated by a blank line
    pub fn serialize(&self, writer: &mut Vec<u8>) -> ServerResult<()> {
        let reason = self
            .reason
            .as_deref()
            .unwrap_or_else(|| reason_phrase(self.status));

        // Write status line
        write!(writer, "HTTP/1.1 {} {}\r\n", self.status, reason)?;

        // Write headers
        for (name, value) in &self.headers {
            write!(writer, "{}: {}\r\n", name, value)?;
        }

        // Write blank line
        write!(writer, "\r\n")?;

        Ok(())
    }
}
