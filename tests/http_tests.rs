use bytes::BytesMut;
use http_dispatch::http::{
    reason_phrase, BodyFraming, ChunkedDecoder, HttpParser, ResponseHead, Status,
};
use http_dispatch::RawRequest;

#[test]
fn test_http_parser_simple_get() {
    let mut parser = HttpParser::new();
    let data = b"GET /index.html?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n";

    let (head, consumed) = parser.parse(data).unwrap().unwrap();
    assert!(parser.is_complete());
    assert_eq!(consumed, data.len());
    assert_eq!(head.method.as_deref(), Some("GET"));
    assert_eq!(head.target.as_deref(), Some("/index.html?x=1"));
    assert_eq!(head.version, "HTTP/1.1");
    assert_eq!(head.header("HOST"), Some("example.com"));
    assert_eq!(head.body_framing().unwrap(), BodyFraming::Empty);
}

#[test]
fn test_http_parser_leaves_body_unconsumed() {
    let mut parser = HttpParser::new();
    let data = b"POST /submit HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 15\r\n\r\n{\"name\":\"test\"}";

    let (head, consumed) = parser.parse(data).unwrap().unwrap();
    assert_eq!(&data[consumed..], b"{\"name\":\"test\"}");
    assert_eq!(head.header("content-type"), Some("application/json"));
    assert_eq!(head.body_framing().unwrap(), BodyFraming::Length(15));
}

#[test]
fn test_http_parser_multiple_headers() {
    let mut parser = HttpParser::new();
    let data = b"GET /api/data HTTP/1.1\r\n\
                 Host: example.com\r\n\
                 User-Agent: Test Client\r\n\
                 Accept: application/json\r\n\
                 Cookie: session=abc123\r\n\
                 \r\n";

    let (head, _) = parser.parse(data).unwrap().unwrap();
    assert_eq!(head.headers.len(), 4);
    assert_eq!(head.headers[1], ("user-agent".to_string(), "Test Client".to_string()));
    assert_eq!(head.header("Cookie"), Some("session=abc123"));
}

#[test]
fn test_http_parser_reset() {
    let mut parser = HttpParser::new();

    parser.parse(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
    assert!(parser.is_complete());

    parser.reset();
    assert!(!parser.is_complete());

    let (head, _) = parser
        .parse(b"POST / HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .unwrap()
        .unwrap();
    assert_eq!(head.method.as_deref(), Some("POST"));
}

#[test]
fn test_incomplete_request_line() {
    let mut parser = HttpParser::new();
    let (head, _) = parser.parse(b"GET\r\nHost: a\r\n\r\n").unwrap().unwrap();
    assert_eq!(head.method.as_deref(), Some("GET"));
    assert_eq!(head.target, None);

    let raw = RawRequest::from(head);
    assert_eq!(raw.url, None);
    assert_eq!(raw.header("host"), Some("a"));

    assert!(HttpParser::new().parse(b"\r\n\r\n").is_err());
    assert!(HttpParser::new().parse(b"GET / HTTP/1.1 extra\r\n\r\n").is_err());
}

#[test]
fn test_body_framing() {
    let mut parser = HttpParser::new();
    let (head, _) = parser
        .parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\nContent-Length: 3\r\n\r\n")
        .unwrap()
        .unwrap();
    assert_eq!(head.body_framing().unwrap(), BodyFraming::Chunked);

    let mut parser = HttpParser::new();
    let (head, _) = parser
        .parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n")
        .unwrap()
        .unwrap();
    assert!(head.body_framing().is_err());

    let mut parser = HttpParser::new();
    let (head, _) = parser
        .parse(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n")
        .unwrap()
        .unwrap();
    assert!(head.body_framing().is_err());
}

#[test]
fn test_chunked_decoder_with_extensions_and_trailers() {
    let mut decoder = ChunkedDecoder::new();
    let mut out = Vec::new();
    let mut input = BytesMut::from(&b"3;name=value\r\nabc\r\n0\r\nX-Trailer: 1\r\n\r\nleftover"[..]);

    assert!(decoder.decode(&mut input, &mut out).unwrap());
    assert_eq!(out, b"abc");
    assert_eq!(&input[..], b"leftover");
}

#[test]
fn test_chunked_decoder_rejects_garbage() {
    let mut decoder = ChunkedDecoder::new();
    let mut out = Vec::new();
    let mut input = BytesMut::from(&b"zz\r\n"[..]);
    assert!(decoder.decode(&mut input, &mut out).is_err());

    let mut decoder = ChunkedDecoder::new();
    let mut input = BytesMut::from(&b"2\r\nabXY"[..]);
    assert!(decoder.decode(&mut input, &mut out).is_err());
}

#[test]
fn test_response_head_serialization() {
    let mut head = ResponseHead::new(Status::Ok.code());
    head.set_header("Content-Type", "text/plain");
    head.set_header("content-type", "text/html");
    head.set_header("Content-Length", "13");

    let mut buffer = Vec::new();
    head.serialize(&mut buffer).unwrap();

    let text = String::from_utf8_lossy(&buffer);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Type: text/html\r\n"));
    assert!(!text.contains("text/plain"));
    assert!(text.ends_with("Content-Length: 13\r\n\r\n"));
}

#[test]
fn test_custom_reason_and_unknown_code() {
    let mut head = ResponseHead::new(400);
    head.reason = Some("MISSING PARAM".to_string());
    let mut buffer = Vec::new();
    head.serialize(&mut buffer).unwrap();
    assert!(buffer.starts_with(b"HTTP/1.1 400 MISSING PARAM\r\n"));

    let mut buffer = Vec::new();
    ResponseHead::new(299).serialize(&mut buffer).unwrap();
    assert!(buffer.starts_with(b"HTTP/1.1 299 Unknown\r\n"));
}

#[test]
fn test_different_status_codes() {
    let statuses = vec![
        (Status::Ok, 200, "OK"),
        (Status::BadRequest, 400, "Bad Request"),
        (Status::NotFound, 404, "Not Found"),
        (Status::MethodNotAllowed, 405, "Method Not Allowed"),
        (Status::Gone, 410, "Gone"),
        (Status::InternalServerError, 500, "Internal Server Error"),
    ];

    for (status, code, text) in statuses {
        assert_eq!(status.code(), code);
        assert_eq!(reason_phrase(code), text);
        assert_eq!(Status::from_code(code), Some(status));
    }
}
