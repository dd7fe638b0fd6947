use crate::accumulator::{Exchange, Flow};
use crate::dispatch::Dispatcher;
use crate::error::{ServerError, ServerResult};
use crate::http::{BodyFraming, ChunkedDecoder, HttpParser, RequestHead, ResponseHead, Status};
use crate::request::RawRequest;
use crate::response::ResponseChannel;
use bytes::{Buf, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const READ_CHUNK: usize = 8 * 1024;
const SERVER_NAME: &str = concat!("http-dispatch/", env!("CARGO_PKG_VERSION"));

/// Represents the current state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Reading,
    Processing,
    Writing,
    Closed,
}

/// What a [`StreamChannel`] hands back to its connection
#[derive(Debug)]
pub enum Reply {
    /// A fully serialized response
    Complete(Vec<u8>),
    Destroy,
}

/// [`ResponseChannel`] for a TCP connection.
///
/// The response is buffered and passed to the connection task in one piece
/// when it ends, so handlers holding the responder never block on the
/// socket. Every response carries `Content-Length` and `Connection: close`.
#[derive(Debug)]
pub struct StreamChannel {
    head: ResponseHead,
    head_written: bool,
    body: Vec<u8>,
    ended: bool,
    destroyed: bool,
    head_only: bool,
    replies: mpsc::UnboundedSender<Reply>,
}

impl StreamChannel {
    /// `head_only` suppresses the body, for responses to HEAD requests
    pub fn new(replies: mpsc::UnboundedSender<Reply>, head_only: bool) -> Self {
        Self {
            head: ResponseHead::new(Status::Ok.code()),
            head_written: false,
            body: Vec::new(),
            ended: false,
            destroyed: false,
            head_only,
            replies,
        }
    }

    fn serialize(&mut self) -> ServerResult<Vec<u8>> {
        self.head
            .set_header("Content-Length", &self.body.len().to_string());
        self.head.set_header("Connection", "close");
        if self.head.header("server").is_none() {
            self.head.set_header("Server", SERVER_NAME);
        }

        let mut out = Vec::with_capacity(256 + self.body.len());
        self.head.serialize(&mut out)?;
        if !self.head_only {
            out.extend_from_slice(&self.body);
        }
        Ok(out)
    }
}

impl ResponseChannel for StreamChannel {
    fn set_header(&mut self, name: &str, value: &str) {
        if !self.head_written {
            self.head.set_header(name, value);
        }
    }

    fn write_head(&mut self, status: u16, reason: Option<&str>) {
        if self.head_written {
            return;
        }
        self.head.status = status;
        self.head.reason = reason.map(str::to_string);
        self.head_written = true;
    }

    fn write(&mut self, chunk: &[u8]) -> bool {
        if self.ended || self.destroyed {
            return false;
        }
        self.head_written = true;
        self.body.extend_from_slice(chunk);
        true
    }

    fn end(&mut self) {
        if self.ended || self.destroyed {
            return;
        }
        self.head_written = true;
        self.ended = true;

        let reply = match self.serialize() {
            Ok(bytes) => Reply::Complete(bytes),
            Err(err) => {
                log::error!("serializing response failed: {}", err);
                Reply::Destroy
            }
        };
        // The connection may already be gone
        let _ = self.replies.send(reply);
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let _ = self.replies.send(Reply::Destroy);
    }

    fn headers_sent(&self) -> bool {
        self.head_written
    }

    fn is_ended(&self) -> bool {
        self.ended || self.destroyed
    }
}

/// One accepted TCP connection, carrying a single request.
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: usize,
    state: ConnectionState,
    buffer: BytesMut,
    timeout: Duration,
    max_header_size: usize,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, id: usize) -> Self {
        Self {
            stream,
            peer_addr,
            id,
            state: ConnectionState::New,
            buffer: BytesMut::with_capacity(16 * 1024),
            timeout: Duration::from_secs(30),
            max_header_size: 16 * 1024,
        }
    }

    /// Set the idle timeout applied to every read and to the wait for the
    /// handler's response
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_header_size(mut self, max_header_size: usize) -> Self {
        self.max_header_size = max_header_size;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Read one request, hand it to `dispatcher`, write whatever response
    /// comes back and close.
    pub async fn run(mut self, dispatcher: Arc<Dispatcher>) -> ServerResult<()> {
        self.state = ConnectionState::Reading;
        let head = match self.read_head().await {
            Ok(Some(head)) => head,
            Ok(None) => {
                log::debug!("connection {} from {} closed before a request", self.id, self.peer_addr);
                return self.close().await;
            }
            Err(err) => return self.reject(err).await,
        };
        let framing = match head.body_framing() {
            Ok(framing) => framing,
            Err(err) => return self.reject(err).await,
        };
        if head
            .header("expect")
            .map_or(false, |value| value.eq_ignore_ascii_case("100-continue"))
        {
            self.stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
        }

        let (sender, mut replies) = mpsc::unbounded_channel();
        let head_only = head.method.as_deref() == Some("HEAD");
        let channel = StreamChannel::new(sender, head_only);

        self.state = ConnectionState::Processing;
        if let Some(mut exchange) = dispatcher.handle(RawRequest::from(head), Box::new(channel)) {
            self.feed(&mut exchange, framing).await;
            exchange.on_close();
        }

        self.state = ConnectionState::Writing;
        self.write_reply(&mut replies).await?;
        self.close().await
    }

    async fn read_head(&mut self) -> ServerResult<Option<RequestHead>> {
        let mut parser = HttpParser::with_max_header_size(self.max_header_size);
        loop {
            if !self.buffer.is_empty() {
                if let Some((head, consumed)) = parser.parse(&self.buffer)? {
                    self.buffer.advance(consumed);
                    return Ok(Some(head));
                }
            }
            if self.read_more().await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ServerError::Connection(
                    "peer closed in the middle of the request head".to_string(),
                ));
            }
        }
    }

    /// Stream the body into `exchange` according to `framing`, then signal
    /// how it ended.
    async fn feed(&mut self, exchange: &mut Exchange, framing: BodyFraming) {
        let mut remaining = match framing {
            BodyFraming::Length(length) => length,
            _ => 0,
        };
        let mut decoder = ChunkedDecoder::new();
        let mut decoded = Vec::new();

        loop {
            let complete = match framing {
                BodyFraming::Empty => true,
                BodyFraming::Length(_) => {
                    let take = remaining.min(self.buffer.len());
                    if take > 0 {
                        let chunk = self.buffer.split_to(take);
                        remaining -= take;
                        if exchange.on_data(&chunk) == Flow::Destroy {
                            return;
                        }
                    }
                    remaining == 0
                }
                BodyFraming::Chunked => match decoder.decode(&mut self.buffer, &mut decoded) {
                    Ok(done) => {
                        if !decoded.is_empty() {
                            let flow = exchange.on_data(&decoded);
                            decoded.clear();
                            if flow == Flow::Destroy {
                                return;
                            }
                        }
                        done
                    }
                    Err(err) => {
                        exchange.on_error(&err);
                        return;
                    }
                },
            };

            if complete {
                if let Err(err) = exchange.on_end() {
                    log::error!("connection {}: handler failed: {}", self.id, err);
                }
                return;
            }

            match self.read_more().await {
                Ok(0) => {
                    exchange.on_aborted();
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    exchange.on_error(&err);
                    return;
                }
            }
        }
    }

    async fn read_more(&mut self) -> io::Result<usize> {
        if self.buffer.capacity() - self.buffer.len() < READ_CHUNK {
            self.buffer.reserve(READ_CHUNK);
        }
        match timeout(self.timeout, self.stream.read_buf(&mut self.buffer)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
        }
    }

    /// Wait for the response and put it on the wire.
    async fn write_reply(&mut self, replies: &mut mpsc::UnboundedReceiver<Reply>) -> ServerResult<()> {
        match timeout(self.timeout, replies.recv()).await {
            Ok(Some(Reply::Complete(bytes))) => {
                self.stream.write_all(&bytes).await?;
                self.stream.flush().await?;
            }
            Ok(Some(Reply::Destroy)) => {
                log::debug!("connection {} destroyed by the dispatcher", self.id);
            }
            Ok(None) => {
                log::debug!("connection {} closing without a response", self.id);
            }
            Err(_) => {
                log::warn!("connection {} timed out waiting for a response", self.id);
            }
        }
        Ok(())
    }

    /// Answer a request that never reached the dispatcher
    async fn reject(&mut self, err: ServerError) -> ServerResult<()> {
        log::info!("connection {} from {}: {}", self.id, self.peer_addr, err);
        if let ServerError::HttpParse(_) = err {
            let mut head = ResponseHead::new(Status::BadRequest.code());
            head.set_header("Content-Length", "0");
            head.set_header("Connection", "close");
            let mut out = Vec::new();
            head.serialize(&mut out)?;
            self.stream.write_all(&out).await?;
        }
        self.close().await
    }

    async fn close(&mut self) -> ServerResult<()> {
        self.state = ConnectionState::Closed;
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
