pub mod acceptor;
pub mod accumulator;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod logger;
pub mod options;
pub mod request;
pub mod response;
pub mod router;
pub mod server;

/// Re-exports of common components for easier access
pub use accumulator::{Exchange, ExchangeState, Flow};
pub use config::ServerConfig;
pub use dispatch::{compose, BoundAddress, Dispatcher, Listener, Transport};
pub use error::{ErrorReason, HandlerError, ServerError, ServerResult};
pub use http::Status;
pub use logger::{log_all, log_none, Logger, PassThroughLogger, SharedLogger, SilentLogger};
pub use options::{DispatchOptions, MAX_BODY_SIZE};
pub use request::{CompleteRequest, ObservedRequest, RawRequest};
pub use response::{MemoryChannel, RecordedResponse, Responder, ResponseChannel, JSON_CONTENT_TYPE};
pub use router::{gone, ErrorObserver, HandlerFn, HandlerFuture, HandlerResult, Outcome, Route, RouteTable};
pub use server::HttpServer;
