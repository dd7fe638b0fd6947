//! The composition entry point and per-request routing.
//!
//! [`compose`] attaches a [`Dispatcher`] to a [`Listener`]. For every request
//! the listener calls [`Dispatcher::handle`], which either rejects the
//! request straight away or returns the [`Exchange`] the listener streams
//! the body into.

use crate::accumulator::Exchange;
use crate::error::ErrorReason;
use crate::http::Status;
use crate::logger::SharedLogger;
use crate::options::DispatchOptions;
use crate::request::{CompleteRequest, ObservedRequest, RawRequest};
use crate::response::{ResponseChannel, Responder};
use crate::router::{ErrorObserver, Route, RouteTable};
use parking_lot::RwLock;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use url::Url;

/// Kind of listener a dispatcher is being composed onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Secure,
    /// Anything that cannot carry HTTP requests; composing onto it fails
    Unsupported,
}

impl Transport {
    pub fn scheme(self) -> Option<&'static str> {
        match self {
            Transport::Plain => Some("http://"),
            Transport::Secure => Some("https://"),
            Transport::Unsupported => None,
        }
    }
}

/// The address a listener ended up bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddress {
    Inet(SocketAddr),
    /// A pipe or socket-file binding
    Path(String),
}

/// A source of HTTP requests that a dispatcher can be attached to.
pub trait Listener {
    fn transport(&self) -> Transport;

    /// Take the dispatcher that will receive this listener's requests
    fn attach(&mut self, dispatcher: Arc<Dispatcher>);
}

/// Attach a dispatcher for `routes` to `listener`.
///
/// Returns `false`, without touching the listener, if the listener's
/// transport is not one HTTP can run on.
pub fn compose<L>(listener: &mut L, routes: RouteTable, options: DispatchOptions) -> bool
where
    L: Listener + ?Sized,
{
    let transport = listener.transport();
    let logger = options.logger.clone();
    let scheme = match transport.scheme() {
        Some(scheme) => scheme,
        None => {
            logger.error(format_args!("not a HTTP or HTTPS listener, refusing to compose"));
            return false;
        }
    };
    logger.debug(format_args!(
        "composing {} routes on a {} listener",
        routes.len(),
        if transport == Transport::Secure { "HTTPS" } else { "HTTP" }
    ));

    listener.attach(Arc::new(Dispatcher::new(scheme, routes, options)));
    true
}

/// Routes requests from one listener; immutable apart from the default base.
pub struct Dispatcher {
    scheme: &'static str,
    routes: RouteTable,
    indexer: Option<Arc<Route>>,
    pub(crate) logger: SharedLogger,
    auto_headers: Arc<[(String, String)]>,
    pub(crate) auto_handle_options: bool,
    max_body_size: usize,
    method_filter: Option<Vec<String>>,
    pub(crate) catch_to_500: bool,
    error_observer: Option<ErrorObserver>,
    default_base: RwLock<String>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("scheme", &self.scheme)
            .field("routes", &self.routes)
            .field("max_body_size", &self.max_body_size)
            .field("method_filter", &self.method_filter)
            .field("catch_to_500", &self.catch_to_500)
            .finish()
    }
}

impl Dispatcher {
    /// Build a dispatcher for requests arriving with `scheme` (`"http://"`
    /// or `"https://"`).
    pub fn new(scheme: &'static str, routes: RouteTable, options: DispatchOptions) -> Self {
        let indexer = options
            .default_handler
            .map(|handler| Arc::new(Route::from_handler("<<indexer>>", handler)));

        Self {
            scheme,
            routes,
            indexer,
            logger: options.logger,
            auto_headers: options.preset_headers.into(),
            auto_handle_options: options.auto_handle_options,
            max_body_size: options.max_body_size,
            method_filter: options.allowed_methods,
            catch_to_500: options.catch_to_500,
            error_observer: options.error_observer,
            default_base: RwLock::new(format!("{}unknown:0", scheme)),
        }
    }

    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Base used for requests that arrive without a usable `Host` header
    pub fn default_base(&self) -> String {
        self.default_base.read().clone()
    }

    /// Record where the listener is bound. Called once the listener is up.
    pub fn listening(&self, address: Option<BoundAddress>) {
        let base = match address {
            Some(BoundAddress::Inet(addr)) => format!("{}{}", self.scheme, addr),
            Some(BoundAddress::Path(path)) => {
                self.logger.error(format_args!(
                    "listener bound to path {}, absolute URLs may not parse",
                    path
                ));
                format!("{}{}", self.scheme, path)
            }
            None => {
                self.logger.error(format_args!(
                    "listener address unknown, absolute URLs fall back to {}",
                    self.default_base()
                ));
                return;
            }
        };
        self.logger.mark(format_args!("listening, default base for urls is {}", base));
        *self.default_base.write() = base;
    }

    /// Start dispatching one request.
    ///
    /// Returns `None` when the request was settled on the spot (rejected or
    /// dropped); otherwise the exchange to stream the body into.
    pub fn handle(
        self: &Arc<Self>,
        raw: RawRequest,
        channel: Box<dyn ResponseChannel>,
    ) -> Option<Exchange> {
        metrics::increment_counter!("dispatch_requests_total");
        let responder = Responder::new(
            channel,
            self.logger.clone(),
            self.auto_headers.clone(),
            raw.url.as_deref(),
        );

        let (method, url) = match (raw.method.as_deref(), raw.url.as_deref()) {
            (Some(method), Some(url)) => (method.to_string(), url.to_string()),
            _ => {
                let msg = "request arrived without a url or method";
                self.logger.error(format_args!("{}", msg));
                self.report(ErrorReason::NoUrl, None, ObservedRequest::Raw(&raw), &responder, msg);
                responder.destroy();
                return None;
            }
        };

        if let Some(filter) = &self.method_filter {
            if !filter.iter().any(|allowed| *allowed == method) {
                let msg = format!("{} to {} is not allowed by the method filter", method, url);
                self.logger.info(format_args!("{}", msg));
                self.report(ErrorReason::BadMethod, None, ObservedRequest::Raw(&raw), &responder, &msg);
                responder.indicate_error_if_possible(Status::MethodNotAllowed.code());
                return None;
            }
        }

        let route = match self.routes.select(&url, &method) {
            Some(route) => route.clone(),
            None => match &self.indexer {
                Some(indexer) => {
                    self.logger.info(format_args!(
                        "{} to {} not found in routes, indexing..",
                        method, url
                    ));
                    indexer.clone()
                }
                None => {
                    let msg = format!("{} to {} not found in routes", method, url);
                    self.logger.info(format_args!("{}", msg));
                    self.report(ErrorReason::NotFound, None, ObservedRequest::Raw(&raw), &responder, &msg);
                    responder.indicate_error_if_possible(Status::NotFound.code());
                    return None;
                }
            },
        };

        responder.set_route(route.clone());
        let max_body_size = route.body_limit().unwrap_or(self.max_body_size);

        self.logger.debug(format_args!("{} to {} data collection starts", method, url));
        let request = CompleteRequest::new(url, method, raw.headers, route);
        Some(Exchange::new(self.clone(), request, responder, max_body_size))
    }

    /// Build the absolute URL for a completed request
    pub(crate) fn resolve_url(&self, request: &CompleteRequest) -> Result<Url, url::ParseError> {
        let host = request.header("host").map(str::trim).unwrap_or_default();
        let full = if host.is_empty() {
            format!("{}{}", self.default_base(), request.url())
        } else {
            format!("{}{}{}", self.scheme, host, request.url())
        };
        Url::parse(&full)
    }

    /// Tell observers about a classified error: the global observer first,
    /// then the route's own.
    pub(crate) fn report(
        &self,
        reason: ErrorReason,
        route: Option<&Route>,
        request: ObservedRequest<'_>,
        responder: &Responder,
        message: &str,
    ) {
        metrics::increment_counter!("dispatch_errors_total", "reason" => reason.as_str());
        if let Some(observer) = &self.error_observer {
            observer(reason, request, responder, message);
        }
        if let Some(observer) = route.and_then(Route::error_observer) {
            observer(reason, request, responder, message);
        }
    }
}
