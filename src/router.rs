use crate::error::{ErrorReason, HandlerError};
use crate::http::Status;
use crate::request::{CompleteRequest, ObservedRequest};
use crate::response::Responder;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future handed back by a handler that finishes its work asynchronously.
pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// What a handler did with the exchange.
pub enum Outcome {
    /// The handler has finished; it has already used the responder or
    /// deliberately left the response to someone holding a clone of it.
    Done,
    /// The handler continues in a future. The dispatcher spawns it and does
    /// not wait for it.
    Pending(HandlerFuture),
}

impl Outcome {
    /// Wrap a future into [`Outcome::Pending`]
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Outcome::Pending(Box::pin(future))
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done => f.write_str("Done"),
            Outcome::Pending(_) => f.write_str("Pending(<future>)"),
        }
    }
}

pub type HandlerResult = Result<Outcome, HandlerError>;

/// A handler function for processing a completed request
pub type HandlerFn = Arc<dyn Fn(&CompleteRequest, &Responder) -> HandlerResult + Send + Sync>;

/// Callback notified of every classified dispatch error.
///
/// Observers are advisory. The dispatcher still sends its generic error
/// status afterwards if the response is untouched.
pub type ErrorObserver =
    Arc<dyn Fn(ErrorReason, ObservedRequest<'_>, &Responder, &str) + Send + Sync>;

/// A route entry in the route table
#[derive(Clone)]
pub struct Route {
    /// Prefix (or whole target, for exact routes) matched against the raw request target
    prefix: String,

    /// The handler function for this route
    handler: HandlerFn,

    /// Methods this route answers; `None` means all
    allowed_methods: Option<Vec<String>>,

    /// Body size cap in characters, overriding the global one
    max_body_size: Option<usize>,

    exact_match: bool,

    error_observer: Option<ErrorObserver>,
}

// Custom Debug implementation for Route since handlers can't be automatically derived
impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("prefix", &self.prefix)
            .field("handler", &"<function>")
            .field("allowed_methods", &self.allowed_methods)
            .field("max_body_size", &self.max_body_size)
            .field("exact_match", &self.exact_match)
            .field("error_observer", &self.error_observer.as_ref().map(|_| "<function>"))
            .finish()
    }
}

impl Route {
    /// Create a prefix route answering every method
    pub fn new<F>(prefix: &str, handler: F) -> Self
    where
        F: Fn(&CompleteRequest, &Responder) -> HandlerResult + Send + Sync + 'static,
    {
        Self::from_handler(prefix, Arc::new(handler))
    }

    /// Create a route from an already shared handler
    pub fn from_handler(prefix: &str, handler: HandlerFn) -> Self {
        Self {
            prefix: prefix.to_string(),
            handler,
            allowed_methods: None,
            max_body_size: None,
            exact_match: false,
            error_observer: None,
        }
    }

    /// Restrict the route to the given methods
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Override the global body size cap for this route
    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = Some(max_body_size);
        self
    }

    /// Require the request target to equal the prefix
    pub fn exact(self) -> Self {
        self.exact_match(true)
    }

    pub fn exact_match(mut self, exact_match: bool) -> Self {
        self.exact_match = exact_match;
        self
    }

    /// Set the observer notified of errors on this route
    pub fn on_error<F>(mut self, observer: F) -> Self
    where
        F: Fn(ErrorReason, ObservedRequest<'_>, &Responder, &str) + Send + Sync + 'static,
    {
        self.error_observer = Some(Arc::new(observer));
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn handler(&self) -> &HandlerFn {
        &self.handler
    }

    pub fn allowed_methods(&self) -> Option<&[String]> {
        self.allowed_methods.as_deref()
    }

    pub fn body_limit(&self) -> Option<usize> {
        self.max_body_size
    }

    pub fn is_exact(&self) -> bool {
        self.exact_match
    }

    pub fn error_observer(&self) -> Option<&ErrorObserver> {
        self.error_observer.as_ref()
    }

    /// Check if a request target falls under this route
    pub fn matches_path(&self, url: &str) -> bool {
        if self.exact_match {
            url == self.prefix
        } else {
            url.starts_with(&self.prefix)
        }
    }

    /// Check if the route answers `method`
    pub fn allows_method(&self, method: &str) -> bool {
        match &self.allowed_methods {
            Some(methods) => methods.iter().any(|m| m == method),
            None => true,
        }
    }
}

/// Ordered route table; the first matching entry wins.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    /// The routes registered with this table, in registration order
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Create an empty route table
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Append a route after all existing ones
    pub fn add(&mut self, route: Route) -> &mut Self {
        self.routes.push(Arc::new(route));
        self
    }

    /// Append a route, builder style
    pub fn with(mut self, route: Route) -> Self {
        self.add(route);
        self
    }

    /// Select the route for a request target and method.
    ///
    /// Entries are tried in registration order. An entry whose method set
    /// excludes `method` is skipped and the scan goes on.
    pub fn select(&self, url: &str, method: &str) -> Option<&Arc<Route>> {
        self.routes
            .iter()
            .find(|route| route.matches_path(url) && route.allows_method(method))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }
}

impl FromIterator<Route> for RouteTable {
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().map(Arc::new).collect(),
        }
    }
}

impl From<Vec<Route>> for RouteTable {
    fn from(routes: Vec<Route>) -> Self {
        routes.into_iter().collect()
    }
}

/// Handler that answers 410 Gone with a long-lived cache header.
pub fn gone(_req: &CompleteRequest, resp: &Responder) -> HandlerResult {
    resp.send(
        Status::Gone.code(),
        None,
        &[("Cache-Control", "max-age=99999")],
        None,
    );
    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_req: &CompleteRequest, _resp: &Responder) -> HandlerResult {
        Ok(Outcome::Done)
    }

    #[test]
    fn test_first_registered_wins() {
        let table: RouteTable = vec![Route::new("/api", noop), Route::new("/api/users", noop)].into();

        let route = table.select("/api/users", "GET").unwrap();
        assert_eq!(route.prefix(), "/api");
    }

    #[test]
    fn test_method_filter_continues_scanning() {
        let table = RouteTable::new()
            .with(Route::new("/data", noop).methods(["GET"]).max_body_size(5))
            .with(Route::new("/data", noop));

        let get = table.select("/data", "GET").unwrap();
        assert_eq!(get.body_limit(), Some(5));

        let post = table.select("/data", "POST").unwrap();
        assert_eq!(post.body_limit(), None);
    }

    #[test]
    fn test_exact_match() {
        let table = RouteTable::new().with(Route::new("/exact", noop).exact());

        assert!(table.select("/exact", "GET").is_some());
        assert!(table.select("/exactish", "GET").is_none());
        assert!(table.select("/exact?x=1", "GET").is_none());
    }

    #[test]
    fn test_prefix_includes_query() {
        let table = RouteTable::new().with(Route::new("/do?", noop).methods(["GET", "POST"]));

        assert!(table.select("/do?a=nothing", "GET").is_some());
        assert!(table.select("/do", "GET").is_none());
        assert!(table.select("/do?a=1", "PUT").is_none());
    }

    #[test]
    fn test_empty_table() {
        let table = RouteTable::new();
        assert!(table.is_empty());
        assert!(table.select("/", "GET").is_none());
    }
}
