use crate::config::ServerConfig;
use crate::error::ErrorReason;
use crate::logger::{log_none, SharedLogger};
use crate::request::{CompleteRequest, ObservedRequest};
use crate::response::Responder;
use crate::router::{gone, ErrorObserver, HandlerFn, HandlerResult};
use std::fmt;
use std::sync::Arc;

/// Body size cap, in characters, when neither route nor options set one
pub const MAX_BODY_SIZE: usize = 40_000;

/// Dispatch policy shared by every request on a listener
#[derive(Clone)]
pub struct DispatchOptions {
    pub logger: SharedLogger,

    /// Handler used when no route matches; without one the answer is 404
    pub default_handler: Option<HandlerFn>,

    /// Headers applied to every response before the handler's own
    pub preset_headers: Vec<(String, String)>,

    /// Answer every routed OPTIONS request with a bare 200
    pub auto_handle_options: bool,

    pub max_body_size: usize,

    /// Global method filter; `None` lets every method through
    pub allowed_methods: Option<Vec<String>>,

    /// Turn handler errors and panics into a 500
    pub catch_to_500: bool,

    pub error_observer: Option<ErrorObserver>,
}

impl fmt::Debug for DispatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchOptions")
            .field("default_handler", &self.default_handler.as_ref().map(|_| "<function>"))
            .field("preset_headers", &self.preset_headers)
            .field("auto_handle_options", &self.auto_handle_options)
            .field("max_body_size", &self.max_body_size)
            .field("allowed_methods", &self.allowed_methods)
            .field("catch_to_500", &self.catch_to_500)
            .field("error_observer", &self.error_observer.as_ref().map(|_| "<function>"))
            .finish()
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            logger: log_none(),
            default_handler: None,
            preset_headers: Vec::new(),
            auto_handle_options: false,
            max_body_size: MAX_BODY_SIZE,
            allowed_methods: None,
            catch_to_500: false,
            error_observer: None,
        }
    }
}

impl DispatchOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Permissive CORS header, automatic OPTIONS, GET/POST/OPTIONS only
    pub fn sane() -> Self {
        Self::new()
            .with_header("Access-Control-Allow-Origin", "*")
            .with_auto_handle_options(true)
            .with_allowed_methods(["GET", "POST", "OPTIONS"])
    }

    /// [`sane`](Self::sane), answering unknown targets with 410 Gone
    pub fn sane_gone_index() -> Self {
        Self::sane().with_default_handler(gone)
    }

    /// [`sane`](Self::sane) for read-only APIs: GET/OPTIONS only
    pub fn sane_get_api() -> Self {
        Self::sane().with_allowed_methods(["GET", "OPTIONS"])
    }

    /// Lift the dispatch policy out of a server configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            preset_headers: config
                .preset_headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            auto_handle_options: config.auto_handle_options,
            max_body_size: config.max_body_size,
            allowed_methods: config.allowed_methods.clone(),
            catch_to_500: config.catch_to_500,
            ..Self::default()
        }
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_default_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CompleteRequest, &Responder) -> HandlerResult + Send + Sync + 'static,
    {
        self.default_handler = Some(Arc::new(handler));
        self
    }

    /// Add a preset response header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match self
            .preset_headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.preset_headers.push((name.to_string(), value.to_string())),
        }
        self
    }

    pub fn with_auto_handle_options(mut self, enabled: bool) -> Self {
        self.auto_handle_options = enabled;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn with_allowed_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_catch_to_500(mut self, enabled: bool) -> Self {
        self.catch_to_500 = enabled;
        self
    }

    pub fn with_error_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(ErrorReason, ObservedRequest<'_>, &Responder, &str) + Send + Sync + 'static,
    {
        self.error_observer = Some(Arc::new(observer));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = DispatchOptions::default();
        assert_eq!(options.max_body_size, MAX_BODY_SIZE);
        assert!(!options.auto_handle_options);
        assert!(!options.catch_to_500);
        assert!(options.allowed_methods.is_none());
        assert!(options.default_handler.is_none());
    }

    #[test]
    fn test_presets() {
        let sane = DispatchOptions::sane();
        assert!(sane.auto_handle_options);
        assert_eq!(
            sane.preset_headers,
            vec![("Access-Control-Allow-Origin".to_string(), "*".to_string())]
        );
        assert_eq!(
            sane.allowed_methods.as_deref(),
            Some(&["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()][..])
        );

        assert!(DispatchOptions::sane_gone_index().default_handler.is_some());
        assert_eq!(
            DispatchOptions::sane_get_api().allowed_methods,
            Some(vec!["GET".to_string(), "OPTIONS".to_string()])
        );
    }

    #[test]
    fn test_from_config() {
        let config = ServerConfig::new()
            .with_max_body_size(10)
            .with_allowed_methods(vec!["GET".to_string()]);
        let options = DispatchOptions::from_config(&config);
        assert_eq!(options.max_body_size, 10);
        assert_eq!(options.allowed_methods, Some(vec!["GET".to_string()]));
    }
}
