use crate::error::{ServerError, ServerResult};
use crate::options::MAX_BODY_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Network configuration
    pub listen_address: String,
    pub port: u16,
    pub backlog_size: u32,

    // Connection settings
    pub connection_timeout: Duration,

    // Thread configuration
    pub worker_threads: usize,

    // HTTP configuration
    pub max_header_size: usize,

    // Dispatch policy
    pub max_body_size: usize,
    pub auto_handle_options: bool,
    pub allowed_methods: Option<Vec<String>>,
    pub catch_to_500: bool,
    pub preset_headers: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            port: 8080,
            backlog_size: 1024,

            connection_timeout: Duration::from_secs(30),

            worker_threads: num_cpus::get(),

            max_header_size: 16 * 1024, // 16 KB

            max_body_size: MAX_BODY_SIZE,
            auto_handle_options: false,
            allowed_methods: None,
            catch_to_500: false,
            preset_headers: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address and port to listen on
    pub fn with_address(mut self, address: &str, port: u16) -> Self {
        self.listen_address = address.to_string();
        self.port = port;
        self
    }

    /// Set the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the global body size cap, in characters
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Set the global method filter
    pub fn with_allowed_methods(mut self, methods: Vec<String>) -> Self {
        self.allowed_methods = Some(methods);
        self
    }

    /// Add a header sent with every response
    pub fn with_preset_header(mut self, name: &str, value: &str) -> Self {
        self.preset_headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Get the full address string (address:port)
    pub fn socket_address(&self) -> String {
        if self.listen_address.contains(':') {
            format!("[{}]:{}", self.listen_address, self.port)
        } else {
            format!("{}:{}", self.listen_address, self.port)
        }
    }

    /// Check the values make sense together
    pub fn validate(&self) -> ServerResult<()> {
        if self.worker_threads == 0 {
            return Err(ServerError::Config("worker_threads must be at least 1".to_string()));
        }
        if self.max_header_size == 0 {
            return Err(ServerError::Config("max_header_size must be at least 1".to_string()));
        }
        if self.connection_timeout.is_zero() {
            return Err(ServerError::Config("connection_timeout must not be zero".to_string()));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_json_file<P: AsRef<Path>>(&self, path: P) -> ServerResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
