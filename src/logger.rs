//! Logger capability handed to the dispatcher.
//!
//! The dispatcher never reaches for a global logger. It is given a
//! [`SharedLogger`] at composition time and writes every lifecycle message
//! through it.

use log::Level;
use std::fmt;
use std::sync::Arc;

/// Sink for dispatcher log messages.
///
/// `mark` is for milestones that should stand out regardless of verbosity,
/// such as a server starting or stopping.
pub trait Logger: Send + Sync {
    fn debug(&self, args: fmt::Arguments<'_>);
    fn info(&self, args: fmt::Arguments<'_>);
    fn warn(&self, args: fmt::Arguments<'_>);
    fn error(&self, args: fmt::Arguments<'_>);
    fn mark(&self, args: fmt::Arguments<'_>);
}

pub type SharedLogger = Arc<dyn Logger>;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentLogger;

impl Logger for SilentLogger {
    fn debug(&self, _args: fmt::Arguments<'_>) {}
    fn info(&self, _args: fmt::Arguments<'_>) {}
    fn warn(&self, _args: fmt::Arguments<'_>) {}
    fn error(&self, _args: fmt::Arguments<'_>) {}
    fn mark(&self, _args: fmt::Arguments<'_>) {}
}

/// Forwards to the `log` facade.
#[derive(Debug, Clone)]
pub struct PassThroughLogger {
    target: &'static str,
    mark_target: &'static str,
}

impl PassThroughLogger {
    pub fn new() -> Self {
        Self::with_targets("http_dispatch", "http_dispatch::mark")
    }

    /// Uses `target` for regular records and `mark_target` for `mark`.
    pub fn with_targets(target: &'static str, mark_target: &'static str) -> Self {
        Self {
            target,
            mark_target,
        }
    }

    fn emit(&self, target: &str, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: target, level, "{}", args);
    }
}

impl Default for PassThroughLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for PassThroughLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(self.target, Level::Debug, args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(self.target, Level::Info, args);
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(self.target, Level::Warn, args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.emit(self.target, Level::Error, args);
    }

    fn mark(&self, args: fmt::Arguments<'_>) {
        self.emit(self.mark_target, Level::Info, args);
    }
}

/// A logger that forwards every level to the `log` facade.
pub fn log_all() -> SharedLogger {
    Arc::new(PassThroughLogger::new())
}

/// A logger that drops every message.
pub fn log_none() -> SharedLogger {
    Arc::new(SilentLogger)
}
