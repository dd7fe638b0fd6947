//! Body accumulation and handler invocation for one request.
//!
//! The transport drives an [`Exchange`] with the body events of one request:
//! any number of [`on_data`](Exchange::on_data) calls, then one of
//! [`on_end`](Exchange::on_end), [`on_aborted`](Exchange::on_aborted) or
//! [`on_error`](Exchange::on_error), and finally
//! [`on_close`](Exchange::on_close). Every terminal path finalizes the
//! pending request, and finalizing twice is harmless.

use crate::dispatch::Dispatcher;
use crate::error::{panic_message, ErrorReason, ServerResult};
use crate::http::Status;
use crate::request::{CompleteRequest, ObservedRequest};
use crate::response::Responder;
use crate::router::{HandlerFuture, Outcome};
use futures::FutureExt;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Where an exchange is in its life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Body chunks are being accepted
    Collecting,
    /// The request went through to a handler or the automatic OPTIONS answer
    Done,
    /// The request failed or the connection went away
    Damaged,
}

/// What the transport should do after delivering a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop reading and tear the connection down
    Destroy,
}

/// One request between header arrival and cleanup.
#[derive(Debug)]
pub struct Exchange {
    dispatcher: Arc<Dispatcher>,
    request: CompleteRequest,
    responder: Responder,
    max_body_size: usize,
    state: ExchangeState,
}

impl Exchange {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        request: CompleteRequest,
        responder: Responder,
        max_body_size: usize,
    ) -> Self {
        Self {
            dispatcher,
            request,
            responder,
            max_body_size,
            state: ExchangeState::Collecting,
        }
    }

    pub fn request(&self) -> &CompleteRequest {
        &self.request
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Effective body cap: route override, else global option, else default
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Accept a body chunk.
    pub fn on_data(&mut self, chunk: &[u8]) -> Flow {
        match self.state {
            ExchangeState::Collecting => {}
            ExchangeState::Damaged => return Flow::Destroy,
            ExchangeState::Done => return Flow::Continue,
        }

        self.request.append(chunk);
        if self.request.body_len() > self.max_body_size {
            self.fail_oversized();
            return Flow::Destroy;
        }
        Flow::Continue
    }

    /// The body is complete: answer OPTIONS automatically if configured,
    /// otherwise resolve the absolute URL and run the handler.
    ///
    /// A handler error comes back as `Err` only when the dispatcher does not
    /// catch handler failures itself.
    pub fn on_end(&mut self) -> ServerResult<()> {
        if self.state != ExchangeState::Collecting || self.request.is_damaged() {
            self.log_debug("ended damaged so we just ignore it");
            return Ok(());
        }

        self.request.flush_pending();
        if self.request.body_len() > self.max_body_size {
            self.fail_oversized();
            return Ok(());
        }

        if self.dispatcher.auto_handle_options && self.request.method() == "OPTIONS" {
            self.dispatcher.logger.debug(format_args!(
                "OPTIONS to {} will be auto handled! body len:{}",
                self.request.url(),
                self.request.body_len()
            ));
            self.responder.send_status(Status::Ok.code());
            self.finish(ExchangeState::Done);
            return Ok(());
        }

        match self.dispatcher.resolve_url(&self.request) {
            Ok(url) => self.request.set_full_url(url),
            Err(err) => {
                self.request.mark_damaged();
                let msg = format!(
                    "{} to {} parsing full url got err {}",
                    self.request.method(),
                    self.request.url(),
                    err
                );
                self.dispatcher.logger.error(format_args!("{}", msg));
                self.report(ErrorReason::BadUrl, &msg);
                self.responder
                    .indicate_error_if_possible(Status::BadRequest.code());
                self.finish(ExchangeState::Damaged);
                return Ok(());
            }
        }

        self.dispatcher.logger.debug(format_args!(
            "{} to {} complete request is ready for handling! body len:{}",
            self.request.method(),
            self.request.url(),
            self.request.body_len()
        ));
        let result = self.invoke();
        self.finish(ExchangeState::Done);
        result
    }

    /// The peer disconnected before the body was complete. No response is
    /// attempted.
    pub fn on_aborted(&mut self) {
        let msg = format!(
            "{} to {} request aborted!",
            self.request.method(),
            self.request.url()
        );
        self.dispatcher.logger.debug(format_args!("{}", msg));
        self.report(ErrorReason::NetAborted, &msg);
        self.finish(ExchangeState::Damaged);
    }

    /// The transport failed while reading the request. No response is
    /// attempted.
    pub fn on_error(&mut self, err: &dyn StdError) {
        let msg = format!(
            "{} to {} request got err({})",
            self.request.method(),
            self.request.url(),
            err
        );
        self.dispatcher.logger.error(format_args!("{}", msg));
        self.report(ErrorReason::NetError, &msg);
        self.finish(ExchangeState::Damaged);
    }

    /// The request stream is closed; whatever happened before, the buffers
    /// are released now.
    pub fn on_close(&mut self) {
        let state = if self.state == ExchangeState::Collecting {
            ExchangeState::Damaged
        } else {
            self.state
        };
        self.finish(state);
        self.log_debug("request closed");
    }

    fn fail_oversized(&mut self) {
        self.request.mark_damaged();
        let msg = format!(
            "{} to {} request reached maximal allowed body size of {}",
            self.request.method(),
            self.request.url(),
            self.max_body_size
        );
        self.dispatcher.logger.error(format_args!("{}", msg));
        self.report(ErrorReason::Oversized, &msg);
        self.responder
            .indicate_error_if_possible(Status::BadRequest.code());
        self.finish(ExchangeState::Damaged);
        self.responder.destroy();
    }

    fn invoke(&mut self) -> ServerResult<()> {
        let handler = self.request.route().handler().clone();

        if !self.dispatcher.catch_to_500 {
            if let Outcome::Pending(future) = handler(&self.request, &self.responder)? {
                let logger = self.dispatcher.logger.clone();
                let what = format!("{} to {}", self.request.method(), self.request.url());
                spawn_detached(async move {
                    if let Err(err) = future.await {
                        logger.error(format_args!("{} handler future failed: {}", what, err));
                    }
                });
            }
            metrics::increment_counter!("dispatch_handled_total");
            return Ok(());
        }

        let call = panic::catch_unwind(AssertUnwindSafe(|| handler(&self.request, &self.responder)));
        match call {
            Ok(Ok(Outcome::Done)) => {
                metrics::increment_counter!("dispatch_handled_total");
            }
            Ok(Ok(Outcome::Pending(future))) => {
                metrics::increment_counter!("dispatch_handled_total");
                self.watch(future);
            }
            Ok(Err(err)) => self.handler_failed(&err.to_string()),
            Err(payload) => self.handler_failed(&panic_message(&*payload)),
        }
        Ok(())
    }

    /// Run a handler future to completion, routing a failure through the
    /// same classification as a failed synchronous call.
    fn watch(&self, future: HandlerFuture) {
        let dispatcher = self.dispatcher.clone();
        let responder = self.responder.clone();
        let raw = self.request.to_raw();
        let route = self.request.route().clone();

        spawn_detached(async move {
            let detail = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err.to_string(),
                Err(payload) => panic_message(&*payload),
            };
            let msg = format!(
                "{} to {} handler future failed: {}",
                raw.method.as_deref().unwrap_or_default(),
                raw.url.as_deref().unwrap_or_default(),
                detail
            );
            dispatcher.logger.error(format_args!("{}", msg));
            dispatcher.report(
                ErrorReason::HandlingError,
                Some(route.as_ref()),
                ObservedRequest::Raw(&raw),
                &responder,
                &msg,
            );
            responder.indicate_error_if_possible(Status::InternalServerError.code());
        });
    }

    fn handler_failed(&self, detail: &str) {
        let msg = format!(
            "{} to {} calling the handler got err {}",
            self.request.method(),
            self.request.url(),
            detail
        );
        self.dispatcher.logger.error(format_args!("{}", msg));
        self.report(ErrorReason::HandlingError, &msg);
        self.responder
            .indicate_error_if_possible(Status::InternalServerError.code());
    }

    fn report(&self, reason: ErrorReason, msg: &str) {
        self.dispatcher.report(
            reason,
            Some(self.request.route().as_ref()),
            ObservedRequest::Pending(&self.request),
            &self.responder,
            msg,
        );
    }

    fn finish(&mut self, state: ExchangeState) {
        self.request.finalize();
        self.state = state;
    }

    fn log_debug(&self, what: &str) {
        self.dispatcher.logger.debug(format_args!(
            "{} to {} {}",
            self.request.method(),
            self.request.url(),
            what
        ));
    }
}

/// Spawn onto the current Tokio runtime, or onto a thread of its own when
/// called outside one.
fn spawn_detached<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => {
            std::thread::spawn(move || futures::executor::block_on(task));
        }
    }
}
