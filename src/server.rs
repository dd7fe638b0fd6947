use crate::acceptor::Acceptor;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::dispatch::{BoundAddress, Dispatcher, Listener, Transport};
use crate::error::{ServerError, ServerResult};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Plain HTTP listener that dispatchers are composed onto.
///
/// ```no_run
/// # async fn run() -> http_dispatch::ServerResult<()> {
/// use http_dispatch::{compose, DispatchOptions, HttpServer, RouteTable, ServerConfig};
///
/// let mut server = HttpServer::bind(&ServerConfig::new())?;
/// compose(&mut server, RouteTable::new(), DispatchOptions::sane());
/// server.serve().await
/// # }
/// ```
pub struct HttpServer {
    acceptor: Acceptor,
    config: ServerConfig,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl HttpServer {
    /// Bind the listening socket described by `config`. Must be called from
    /// inside a Tokio runtime.
    pub fn bind(config: &ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let acceptor = Acceptor::bind(config.socket_address(), config.backlog_size)?;
        Ok(Self {
            acceptor,
            config: config.clone(),
            dispatcher: None,
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.acceptor.local_addr()?)
    }

    /// The dispatcher composed onto this server, if any
    pub fn dispatcher(&self) -> Option<&Arc<Dispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Accept connections forever.
    pub async fn serve(self) -> ServerResult<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves. Connections already
    /// accepted run to completion on their own tasks.
    pub async fn serve_until<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let dispatcher = self
            .dispatcher
            .clone()
            .ok_or_else(|| ServerError::Config("no dispatcher composed onto this server".to_string()))?;

        let addr = self.acceptor.local_addr()?;
        dispatcher.listening(Some(BoundAddress::Inet(addr)));
        log::info!("listening on {}", addr);

        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.acceptor.accept() => accepted,
            };

            let (stream, peer, id) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::error!("accepting a connection failed: {}", err);
                    // Usually out of descriptors; give the others a chance to close
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            let connection = Connection::new(stream, peer, id)
                .with_timeout(self.config.connection_timeout)
                .with_max_header_size(self.config.max_header_size);
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                if let Err(err) = connection.run(dispatcher).await {
                    log::debug!("connection {} from {} failed: {}", id, peer, err);
                }
            });
        }

        log::info!(
            "stopped listening on {} after {} connections",
            addr,
            self.acceptor.accepted()
        );
        Ok(())
    }
}

impl Listener for HttpServer {
    fn transport(&self) -> Transport {
        Transport::Plain
    }

    fn attach(&mut self, dispatcher: Arc<Dispatcher>) {
        if self.dispatcher.replace(dispatcher).is_some() {
            log::warn!("replacing the dispatcher already composed onto this server");
        }
    }
}
