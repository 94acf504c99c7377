//! Standalone listener exposing the impersonating proxy on every path.
//!
//! Unlike the API router, this listener owns its connections, so upgraded
//! protocols (exec, attach, port-forward) can be tunnelled through it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::ServerError;
use crate::identity::IdentityResolver;
use crate::proxy::ImpersonatingProxy;
use crate::routes::proxy_target;

/// How long [`GatewayServer::stop`] waits for the listener to close
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a [`GatewayServer`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Clone)]
struct ProxyState {
    proxy: ImpersonatingProxy,
    identity: Arc<dyn IdentityResolver>,
}

pub struct GatewayServer {
    addr: SocketAddr,
    router: Router,
    state: watch::Sender<ServerState>,
    shutdown: Mutex<CancellationToken>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl GatewayServer {
    pub fn new(addr: SocketAddr, proxy: ImpersonatingProxy, identity: Arc<dyn IdentityResolver>) -> Self {
        let router = Router::new()
            .fallback(proxy_all)
            .with_state(ProxyState { proxy, identity });

        Self {
            addr,
            router,
            state: watch::Sender::new(ServerState::Stopped),
            shutdown: Mutex::new(CancellationToken::new()),
            local_addr: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Address actually bound while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// The proxying router, for serving it elsewhere
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind and serve until the listener closes.
    ///
    /// Returns `Ok(())` after a shutdown requested through [`stop`](Self::stop).
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn start(&self) -> Result<(), ServerError> {
        let token = CancellationToken::new();
        let claimed = self.state.send_if_modified(|state| {
            if *state != ServerState::Stopped {
                return false;
            }
            *state = ServerState::Starting;
            *self.shutdown.lock() = token.clone();
            true
        });
        if !claimed {
            return Err(ServerError::AlreadyRunning);
        }

        let result = self.serve(token).await;

        *self.local_addr.lock() = None;
        self.state.send_replace(ServerState::Stopped);
        info!("Gateway server stopped");
        result
    }

    async fn serve(&self, token: CancellationToken) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr).await.map_err(|source| ServerError::Bind {
            addr: self.addr,
            source,
        })?;

        let local_addr = listener.local_addr().ok();
        *self.local_addr.lock() = local_addr;

        self.state.send_if_modified(|state| {
            let starting = *state == ServerState::Starting;
            if starting {
                *state = ServerState::Running;
            }
            starting
        });
        info!(local_addr = ?local_addr, "Gateway server listening");

        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(token.cancelled_owned())
            .await
            .map_err(ServerError::Serve)
    }

    /// Ask a running server to shut down and wait for it to close
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut rx = self.state.subscribe();

        self.state.send_if_modified(|state| match state {
            ServerState::Starting | ServerState::Running => {
                *state = ServerState::Stopping;
                true
            }
            _ => false,
        });
        self.shutdown.lock().cancel();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, rx.wait_for(|s| *s == ServerState::Stopped)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(ServerError::ShutdownTimeout),
        }
    }
}

async fn proxy_all(State(state): State<ProxyState>, request: Request) -> Response {
    let identity = match state.identity.resolve(request.headers()).await {
        Ok(identity) => identity,
        Err(e) => return ServerError::from(e).into_response(),
    };

    let target = proxy_target(&request, "");
    state.proxy.forward(&identity, &target, request).await
}
