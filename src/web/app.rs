//! The application: routes, health checks and shutdown hooks in one place.

use crate::tools::system::await_termination_signal;
use crate::web::health::{HealthChecker, HealthReport, check_all, health_route};
use crate::web::middleware::{self, DEFAULT_TIMEOUT, HttpService, StackConfig};
use crate::web::respond::handle_rejection;
use crate::web::router::{Middleware, Module, Route, Router};
use crate::web::shutdown::{Shutdowner, Trigger, on_trigger, shutdown_all};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use hyper::Server;
use hyper::server::conn::AddrStream;
use hyper::service::make_service_fn;
use std::convert::Infallible;
use std::env;
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use warp::Filter;

/// Where and how the HTTP server runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    /// Overall deadline for all shutdowners once a shutdown was triggered.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Reads `BIND_ADDRESS` and `SHUTDOWN_TIMEOUT_SECS`, falling back to the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = ServerConfig::default();

        if let Ok(bind_address) = env::var("BIND_ADDRESS") {
            config.bind_address = SocketAddr::from_str(&bind_address)
                .with_context(|| format!("Failed to parse bind address '{}'", bind_address))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECS") {
            let secs = timeout
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Failed to parse SHUTDOWN_TIMEOUT_SECS '{}'", timeout))?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// Routes plus everything needed to run them responsibly.
pub struct App {
    router: Router,
    health_checkers: Vec<Arc<dyn HealthChecker>>,
    shutdowners: Vec<Arc<dyn Shutdowner>>,
    health_endpoint: Option<Option<Duration>>,
    request_timeout: Duration,
    api_version: Option<String>,
}

impl App {
    pub fn new(router: Router) -> Self {
        App {
            router,
            health_checkers: Vec::new(),
            shutdowners: Vec::new(),
            health_endpoint: None,
            request_timeout: DEFAULT_TIMEOUT,
            api_version: None,
        }
    }

    pub fn with_health_check(mut self, checker: Arc<dyn HealthChecker>) -> Self {
        self.health_checkers.push(checker);
        self
    }

    pub fn with_shutdown(mut self, shutdowner: Arc<dyn Shutdowner>) -> Self {
        self.shutdowners.push(shutdowner);
        self
    }

    /// Registers the module's routes behind `middleware` and its health check.
    pub fn route_module(mut self, module: Arc<dyn Module>, middleware: &[Middleware]) -> Self {
        let routing = module.clone();
        self.router = self.router.group(|router| {
            let router = middleware
                .iter()
                .fold(router, |router, mw| router.with(mw.clone()));
            routing.routes(router)
        });
        self.health_checkers.push(Arc::new(ModuleHealth(module)));
        self
    }

    /// Serves `GET /health` with the given deadline for all checkers.
    pub fn with_health_endpoint(mut self, timeout: Option<Duration>) -> Self {
        self.health_endpoint = Some(timeout);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Announces the given version via `X-API-Version`.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub async fn check_health(&self, timeout: Option<Duration>) -> HealthReport {
        check_all(&self.health_checkers, timeout).await
    }

    /// Runs all registered shutdowners.
    pub async fn shutdown(&self, timeout: Duration) -> anyhow::Result<()> {
        shutdown_all(timeout, &self.shutdowners).await
    }

    /// All routes, with rejections rendered as JSON errors.
    pub fn route(&self) -> Route {
        let routes = self.router.clone().into_route();
        let routes = match self.health_endpoint {
            Some(timeout) => health_route(self.health_checkers.clone(), timeout)
                .or(routes)
                .unify()
                .boxed(),
            None => routes,
        };

        routes.recover(handle_rejection).unify().boxed()
    }

    /// The routes behind the default middleware stack.
    pub fn service(&self, remote: Option<SocketAddr>) -> HttpService {
        middleware::stack(warp::service(self.route()), self.stack_config(remote))
    }

    fn stack_config(&self, remote: Option<SocketAddr>) -> StackConfig {
        StackConfig {
            remote,
            request_timeout: self.request_timeout,
            api_version: self.api_version.clone(),
        }
    }

    /// Serves the app until a termination signal arrives or the server stops.
    ///
    /// Then the HTTP server and all registered shutdowners are stopped within
    /// `shutdown_timeout`.
    pub async fn serve(self, config: ServerConfig) -> anyhow::Result<()> {
        self.serve_until(config, await_termination_signal()).await
    }

    /// Like [`App::serve`], but shuts down once `signal` resolves.
    pub async fn serve_until<F>(self, config: ServerConfig, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = &'static str>,
    {
        let route = self.route();
        let stack_config = self.stack_config(None);

        let make_service = make_service_fn(move |conn: &AddrStream| {
            let service = middleware::stack(
                warp::service(route.clone()),
                StackConfig {
                    remote: Some(conn.remote_addr()),
                    ..stack_config.clone()
                },
            );
            async move { Ok::<_, Infallible>(service) }
        });

        let server = Server::try_bind(&config.bind_address)
            .with_context(|| format!("Failed to bind HTTP server to {}", config.bind_address))?
            .serve(make_service);
        tracing::info!(
            "Running HTTP server at effective address {}",
            server.local_addr()
        );

        let stop = CancellationToken::new();
        let stopped = CancellationToken::new();
        let server = server.with_graceful_shutdown(stop.clone().cancelled_owned());
        let server_stopped = stopped.clone();
        let handle = tokio::spawn(async move {
            let result = server.await;
            server_stopped.cancel();
            result
        });

        let mut shutdowners: Vec<Arc<dyn Shutdowner>> = vec![Arc::new(ServerShutdown {
            stop,
            handle: Mutex::new(Some(handle)),
        })];
        shutdowners.extend(self.shutdowners.iter().cloned());

        let trigger = async {
            tokio::select! {
                signal = signal => Trigger::Signal(signal),
                _ = stopped.cancelled() => Trigger::Stopped,
            }
        };

        on_trigger(trigger, config.shutdown_timeout, &shutdowners).await?;
        tracing::info!("HTTP Server has been terminated.");

        Ok(())
    }
}

struct ModuleHealth(Arc<dyn Module>);

#[async_trait]
impl HealthChecker for ModuleHealth {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        self.0.healthy().await
    }
}

/// Stops accepting connections and waits for in-flight requests.
struct ServerShutdown {
    stop: CancellationToken,
    handle: Mutex<Option<JoinHandle<hyper::Result<()>>>>,
}

#[async_trait]
impl Shutdowner for ServerShutdown {
    fn name(&self) -> &str {
        "http server"
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.stop.cancel();

        let handle = self
            .handle
            .lock()
            .map_err(|_| anyhow!("HTTP server handle is poisoned"))?
            .take();

        match handle {
            Some(handle) => handle
                .await
                .context("HTTP server task failed")?
                .context("HTTP server failed"),
            None => Ok(()),
        }
    }
}
