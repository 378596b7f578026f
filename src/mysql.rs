//! MySQL connection pools.
//!
//! [`Config::from_env`] reads the connection settings from `MYSQL_*`
//! variables, [`open`] creates a pool and verifies it with a ping.
//! [`PoolHealth`] and [`PoolShutdown`] plug the pool into an
//! [`App`](crate::web::app::App).
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `MYSQL_USER` | User name | `root` |
//! | `MYSQL_PASSWD` | Password | |
//! | `MYSQL_NET` | `tcp` or `unix` | `tcp` |
//! | `MYSQL_ADDR` | `host:port` or socket path, used if `MYSQL_HOST` is empty | |
//! | `MYSQL_HOST` | Host name | `localhost` |
//! | `MYSQL_PORT` | Port | `3306` |
//! | `MYSQL_DB` | Database name (required) | |
//! | `MYSQL_TLS` | `false`, `true`, `skip-verify`, `preferred` or a custom name | |
//! | `MYSQL_CA_CERT_PATH` | CA certificate (PEM), requires `MYSQL_TLS` | |
//! | `MYSQL_MAX_OPEN_CONNS` | Maximal pool size | `10` |

use crate::tools::watch::Watch;
use crate::web::health::HealthChecker;
use crate::web::shutdown::Shutdowner;
use anyhow::{Context, bail};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::Connection;
use std::env;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub user: String,
    pub password: String,
    pub net: String,
    pub addr: String,
    pub host: String,
    pub port: u16,
    pub db: String,
    pub tls: String,
    pub ca_cert_path: String,
    pub max_open_conns: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            user: "root".to_string(),
            password: String::new(),
            net: "tcp".to_string(),
            addr: String::new(),
            host: "localhost".to_string(),
            port: 3306,
            db: String::new(),
            tls: String::new(),
            ca_cert_path: String::new(),
            max_open_conns: 10,
        }
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("net", &self.net)
            .field("addr", &self.address())
            .field("db", &self.db)
            .field("tls", &self.tls)
            .field("ca_cert_path", &self.ca_cert_path)
            .field("max_open_conns", &self.max_open_conns)
            .finish_non_exhaustive()
    }
}

fn env_or(name: &str, default: String) -> String {
    env::var(name).ok().unwrap_or(default)
}

fn parse_env<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .with_context(|| format!("Invalid value '{}' for {}", value, name)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let defaults = Config::default();
        let config = Config {
            user: env_or("MYSQL_USER", defaults.user),
            password: env_or("MYSQL_PASSWD", defaults.password),
            net: env_or("MYSQL_NET", defaults.net),
            addr: env_or("MYSQL_ADDR", defaults.addr),
            host: env_or("MYSQL_HOST", defaults.host),
            port: parse_env("MYSQL_PORT", defaults.port)?,
            db: env::var("MYSQL_DB").context("No MYSQL_DB provided in environment")?,
            tls: env_or("MYSQL_TLS", defaults.tls),
            ca_cert_path: env_or("MYSQL_CA_CERT_PATH", defaults.ca_cert_path),
            max_open_conns: parse_env("MYSQL_MAX_OPEN_CONNS", defaults.max_open_conns)?,
        };

        Ok(config)
    }

    /// `host:port` if a host is given, `addr` otherwise.
    pub fn address(&self) -> String {
        if self.host.is_empty() {
            self.addr.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn host_and_port(&self) -> anyhow::Result<(String, u16)> {
        if !self.host.is_empty() {
            return Ok((self.host.clone(), self.port));
        }

        match self.addr.rsplit_once(':') {
            Some((host, port)) => Ok((
                host.to_string(),
                port.parse()
                    .with_context(|| format!("Invalid port in MySQL address '{}'", self.addr))?,
            )),
            None if !self.addr.is_empty() => Ok((self.addr.clone(), self.port)),
            None => bail!("Neither a MySQL host nor an address is given"),
        }
    }

    /// Builds the connect options, including TLS settings.
    ///
    /// A CA certificate without a TLS mode is rejected.
    pub fn connect_options(&self) -> anyhow::Result<MySqlConnectOptions> {
        let mut options = MySqlConnectOptions::new()
            .username(&self.user)
            .database(&self.db);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }

        options = if self.net == "unix" {
            options.socket(&self.addr)
        } else {
            let (host, port) = self.host_and_port()?;
            options.host(&host).port(port)
        };

        if !self.ca_cert_path.is_empty() {
            if self.tls.is_empty() {
                bail!("MYSQL_TLS must not be empty if a CA certificate is given");
            }
            if !Path::new(&self.ca_cert_path).is_file() {
                bail!("Couldn't read CA certificate file (path: {})", self.ca_cert_path);
            }
            options = options.ssl_ca(&self.ca_cert_path);
        }

        Ok(options.ssl_mode(ssl_mode(&self.tls, !self.ca_cert_path.is_empty())?))
    }
}

/// Maps a TLS setting onto an SSL mode.
///
/// Any name besides the well-known ones refers to a custom CA certificate.
pub fn ssl_mode(tls: &str, has_ca_cert: bool) -> anyhow::Result<MySqlSslMode> {
    match tls {
        "" | "false" => Ok(MySqlSslMode::Disabled),
        "true" => Ok(MySqlSslMode::VerifyIdentity),
        "skip-verify" => Ok(MySqlSslMode::Required),
        "preferred" => Ok(MySqlSslMode::Preferred),
        _ if has_ca_cert => Ok(MySqlSslMode::VerifyIdentity),
        other => bail!("Unknown MySQL TLS mode '{}' (and no CA certificate given)", other),
    }
}

async fn ping(pool: &MySqlPool) -> anyhow::Result<()> {
    let mut connection = pool
        .acquire()
        .await
        .context("Failed to acquire a MySQL connection")?;
    connection.ping().await.context("Failed to ping MySQL")
}

/// Opens a pool and pings the database within five seconds.
pub async fn open(config: &Config) -> anyhow::Result<MySqlPool> {
    let options = config.connect_options()?;

    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_open_conns.max(1))
        .acquire_timeout(PING_TIMEOUT)
        .connect_lazy_with(options);

    match tokio::time::timeout(PING_TIMEOUT, ping(&pool)).await {
        Ok(Ok(())) => {
            tracing::info!(addr = %config.address(), db = %config.db, "Connected to MySQL");
            Ok(pool)
        }
        Ok(Err(err)) => {
            pool.close().await;
            Err(err).with_context(|| format!("Cannot connect to MySQL at {}", config.address()))
        }
        Err(_) => {
            pool.close().await;
            bail!("Pinging MySQL at {} timed out after {:?}", config.address(), PING_TIMEOUT)
        }
    }
}

/// Calls [`open`] every `interval` until it succeeds or `total` has elapsed.
pub async fn try_open(config: &Config, interval: Duration, total: Duration) -> anyhow::Result<MySqlPool> {
    let watch = Watch::start();

    loop {
        match open(config).await {
            Ok(pool) => return Ok(pool),
            Err(err) if watch.elapsed() + interval < total => {
                tracing::warn!(error = %format!("{:#}", err), retry_in = ?interval, "Cannot open MySQL pool");
                tokio::time::sleep(interval).await;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Gave up opening the MySQL pool after {:?}", watch.elapsed())
                });
            }
        }
    }
}

/// Reports the pool as healthy if a connection can be pinged.
#[derive(Clone, Debug)]
pub struct PoolHealth {
    name: String,
    pool: MySqlPool,
}

impl PoolHealth {
    pub fn new(name: impl Into<String>, pool: MySqlPool) -> Self {
        PoolHealth {
            name: name.into(),
            pool,
        }
    }
}

#[async_trait]
impl HealthChecker for PoolHealth {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        ping(&self.pool).await
    }
}

/// Closes the pool once the application shuts down.
#[derive(Clone, Debug)]
pub struct PoolShutdown {
    name: String,
    pool: MySqlPool,
}

impl PoolShutdown {
    pub fn new(name: impl Into<String>, pool: MySqlPool) -> Self {
        PoolShutdown {
            name: name.into(),
            pool,
        }
    }
}

#[async_trait]
impl Shutdowner for PoolShutdown {
    fn name(&self) -> &str {
        &self.name
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        tracing::info!(pool = %self.name, "Closed MySQL pool");
        Ok(())
    }
}
