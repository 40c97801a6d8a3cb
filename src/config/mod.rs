//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "staffetta";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_OPS_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_OPS_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_HTTP_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_STORAGE_DIR: &str = "outputs";
const DEFAULT_STORAGE_MAX_DOWNLOAD_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_PROVIDER_SUBMIT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROVIDER_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_PROVIDER_POLL_MAX_ATTEMPTS: u32 = 60;
const DEFAULT_RECONCILER_CRON: &str = "0 */5 * * * *";
const DEFAULT_RECONCILER_STALE_AFTER_MINUTES: u64 = 30;
const DEFAULT_JOB_ARCHIVE_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_NOTIFY_CONCURRENCY: u32 = 2;

/// Command-line arguments for the staffetta binary.
#[derive(Debug, Parser)]
#[command(name = "staffetta", version, about = "Staffetta render relay server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STAFFETTA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the staffetta HTTP services and background workers.
    Serve(Box<ServeArgs>),
    /// Create an account with an initial API key and print the token.
    #[command(name = "bootstrap")]
    Bootstrap(BootstrapArgs),
    /// Run one stuck-job sweep against the database and exit.
    #[command(name = "sweep")]
    Sweep(SweepArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct BootstrapArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Name for the new account.
    #[arg(long = "account-name", value_name = "NAME")]
    pub account_name: String,

    /// Issue the key with operator scope in addition to render scope.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub operator: bool,

    /// Initial credit grant for the account.
    #[arg(long = "credits", value_name = "TOKENS", default_value_t = 0)]
    pub credits: i64,
}

#[derive(Debug, Args, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the stale threshold in minutes.
    #[arg(long = "stale-after-minutes", value_name = "MINUTES")]
    pub stale_after_minutes: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the operations listener host.
    #[arg(long = "server-ops-host", value_name = "HOST")]
    pub server_ops_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the operations listener port.
    #[arg(long = "server-ops-port", value_name = "PORT")]
    pub ops_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the HTTP database pool size.
    #[arg(long = "database-http-max-connections", value_name = "COUNT")]
    pub database_http_max_connections: Option<u32>,

    /// Override the jobs database pool size.
    #[arg(long = "database-jobs-max-connections", value_name = "COUNT")]
    pub database_jobs_max_connections: Option<u32>,

    /// Override the rate-limit store backend (postgres|memory).
    #[arg(long = "rate-limit-backend", value_name = "BACKEND")]
    pub rate_limit_backend: Option<String>,

    /// Override the reconciler stale threshold in minutes.
    #[arg(long = "reconciler-stale-after-minutes", value_name = "MINUTES")]
    pub reconciler_stale_after_minutes: Option<u64>,

    /// Override the output storage directory.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,

    /// Override the archive worker concurrency.
    #[arg(long = "jobs-archive-concurrency", value_name = "COUNT")]
    pub jobs_archive_concurrency: Option<u32>,

    /// Override the notify worker concurrency.
    #[arg(long = "jobs-notify-concurrency", value_name = "COUNT")]
    pub jobs_notify_concurrency: Option<u32>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub providers: ProviderSettings,
    pub webhooks: WebhookSettings,
    pub rate_limit: RateLimitSettings,
    pub reconciler: ReconcilerSettings,
    pub storage: StorageSettings,
    pub jobs: JobsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub ops_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub http_max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

/// Per-provider endpoint configuration plus the shared submit/poll budget.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub shotstack: ProviderEndpoint,
    pub json2video: ProviderEndpoint,
    pub submit_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_max_attempts: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Shared webhook secrets. A missing secret fails closed at the endpoint.
#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub shotstack_secret: Option<String>,
    pub json2video_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub backend: RateLimitBackend,
}

/// Where rate-limit windows are kept. `Memory` is only safe for a single
/// service instance; `Postgres` serializes across instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub cron: String,
    pub stale_after: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub directory: PathBuf,
    pub max_download_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub archive_concurrency: NonZeroU32,
    pub notify_concurrency: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("STAFFETTA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Bootstrap(args)) => raw.apply_database_override(&args.database),
        Some(Command::Sweep(args)) => {
            raw.apply_database_override(&args.database);
            if let Some(minutes) = args.stale_after_minutes {
                raw.reconciler.stale_after_minutes = Some(minutes);
            }
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    providers: RawProviderSettings,
    webhooks: RawWebhookSettings,
    rate_limit: RawRateLimitSettings,
    reconciler: RawReconcilerSettings,
    storage: RawStorageSettings,
    jobs: RawJobsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_ops_host.as_ref() {
            self.server.ops_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.ops_port {
            self.server.ops_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_http_max_connections {
            self.database.http_max_connections = Some(max);
        }
        if let Some(max) = overrides.database_jobs_max_connections {
            self.database.jobs_max_connections = Some(max);
        }
        if let Some(backend) = overrides.rate_limit_backend.as_ref() {
            self.rate_limit.backend = Some(backend.clone());
        }
        if let Some(minutes) = overrides.reconciler_stale_after_minutes {
            self.reconciler.stale_after_minutes = Some(minutes);
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(value) = overrides.jobs_archive_concurrency {
            self.jobs.archive_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_notify_concurrency {
            self.jobs.notify_concurrency = Some(value);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            providers,
            webhooks,
            rate_limit,
            reconciler,
            storage,
            jobs,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let providers = build_provider_settings(providers)?;
        let webhooks = build_webhook_settings(webhooks);
        let rate_limit = build_rate_limit_settings(rate_limit)?;
        let reconciler = build_reconciler_settings(reconciler)?;
        let storage = build_storage_settings(storage)?;
        let jobs = build_jobs_settings(jobs)?;

        Ok(Self {
            server,
            logging,
            database,
            providers,
            webhooks,
            rate_limit,
            reconciler,
            storage,
            jobs,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let ops_host = server
        .ops_host
        .unwrap_or_else(|| DEFAULT_OPS_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let ops_port = server.ops_port.unwrap_or(DEFAULT_OPS_PORT);
    if ops_port == 0 {
        return Err(LoadError::invalid(
            "server.ops_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let ops_addr = parse_socket_addr(&ops_host, ops_port)
        .map_err(|reason| LoadError::invalid("server.ops_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        ops_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let http_value = database
        .http_max_connections
        .unwrap_or(DEFAULT_DB_HTTP_MAX_CONNECTIONS);
    let jobs_value = database
        .jobs_max_connections
        .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS);

    let http_max_connections = non_zero_u32(http_value.into(), "database.http_max_connections")?;
    let jobs_max_connections = non_zero_u32(jobs_value.into(), "database.jobs_max_connections")?;

    Ok(DatabaseSettings {
        url,
        http_max_connections,
        jobs_max_connections,
    })
}

fn build_provider_settings(providers: RawProviderSettings) -> Result<ProviderSettings, LoadError> {
    let shotstack = ProviderEndpoint {
        base_url: providers
            .shotstack
            .base_url
            .unwrap_or_else(|| "https://api.shotstack.io/v1".to_string()),
        api_key: providers.shotstack.api_key,
    };
    let json2video = ProviderEndpoint {
        base_url: providers
            .json2video
            .base_url
            .unwrap_or_else(|| "https://api.json2video.com/v2".to_string()),
        api_key: providers.json2video.api_key,
    };

    let submit_timeout_secs = providers
        .submit_timeout_seconds
        .unwrap_or(DEFAULT_PROVIDER_SUBMIT_TIMEOUT_SECS);
    if submit_timeout_secs == 0 {
        return Err(LoadError::invalid(
            "providers.submit_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let poll_interval_secs = providers
        .poll_interval_seconds
        .unwrap_or(DEFAULT_PROVIDER_POLL_INTERVAL_SECS);
    if poll_interval_secs == 0 {
        return Err(LoadError::invalid(
            "providers.poll_interval_seconds",
            "must be greater than zero",
        ));
    }

    let poll_attempts = providers
        .poll_max_attempts
        .unwrap_or(DEFAULT_PROVIDER_POLL_MAX_ATTEMPTS);

    Ok(ProviderSettings {
        shotstack,
        json2video,
        submit_timeout: Duration::from_secs(submit_timeout_secs),
        poll_interval: Duration::from_secs(poll_interval_secs),
        poll_max_attempts: non_zero_u32(poll_attempts.into(), "providers.poll_max_attempts")?,
    })
}

fn build_webhook_settings(webhooks: RawWebhookSettings) -> WebhookSettings {
    let non_empty = |value: Option<String>| {
        value.and_then(|secret| {
            let trimmed = secret.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
    };

    WebhookSettings {
        shotstack_secret: non_empty(webhooks.shotstack_secret),
        json2video_secret: non_empty(webhooks.json2video_secret),
    }
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let backend = match rate_limit.backend.as_deref() {
        None | Some("postgres") => RateLimitBackend::Postgres,
        Some("memory") => RateLimitBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "rate_limit.backend",
                format!("unknown backend `{other}` (expected postgres|memory)"),
            ));
        }
    };

    Ok(RateLimitSettings { backend })
}

fn build_reconciler_settings(
    reconciler: RawReconcilerSettings,
) -> Result<ReconcilerSettings, LoadError> {
    let cron = reconciler
        .cron
        .unwrap_or_else(|| DEFAULT_RECONCILER_CRON.to_string());

    let minutes = reconciler
        .stale_after_minutes
        .unwrap_or(DEFAULT_RECONCILER_STALE_AFTER_MINUTES);
    if minutes == 0 {
        return Err(LoadError::invalid(
            "reconciler.stale_after_minutes",
            "must be greater than zero",
        ));
    }

    Ok(ReconcilerSettings {
        cron,
        stale_after: Duration::from_secs(minutes * 60),
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let directory = storage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));

    let max_bytes_value = storage
        .max_download_bytes
        .unwrap_or(DEFAULT_STORAGE_MAX_DOWNLOAD_BYTES);
    let max_download_bytes = NonZeroU64::new(max_bytes_value).ok_or_else(|| {
        LoadError::invalid("storage.max_download_bytes", "must be greater than zero")
    })?;

    Ok(StorageSettings {
        directory,
        max_download_bytes,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let archive = jobs
        .archive_concurrency
        .unwrap_or(DEFAULT_JOB_ARCHIVE_CONCURRENCY);
    let notify = jobs
        .notify_concurrency
        .unwrap_or(DEFAULT_JOB_NOTIFY_CONCURRENCY);

    Ok(JobsSettings {
        archive_concurrency: non_zero_u32(archive.into(), "jobs.archive_concurrency")?,
        notify_concurrency: non_zero_u32(notify.into(), "jobs.notify_concurrency")?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    ops_host: Option<String>,
    public_port: Option<u16>,
    ops_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    http_max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProviderSettings {
    shotstack: RawProviderEndpoint,
    json2video: RawProviderEndpoint,
    submit_timeout_seconds: Option<u64>,
    poll_interval_seconds: Option<u64>,
    poll_max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProviderEndpoint {
    base_url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWebhookSettings {
    shotstack_secret: Option<String>,
    json2video_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    backend: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReconcilerSettings {
    cron: Option<String>,
    stale_after_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
    max_download_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    archive_concurrency: Option<u32>,
    notify_concurrency: Option<u32>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.public_port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            public_port: Some(4321),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.public_addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn rate_limit_backend_defaults_to_postgres() {
        let raw = RawSettings::default();
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.rate_limit.backend, RateLimitBackend::Postgres);
    }

    #[test]
    fn unknown_rate_limit_backend_is_rejected() {
        let mut raw = RawSettings::default();
        raw.rate_limit.backend = Some("redis".to_string());
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn empty_webhook_secret_is_treated_as_missing() {
        let mut raw = RawSettings::default();
        raw.webhooks.shotstack_secret = Some("   ".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.webhooks.shotstack_secret.is_none());
    }

    #[test]
    fn reconciler_defaults_to_thirty_minutes() {
        let raw = RawSettings::default();
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.reconciler.stale_after, Duration::from_secs(1800));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["staffetta"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_bootstrap_arguments() {
        let args = CliArgs::parse_from([
            "staffetta",
            "bootstrap",
            "--database-url",
            "postgres://example",
            "--account-name",
            "ops",
            "--operator",
            "--credits",
            "500",
        ]);

        match args.command.expect("bootstrap command") {
            Command::Bootstrap(bootstrap) => {
                assert_eq!(
                    bootstrap.database.database_url.as_deref(),
                    Some("postgres://example")
                );
                assert_eq!(bootstrap.account_name, "ops");
                assert!(bootstrap.operator);
                assert_eq!(bootstrap.credits, 500);
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_sweep_arguments() {
        let args = CliArgs::parse_from([
            "staffetta",
            "sweep",
            "--database-url",
            "postgres://example",
            "--stale-after-minutes",
            "45",
        ]);

        match args.command.expect("sweep command") {
            Command::Sweep(sweep) => {
                assert_eq!(
                    sweep.database.database_url.as_deref(),
                    Some("postgres://example")
                );
                assert_eq!(sweep.stale_after_minutes, Some(45));
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "staffetta",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--rate-limit-backend",
            "memory",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(
                    serve.overrides.rate_limit_backend.as_deref(),
                    Some("memory")
                );
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
