//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::actor::Tier;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "varco";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_WINDOW_SECS: u64 = 60;
const DEFAULT_GUEST_MAX_REQUESTS: u64 = 60;
const DEFAULT_USER_MAX_REQUESTS: u64 = 120;
const DEFAULT_ADMIN_MAX_REQUESTS: u64 = 240;
const DEFAULT_CACHE_MINUTES: u64 = 5;
const DEFAULT_ADMIN_PREFIX: &str = "/api/v1/admin";

/// Command-line arguments for the varco binary.
#[derive(Debug, Parser)]
#[command(name = "varco", version, about = "varco edge request-control server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VARCO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the edge HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

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

    /// Override the rate-limit window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the per-window request ceiling for guest callers.
    #[arg(long = "rate-limit-guest-max-requests", value_name = "COUNT")]
    pub rate_limit_guest_max_requests: Option<u64>,

    /// Override the per-window request ceiling for authenticated callers.
    #[arg(long = "rate-limit-user-max-requests", value_name = "COUNT")]
    pub rate_limit_user_max_requests: Option<u64>,

    /// Override the per-window request ceiling for administrative callers.
    #[arg(long = "rate-limit-admin-max-requests", value_name = "COUNT")]
    pub rate_limit_admin_max_requests: Option<u64>,

    /// Reject instead of admitting calls while the counter store is down.
    #[arg(
        long = "rate-limit-fail-closed",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub rate_limit_fail_closed: Option<bool>,

    /// Override the cache duration applied to routes matching no rule.
    #[arg(long = "cache-default-minutes", value_name = "MINUTES")]
    pub cache_default_minutes: Option<u64>,

    /// Override the path prefix treated as administrative (never cached).
    #[arg(long = "cache-admin-prefix", value_name = "PREFIX")]
    pub cache_admin_prefix: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
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

/// Quota tiers and window applied by the admission-control stage.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub guest_max_requests: NonZeroU32,
    pub user_max_requests: NonZeroU32,
    pub admin_max_requests: NonZeroU32,
    /// When true, calls are rejected while the counter store is unreachable.
    pub fail_closed: bool,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds.get().into())
    }

    /// Numeric ceiling for a caller tier. Pure: the same claims always map
    /// to the same limit.
    pub fn limit_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Guest => self.guest_max_requests.get(),
            Tier::User => self.user_max_requests.get(),
            Tier::Admin => self.admin_max_requests.get(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_seconds: non_zero_or_min(DEFAULT_WINDOW_SECS as u32),
            guest_max_requests: non_zero_or_min(DEFAULT_GUEST_MAX_REQUESTS as u32),
            user_max_requests: non_zero_or_min(DEFAULT_USER_MAX_REQUESTS as u32),
            admin_max_requests: non_zero_or_min(DEFAULT_ADMIN_MAX_REQUESTS as u32),
            fail_closed: false,
        }
    }
}

/// Route-duration rules and eligibility boundaries for the cache stage.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_minutes: NonZeroU32,
    pub admin_prefix: String,
    pub rules: Vec<CacheRuleSetting>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheRuleSetting {
    pub pattern: String,
    pub duration_minutes: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_minutes: non_zero_or_min(DEFAULT_CACHE_MINUTES as u32),
            admin_prefix: DEFAULT_ADMIN_PREFIX.to_string(),
            rules: default_cache_rules(),
        }
    }
}

/// Ordered defaults: near-static content first with long durations, then
/// frequently-changing content with short ones.
fn default_cache_rules() -> Vec<CacheRuleSetting> {
    [
        ("settings", 30),
        ("facilities", 30),
        ("staff", 15),
        ("alumni", 15),
        ("galleries", 15),
        ("articles", 5),
        ("announcements", 5),
    ]
    .into_iter()
    .map(|(pattern, duration_minutes)| CacheRuleSetting {
        pattern: pattern.to_string(),
        duration_minutes,
    })
    .collect()
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

    builder = builder.add_source(Environment::with_prefix("VARCO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
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
    rate_limit: RawRateLimitSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_guest_max_requests {
            self.rate_limit.guest_max_requests = Some(max);
        }
        if let Some(max) = overrides.rate_limit_user_max_requests {
            self.rate_limit.user_max_requests = Some(max);
        }
        if let Some(max) = overrides.rate_limit_admin_max_requests {
            self.rate_limit.admin_max_requests = Some(max);
        }
        if let Some(fail_closed) = overrides.rate_limit_fail_closed {
            self.rate_limit.fail_closed = Some(fail_closed);
        }
        if let Some(minutes) = overrides.cache_default_minutes {
            self.cache.default_minutes = Some(minutes);
        }
        if let Some(prefix) = overrides.cache_admin_prefix.as_ref() {
            self.cache.admin_prefix = Some(prefix.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            rate_limit,
            cache,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let rate_limit = build_rate_limit_settings(rate_limit)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self {
            server,
            logging,
            rate_limit,
            cache,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
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

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window_seconds = non_zero_u32(
        rate_limit.window_seconds.unwrap_or(DEFAULT_WINDOW_SECS),
        "rate_limit.window_seconds",
    )?;
    let guest_max_requests = non_zero_u32(
        rate_limit
            .guest_max_requests
            .unwrap_or(DEFAULT_GUEST_MAX_REQUESTS),
        "rate_limit.guest_max_requests",
    )?;
    let user_max_requests = non_zero_u32(
        rate_limit
            .user_max_requests
            .unwrap_or(DEFAULT_USER_MAX_REQUESTS),
        "rate_limit.user_max_requests",
    )?;
    let admin_max_requests = non_zero_u32(
        rate_limit
            .admin_max_requests
            .unwrap_or(DEFAULT_ADMIN_MAX_REQUESTS),
        "rate_limit.admin_max_requests",
    )?;

    Ok(RateLimitSettings {
        window_seconds,
        guest_max_requests,
        user_max_requests,
        admin_max_requests,
        fail_closed: rate_limit.fail_closed.unwrap_or(false),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_minutes = non_zero_u32(
        cache.default_minutes.unwrap_or(DEFAULT_CACHE_MINUTES),
        "cache.default_minutes",
    )?;

    let admin_prefix = cache
        .admin_prefix
        .unwrap_or_else(|| DEFAULT_ADMIN_PREFIX.to_string());
    if admin_prefix.trim().is_empty() {
        return Err(LoadError::invalid(
            "cache.admin_prefix",
            "prefix must not be empty",
        ));
    }

    let rules = match cache.rules {
        Some(rules) => rules,
        None => default_cache_rules(),
    };
    for rule in &rules {
        if rule.pattern.trim().is_empty() {
            return Err(LoadError::invalid(
                "cache.rules",
                "rule pattern must not be empty",
            ));
        }
    }

    Ok(CacheSettings {
        default_minutes,
        admin_prefix,
        rules,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
    guest_max_requests: Option<u64>,
    user_max_requests: Option<u64>,
    admin_max_requests: Option<u64>,
    fail_closed: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_minutes: Option<u64>,
    admin_prefix: Option<String>,
    rules: Option<Vec<CacheRuleSetting>>,
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

fn non_zero_or_min(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tiers() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.rate_limit.window_seconds.get(), 60);
        assert_eq!(settings.rate_limit.limit_for(Tier::Guest), 60);
        assert_eq!(settings.rate_limit.limit_for(Tier::User), 120);
        assert_eq!(settings.rate_limit.limit_for(Tier::Admin), 240);
        assert!(!settings.rate_limit.fail_closed);
        assert_eq!(settings.cache.default_minutes.get(), 5);
    }

    #[test]
    fn default_cache_rules_put_specific_patterns_first() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        let first = &settings.cache.rules[0];
        assert_eq!(first.pattern, "settings");
        assert_eq!(first.duration_minutes, 30);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.rate_limit.guest_max_requests = Some(10);

        let overrides = ServeOverrides {
            server_port: Some(4321),
            rate_limit_guest_max_requests: Some(90),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.rate_limit.limit_for(Tier::Guest), 90);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut raw = RawSettings::default();
        raw.rate_limit.window_seconds = Some(0);

        let err = Settings::from_raw(raw).expect_err("zero window must fail");
        assert!(matches!(err, LoadError::Invalid { key, .. } if key == "rate_limit.window_seconds"));
    }

    #[test]
    fn empty_rule_pattern_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.rules = Some(vec![CacheRuleSetting {
            pattern: "  ".to_string(),
            duration_minutes: 5,
        }]);

        let err = Settings::from_raw(raw).expect_err("blank pattern must fail");
        assert!(matches!(err, LoadError::Invalid { key, .. } if key == "cache.rules"));
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "varco",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--rate-limit-fail-closed",
            "true",
            "--cache-default-minutes",
            "10",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(serve.overrides.rate_limit_fail_closed, Some(true));
                assert_eq!(serve.overrides.cache_default_minutes, Some(10));
            }
        }
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["varco"]);
        assert!(args.command.is_none());

        let settings = load(&args).expect("defaults load");
        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    }
}
