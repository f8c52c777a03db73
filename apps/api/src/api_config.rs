use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use url::Url;
use vapi_application::StoreFailureMode;
use vapi_core::AppError;
use vapi_domain::{RateLimitPolicy, RoutePolicies, RoutePolicyBinding};

const DEFAULT_RATE_LIMIT_POLICIES: &str = "burst:10:1,sustained:100:60";
const MIN_CREDENTIAL_SECRET_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackendConfig {
    InMemory,
    Redis { url: String },
}

impl StoreBackendConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::Redis { .. } => "redis",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_host: String,
    pub api_port: u16,
    pub upstream_url: Url,
    pub upstream_timeout: Duration,
    pub store_backend: StoreBackendConfig,
    pub store_key_prefix: String,
    pub route_policies: RoutePolicies,
    pub rate_limit_failure_mode: StoreFailureMode,
    pub idempotency_failure_mode: StoreFailureMode,
    pub idempotency_pending_timeout: Duration,
    pub idempotency_wait_timeout: Duration,
    pub credential_fingerprint_secret: String,
    pub max_request_body_bytes: usize,
    pub cors_allowed_origin: Option<String>,
    pub store_purge_interval: Duration,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let api_port = env::var("API_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3001);

        let upstream_url = Url::parse(&required_non_empty_env("UPSTREAM_URL")?)
            .map_err(|error| AppError::Validation(format!("invalid UPSTREAM_URL: {error}")))?;
        let upstream_timeout = Duration::from_secs(seconds_env("UPSTREAM_TIMEOUT_SECONDS", 30)?);

        let store_backend = match env::var("KEY_VALUE_STORE")
            .unwrap_or_else(|_| "in_memory".to_owned())
            .as_str()
        {
            "in_memory" => StoreBackendConfig::InMemory,
            "redis" => StoreBackendConfig::Redis {
                url: required_non_empty_env("REDIS_URL")?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "KEY_VALUE_STORE must be either 'in_memory' or 'redis', got '{other}'"
                )));
            }
        };
        let store_key_prefix = env::var("STORE_KEY_PREFIX")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "vapi".to_owned());

        let global_policies = parse_policy_list(
            &env::var("RATE_LIMIT_POLICIES")
                .unwrap_or_else(|_| DEFAULT_RATE_LIMIT_POLICIES.to_owned()),
            ',',
        )?;
        let route_bindings = env::var("RATE_LIMIT_ROUTE_POLICIES")
            .ok()
            .map(|value| parse_route_bindings(&value))
            .transpose()?
            .unwrap_or_default();
        let excluded_paths = env::var("RATE_LIMIT_EXCLUDED_PATHS")
            .map(|value| parse_path_list(&value))
            .unwrap_or_default();
        let route_policies = RoutePolicies::new(global_policies, route_bindings)?
            .with_excluded_prefixes(excluded_paths)?;

        let rate_limit_failure_mode = failure_mode_env("RATE_LIMIT_FAILURE_MODE", "fail_closed")?;
        let idempotency_failure_mode = failure_mode_env("IDEMPOTENCY_FAILURE_MODE", "fail_open")?;
        let idempotency_pending_timeout =
            Duration::from_secs(seconds_env("IDEMPOTENCY_PENDING_TIMEOUT_SECONDS", 60)?);
        let idempotency_wait_timeout =
            Duration::from_secs(seconds_env("IDEMPOTENCY_WAIT_TIMEOUT_SECONDS", 30)?);
        if idempotency_pending_timeout <= upstream_timeout {
            tracing::warn!(
                "IDEMPOTENCY_PENDING_TIMEOUT_SECONDS does not exceed UPSTREAM_TIMEOUT_SECONDS; slow upstream calls may be executed twice"
            );
        }

        let credential_fingerprint_secret = required_env("CREDENTIAL_FINGERPRINT_SECRET")?;
        if credential_fingerprint_secret.len() < MIN_CREDENTIAL_SECRET_LENGTH {
            return Err(AppError::Validation(format!(
                "CREDENTIAL_FINGERPRINT_SECRET must be at least {MIN_CREDENTIAL_SECRET_LENGTH} characters"
            )));
        }

        let max_request_body_bytes = env::var("MAX_REQUEST_BODY_BYTES")
            .ok()
            .map(|value| {
                value.parse::<usize>().map_err(|error| {
                    AppError::Validation(format!("invalid MAX_REQUEST_BODY_BYTES: {error}"))
                })
            })
            .transpose()?
            .unwrap_or(2 * 1024 * 1024);

        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let store_purge_interval =
            Duration::from_secs(seconds_env("STORE_PURGE_INTERVAL_SECONDS", 60)?);

        Ok(Self {
            api_host,
            api_port,
            upstream_url,
            upstream_timeout,
            store_backend,
            store_key_prefix,
            route_policies,
            rate_limit_failure_mode,
            idempotency_failure_mode,
            idempotency_pending_timeout,
            idempotency_wait_timeout,
            credential_fingerprint_secret,
            max_request_body_bytes,
            cors_allowed_origin,
            store_purge_interval,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Internal(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Parses `name:capacity:window[:priority]` items separated by `separator`.
fn parse_policy_list(value: &str, separator: char) -> Result<Vec<RateLimitPolicy>, AppError> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::parse::<RateLimitPolicy>)
        .collect()
}

/// Parses comma-separated path prefixes.
fn parse_path_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|prefix| !prefix.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parses `prefix=policy;policy|prefix=policy` route bindings.
fn parse_route_bindings(value: &str) -> Result<Vec<RoutePolicyBinding>, AppError> {
    value
        .split('|')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (prefix, policies) = entry.split_once('=').ok_or_else(|| {
                AppError::Validation(format!(
                    "invalid RATE_LIMIT_ROUTE_POLICIES entry '{entry}', expected prefix=policies"
                ))
            })?;
            RoutePolicyBinding::new(prefix.trim(), parse_policy_list(policies, ';')?)
        })
        .collect()
}

fn failure_mode_env(name: &str, default: &str) -> Result<StoreFailureMode, AppError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_owned())
        .parse::<StoreFailureMode>()
        .map_err(|error| AppError::Validation(format!("invalid {name}: {}", error.detail())))
}

fn seconds_env(name: &str, default: u64) -> Result<u64, AppError> {
    let Ok(value) = env::var(name) else {
        return Ok(default);
    };

    match value.trim().parse::<u64>() {
        Ok(0) => Err(AppError::Validation(format!(
            "{name} must be greater than zero"
        ))),
        Ok(seconds) => Ok(seconds),
        Err(error) => Err(AppError::Validation(format!("invalid {name}: {error}"))),
    }
}

fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn required_non_empty_env(name: &str) -> Result<String, AppError> {
    let value = required_env(name)?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}
