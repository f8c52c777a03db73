use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vapi_core::{AppError, AppResult, NonEmptyString};

/// Named token bucket configuration: `capacity` tokens refilled over `window_seconds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    name: NonEmptyString,
    capacity: u32,
    window_seconds: u32,
    priority: i32,
    emit_headers: bool,
    rejection_headers: bool,
}

impl RateLimitPolicy {
    /// Creates a policy with default priority that reports itself in response headers.
    pub fn new(name: impl Into<String>, capacity: u32, window_seconds: u32) -> AppResult<Self> {
        let name = NonEmptyString::new(name)?;
        if name.as_str().contains(['"', ',', ';', ':']) {
            return Err(AppError::Validation(format!(
                "rate limit policy name '{}' must not contain quotes, commas, semicolons or colons",
                name.as_str()
            )));
        }

        if capacity == 0 {
            return Err(AppError::Validation(format!(
                "rate limit policy '{}' capacity must be greater than zero",
                name.as_str()
            )));
        }

        if window_seconds == 0 {
            return Err(AppError::Validation(format!(
                "rate limit policy '{}' window_seconds must be greater than zero",
                name.as_str()
            )));
        }

        Ok(Self {
            name,
            capacity,
            window_seconds,
            priority: 0,
            emit_headers: true,
            rejection_headers: true,
        })
    }

    /// Sets the evaluation priority. Lower values are evaluated first.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Controls whether the policy is reported in `RateLimit` headers.
    #[must_use]
    pub fn with_headers(mut self, emit_headers: bool) -> Self {
        self.emit_headers = emit_headers;
        self
    }

    /// Controls whether a 429 caused by this policy still carries `RateLimit` headers.
    #[must_use]
    pub fn with_rejection_headers(mut self, rejection_headers: bool) -> Self {
        self.rejection_headers = rejection_headers;
        self
    }

    /// Returns the policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the bucket capacity in whole tokens.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the time in seconds to refill an empty bucket.
    #[must_use]
    pub fn window_seconds(&self) -> u32 {
        self.window_seconds
    }

    /// Returns the evaluation priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns whether the policy is reported in response headers.
    #[must_use]
    pub fn emit_headers(&self) -> bool {
        self.emit_headers
    }

    /// Returns whether rejections by this policy carry `RateLimit` headers.
    #[must_use]
    pub fn rejection_headers(&self) -> bool {
        self.rejection_headers
    }
}

/// Parses `name:capacity:window_seconds[:priority][:flag...]`.
///
/// Flags: `no_headers` hides the policy from `RateLimit` headers,
/// `no_429_headers` drops those headers from rejections it causes.
impl FromStr for RateLimitPolicy {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split(':').map(str::trim).collect();
        if parts.len() < 3 {
            return Err(AppError::Validation(format!(
                "invalid rate limit policy '{value}', expected name:capacity:window_seconds[:priority][:flag...]"
            )));
        }

        let capacity = parse_number::<u32>(parts[1], "capacity", value)?;
        let window_seconds = parse_number::<u32>(parts[2], "window_seconds", value)?;
        let mut policy = Self::new(parts[0], capacity, window_seconds)?;

        let mut options = parts[3..].iter().peekable();
        if let Some(priority) = options.next_if(|raw| raw.parse::<i32>().is_ok()) {
            policy = policy.with_priority(parse_number::<i32>(priority, "priority", value)?);
        }

        for flag in options {
            policy = match *flag {
                "no_headers" => policy.with_headers(false),
                "no_429_headers" => policy.with_rejection_headers(false),
                other => {
                    return Err(AppError::Validation(format!(
                        "unknown flag '{other}' in rate limit policy '{value}'"
                    )));
                }
            };
        }

        Ok(policy)
    }
}

fn parse_number<T>(raw: &str, field: &str, policy: &str) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|error| {
        AppError::Validation(format!(
            "invalid {field} '{raw}' in rate limit policy '{policy}': {error}"
        ))
    })
}

/// Policies bound to one path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicyBinding {
    path_prefix: String,
    policies: Vec<RateLimitPolicy>,
}

impl RoutePolicyBinding {
    /// Creates a binding for requests whose path starts with `path_prefix`.
    pub fn new(path_prefix: impl Into<String>, policies: Vec<RateLimitPolicy>) -> AppResult<Self> {
        let path_prefix = path_prefix.into();
        validate_prefix(&path_prefix)?;

        Ok(Self {
            path_prefix,
            policies,
        })
    }

    /// Returns the path prefix.
    #[must_use]
    pub fn path_prefix(&self) -> &str {
        self.path_prefix.as_str()
    }

    /// Returns whether the binding applies to the given request path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        prefix_matches(&self.path_prefix, path)
    }
}

/// Prefix match on path segment boundaries: `/api/dice` matches
/// `/api/dice/1` but not `/api/dicex`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn validate_prefix(prefix: &str) -> AppResult<()> {
    if !prefix.starts_with('/') {
        return Err(AppError::Validation(format!(
            "route policy prefix '{prefix}' must start with '/'"
        )));
    }
    Ok(())
}

/// Global policies plus per-route bindings and paths exempt from limiting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePolicies {
    global: Vec<RateLimitPolicy>,
    routes: Vec<RoutePolicyBinding>,
    excluded: Vec<String>,
}

impl RoutePolicies {
    /// Creates a policy set. Policy names must be unique across the set.
    pub fn new(global: Vec<RateLimitPolicy>, routes: Vec<RoutePolicyBinding>) -> AppResult<Self> {
        let mut names: Vec<&str> = global
            .iter()
            .chain(routes.iter().flat_map(|route| route.policies.iter()))
            .map(RateLimitPolicy::name)
            .collect();
        names.sort_unstable();
        if let Some(window) = names.windows(2).find(|window| window[0] == window[1]) {
            return Err(AppError::Validation(format!(
                "rate limit policy name '{}' is declared more than once",
                window[0]
            )));
        }

        Ok(Self {
            global,
            routes,
            excluded: Vec::new(),
        })
    }

    /// Exempts every path under the given prefixes from rate limiting.
    pub fn with_excluded_prefixes(mut self, prefixes: Vec<String>) -> AppResult<Self> {
        for prefix in &prefixes {
            validate_prefix(prefix)?;
        }
        self.excluded = prefixes;
        Ok(self)
    }

    /// Returns whether `path` is exempt from rate limiting.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded
            .iter()
            .any(|prefix| prefix_matches(prefix, path))
    }

    /// Returns every policy that applies to `path`, ordered by priority.
    ///
    /// Global policies come before route policies of equal priority.
    #[must_use]
    pub fn policies_for(&self, path: &str) -> Vec<RateLimitPolicy> {
        if self.is_excluded(path) {
            return Vec::new();
        }

        let mut policies: Vec<RateLimitPolicy> = self
            .global
            .iter()
            .chain(
                self.routes
                    .iter()
                    .filter(|route| route.matches(path))
                    .flat_map(|route| route.policies.iter()),
            )
            .cloned()
            .collect();
        policies.sort_by_key(RateLimitPolicy::priority);
        policies
    }
}
