//! Environment-based configuration types for the authorization server runtime.

use anyhow::Result;
use std::path::PathBuf;

use crate::errors::ConfigError;
use crate::keys::SigningAlgorithm;

/// HTTP server port configuration
#[derive(Clone, Debug)]
pub struct HttpPort(u16);

/// Issuer identifier; the externally visible base URL without a trailing slash
#[derive(Clone, Debug)]
pub struct Issuer(String);

/// Signing algorithms to provision keys for, first is the default
#[derive(Clone, Debug)]
pub struct SigningAlgorithms(Vec<SigningAlgorithm>);

/// A lifetime parsed from a duration string such as `5m` or `1h`
#[derive(Clone, Copy, Debug)]
pub struct Lifetime(chrono::Duration);

/// Main application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    pub issuer: Issuer,
    pub signing_algorithms: SigningAlgorithms,
    pub signing_keys_path: Option<PathBuf>,
    pub default_access_token_lifetime: Lifetime,
    pub default_identity_token_lifetime: Lifetime,
    pub default_authorization_code_lifetime: Lifetime,
    pub default_consent_lifetime: Option<Lifetime>,
    pub key_rotation_check_interval: Lifetime,
    /// Shared secret of the seeded confidential client; it is not registered when unset
    pub demo_client_secret: Option<String>,
    /// Accept the unauthenticated identity headers of the login flow. Development only,
    /// or behind a proxy that sets them and strips them from client requests.
    pub trust_identity_headers: bool,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let http_port: HttpPort = default_env("HTTP_PORT", "8080").try_into()?;
        let issuer: Issuer = require_env("EXTERNAL_BASE")?.try_into()?;
        let signing_algorithms: SigningAlgorithms =
            default_env("SIGNING_ALGORITHMS", "RS256").try_into()?;
        let signing_keys_path = optional_env("SIGNING_KEYS_PATH")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let default_access_token_lifetime: Lifetime =
            default_env("DEFAULT_ACCESS_TOKEN_LIFETIME", "1h").try_into()?;
        let default_identity_token_lifetime: Lifetime =
            default_env("DEFAULT_IDENTITY_TOKEN_LIFETIME", "5m").try_into()?;
        let default_authorization_code_lifetime: Lifetime =
            default_env("DEFAULT_AUTHORIZATION_CODE_LIFETIME", "5m").try_into()?;
        let default_consent_lifetime = optional_env("DEFAULT_CONSENT_LIFETIME")
            .filter(|value| !value.is_empty())
            .map(Lifetime::try_from)
            .transpose()?;
        let key_rotation_check_interval: Lifetime =
            default_env("KEY_ROTATION_CHECK_INTERVAL", "10m").try_into()?;
        let demo_client_secret = optional_env("DEMO_CLIENT_SECRET").filter(|value| !value.is_empty());
        let trust_identity_headers = parse_bool(
            "TRUST_IDENTITY_HEADERS",
            &default_env("TRUST_IDENTITY_HEADERS", "false"),
        )?;

        Ok(Self {
            version: version()?,
            http_port,
            issuer,
            signing_algorithms,
            signing_keys_path,
            default_access_token_lifetime,
            default_identity_token_lifetime,
            default_authorization_code_lifetime,
            default_consent_lifetime,
            key_rotation_check_interval,
            demo_client_secret,
            trust_identity_headers,
        })
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired(name.to_string()).into())
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" => Ok(false),
        "true" | "1" | "yes" => Ok(true),
        _ => Err(ConfigError::InvalidBoolean(name.to_string(), value.to_string()).into()),
    }
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Ok(Self(8080))
        } else {
            value
                .parse::<u16>()
                .map(Self)
                .map_err(|err| ConfigError::PortParsingFailed(err).into())
        }
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for Issuer {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = url::Url::parse(&value)
            .map_err(|e| ConfigError::InvalidIssuer(value.clone(), e.to_string()))?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(ConfigError::InvalidIssuer(value, "scheme must be http or https".to_string()).into());
        }
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(ConfigError::InvalidIssuer(
                value,
                "issuer must not carry a query or fragment".to_string(),
            )
            .into());
        }
        Ok(Self(value.trim_end_matches('/').to_string()))
    }
}

impl AsRef<str> for Issuer {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SigningAlgorithms {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut algorithms = Vec::new();
        for name in value.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let algorithm: SigningAlgorithm = name
                .parse()
                .map_err(|_| ConfigError::UnsupportedAlgorithm(name.to_string()))?;
            if !algorithms.contains(&algorithm) {
                algorithms.push(algorithm);
            }
        }
        if algorithms.is_empty() {
            algorithms.push(SigningAlgorithm::RS256);
        }
        Ok(Self(algorithms))
    }
}

impl AsRef<Vec<SigningAlgorithm>> for SigningAlgorithms {
    fn as_ref(&self) -> &Vec<SigningAlgorithm> {
        &self.0
    }
}

impl TryFrom<String> for Lifetime {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl AsRef<chrono::Duration> for Lifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}
