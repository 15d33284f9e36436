//! Configuration types, built from environment variables.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// What the workflow does when the gateway fails to produce a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Move to an explicit failed step; the operator must retry.
    #[default]
    Surface,
    /// Land in the generated step with an empty draft.
    Parity,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surface" => Ok(Self::Surface),
            "parity" => Ok(Self::Parity),
            other => Err(format!("Unknown failure policy: {}", other)),
        }
    }
}

/// Workflow behaviour switches.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub failure_policy: FailurePolicy,
    /// Reject batches with empty/invalid emails or websites before generating.
    pub validate_records: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Surface,
            validate_records: true,
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("LEAD_REACTIVATOR_FAILURE_POLICY") {
            config.failure_policy =
                raw.parse()
                    .map_err(|message| ConfigError::InvalidValue {
                        key: "LEAD_REACTIVATOR_FAILURE_POLICY".into(),
                        message,
                    })?;
        }

        if let Ok(raw) = std::env::var("LEAD_REACTIVATOR_VALIDATE_RECORDS") {
            config.validate_records = parse_bool("LEAD_REACTIVATOR_VALIDATE_RECORDS", &raw)?;
        }

        Ok(config)
    }
}

/// Webhook gateway endpoints.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub generate_url: String,
    pub revise_url: String,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(generate_url: impl Into<String>) -> Self {
        let generate_url = generate_url.into();
        Self {
            revise_url: generate_url.clone(),
            generate_url,
            timeout: Duration::from_secs(60),
        }
    }

    /// `LEAD_REACTIVATOR_GENERATE_URL` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let generate_url = std::env::var("LEAD_REACTIVATOR_GENERATE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("LEAD_REACTIVATOR_GENERATE_URL".into()))?;
        let mut config = Self::new(generate_url);

        if let Ok(url) = std::env::var("LEAD_REACTIVATOR_REVISE_URL") {
            config.revise_url = url;
        }

        if let Ok(raw) = std::env::var("LEAD_REACTIVATOR_GATEWAY_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "LEAD_REACTIVATOR_GATEWAY_TIMEOUT_SECS".into(),
                message: format!("not a number of seconds: {}", raw),
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// SMTP sink configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Subject line; `{website}` and `{email}` are substituted per record.
    pub subject: String,
}

pub const DEFAULT_SUBJECT: &str = "Quick question about {website}";

impl SmtpConfig {
    /// Returns `None` if `SMTP_HOST` is not set (sink disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;

        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let subject = std::env::var("SMTP_SUBJECT").unwrap_or_else(|_| DEFAULT_SUBJECT.to_string());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
            subject,
        })
    }
}

/// Process-level settings for the binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub log_dir: Option<std::path::PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("LEAD_REACTIVATOR_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "LEAD_REACTIVATOR_PORT".into(),
                message: format!("not a port: {}", raw),
            })?,
            Err(_) => 8080,
        };
        let log_dir = std::env::var("LEAD_REACTIVATOR_LOG_DIR")
            .ok()
            .map(std::path::PathBuf::from);
        Ok(Self { port, log_dir })
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {}", raw),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parses_case_insensitively() {
        assert_eq!("Surface".parse::<FailurePolicy>(), Ok(FailurePolicy::Surface));
        assert_eq!(" parity ".parse::<FailurePolicy>(), Ok(FailurePolicy::Parity));
        assert!("strict".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn revise_url_defaults_to_generate_url() {
        let config = GatewayConfig::new("http://localhost/hook");
        assert_eq!(config.revise_url, "http://localhost/hook");
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("K", "YES").unwrap());
        assert!(!parse_bool("K", "off").unwrap());
        assert!(matches!(
            parse_bool("K", "maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn workflow_defaults_surface_failures_and_validate() {
        let config = WorkflowConfig::default();
        assert_eq!(config.failure_policy, FailurePolicy::Surface);
        assert!(config.validate_records);
    }
}
