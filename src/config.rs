use anyhow::{bail, Context, Result};
use std::env;

/// Environment name that the shutdown/startup guard refuses to touch.
pub const PRODUCTION_ENVIRONMENT: &str = "prod";

/// Application configuration loaded from environment variables.
///
/// Required variables:
/// - `ENVIRONMENT`: environment name (`dev`, `staging`, ...); `prod` arms the
///   guard that rejects shutdown/startup
/// - `AWS_REGION` (or `AWS_DEFAULT_REGION`): region to operate in
/// - `PROJECT_NAME`: project tag value for resource discovery
///
/// Optional variables:
/// - `SELF_FUNCTION_ARN`: ARN of the function running this manager, excluded
///   from the Lambda sweep
/// - `PORT`: HTTP listen port (default: `8080`)
/// - `SCHEDULE_GROUP`: EventBridge Scheduler group (default: `default`)
/// - `SCHEDULE_TARGET_ARN` / `SCHEDULE_ROLE_ARN`: target and execution role
///   for created schedules; schedule creation fails without them
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub region: String,
    pub project: String,
    pub self_function_arn: Option<String>,
    pub port: u16,
    pub schedule_group: String,
    pub schedule_target_arn: Option<String>,
    pub schedule_role_arn: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment = var("ENVIRONMENT").context("ENVIRONMENT env var is required")?;
        if environment.trim().is_empty() {
            bail!("ENVIRONMENT must not be empty");
        }

        let region = var("AWS_REGION")
            .or_else(|| var("AWS_DEFAULT_REGION"))
            .context("AWS_REGION or AWS_DEFAULT_REGION env var is required")?;

        let project = var("PROJECT_NAME").context("PROJECT_NAME env var is required")?;

        let port = match var("PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid PORT '{}': must be a port number", raw))?,
            None => 8080,
        };

        Ok(Self {
            environment,
            region,
            project,
            self_function_arn: var("SELF_FUNCTION_ARN"),
            port,
            schedule_group: var("SCHEDULE_GROUP").unwrap_or_else(|| "default".to_string()),
            schedule_target_arn: var("SCHEDULE_TARGET_ARN"),
            schedule_role_arn: var("SCHEDULE_ROLE_ARN"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == PRODUCTION_ENVIRONMENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars(name: &str) -> Option<String> {
        match name {
            "ENVIRONMENT" => Some("dev".to_string()),
            "AWS_REGION" => Some("eu-west-1".to_string()),
            "PROJECT_NAME" => Some("legitmark".to_string()),
            _ => None,
        }
    }

    #[test]
    fn loads_required_vars() {
        let config = Config::from_lookup(base_vars).unwrap();
        assert_eq!(config.environment, "dev");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.project, "legitmark");
        assert_eq!(config.port, 8080);
        assert_eq!(config.schedule_group, "default");
        assert!(!config.is_production());
    }

    #[test]
    fn missing_environment_fails() {
        let result = Config::from_lookup(|name| match name {
            "ENVIRONMENT" => None,
            other => base_vars(other),
        });
        assert!(result.is_err());
    }

    #[test]
    fn falls_back_to_default_region_var() {
        let config = Config::from_lookup(|name| match name {
            "AWS_REGION" => None,
            "AWS_DEFAULT_REGION" => Some("us-east-2".to_string()),
            other => base_vars(other),
        })
        .unwrap();
        assert_eq!(config.region, "us-east-2");
    }

    #[test]
    fn invalid_port_fails() {
        let result = Config::from_lookup(|name| match name {
            "PORT" => Some("not-a-port".to_string()),
            other => base_vars(other),
        });
        assert!(result.is_err());
    }

    #[test]
    fn prod_environment_is_detected() {
        let config = Config::from_lookup(|name| match name {
            "ENVIRONMENT" => Some("prod".to_string()),
            other => base_vars(other),
        })
        .unwrap();
        assert!(config.is_production());
    }
}
