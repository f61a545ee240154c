use anyhow::{bail, Context, Result};
use aws_sdk_apprunner::Client as AppRunnerClient;
use aws_sdk_resourcegroupstagging::Client as TaggingClient;
use tracing::{info, warn};

use crate::clients::AwsClients;
use crate::config::Config;
use crate::discovery;
use crate::status::KindStatus;
use crate::tags::{fallback_name, RequiredTags};

/// Shutdown/startup handler for the environment's App Runner service.
///
/// Shutdown pauses the service; startup resumes it. Both tolerate the
/// service already being in the target state.
pub struct AppRunnerManager {
    apprunner: AppRunnerClient,
    tagging: TaggingClient,
    environment: String,
    project: String,
    region: String,
    required: RequiredTags,
}

impl AppRunnerManager {
    pub fn new(clients: &AwsClients, config: &Config) -> Self {
        Self {
            apprunner: clients.apprunner.clone(),
            tagging: clients.tagging.clone(),
            environment: config.environment.clone(),
            project: config.project.clone(),
            region: config.region.clone(),
            required: RequiredTags::new(&config.environment, &config.project),
        }
    }

    /// Resolve the service ARN via tag scan; when discovery yields nothing,
    /// fall back to scanning the service list for the conventional name.
    async fn locate(&self) -> Result<String> {
        match discovery::find_tagged_resources(&self.tagging, "apprunner:service", &self.required)
            .await
        {
            Ok(arns) if !arns.is_empty() => {
                if arns.len() > 1 {
                    warn!(count = arns.len(), "Multiple tagged App Runner services found, using the first");
                }
                Ok(arns[0].clone())
            }
            Ok(_) => self.locate_by_name().await,
            Err(err) => {
                warn!(error = %err, "App Runner tag discovery failed, falling back to name lookup");
                self.locate_by_name().await
            }
        }
    }

    async fn locate_by_name(&self) -> Result<String> {
        let expected = fallback_name(&self.environment, &self.project, "app", &self.region);
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.apprunner.list_services();
            if let Some(ref token) = next_token {
                request = request.next_token(token);
            }

            let response = request.send().await.context("list App Runner services")?;

            for service in response.service_summary_list() {
                if service.service_name() == Some(expected.as_str()) {
                    if let Some(arn) = service.service_arn() {
                        info!(service = %expected, "Found App Runner service by naming fallback");
                        return Ok(arn.to_string());
                    }
                }
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        bail!("no App Runner service found by tags or by name {expected}")
    }

    pub async fn shutdown(&self) -> Result<()> {
        let service_arn = self.locate().await?;
        let service_name = extract_service_name(&service_arn);
        info!(service = %service_name, "Pausing App Runner service");

        if let Err(err) = self
            .apprunner
            .pause_service()
            .service_arn(&service_arn)
            .send()
            .await
        {
            let err = err.into_service_error();
            if err.is_invalid_state_exception() {
                info!(service = %service_name, "App Runner service is not running, treating as paused");
            } else {
                return Err(err).with_context(|| format!("pause App Runner service {service_name}"));
            }
        }
        Ok(())
    }

    pub async fn startup(&self) -> Result<()> {
        let service_arn = self.locate().await?;
        let service_name = extract_service_name(&service_arn);
        info!(service = %service_name, "Resuming App Runner service");

        if let Err(err) = self
            .apprunner
            .resume_service()
            .service_arn(&service_arn)
            .send()
            .await
        {
            let err = err.into_service_error();
            if err.is_invalid_state_exception() {
                info!(service = %service_name, "App Runner service is not paused, treating as resumed");
            } else {
                return Err(err).with_context(|| format!("resume App Runner service {service_name}"));
            }
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<KindStatus> {
        let service_arn = self.locate().await?;
        let service_name = extract_service_name(&service_arn);

        let response = self
            .apprunner
            .describe_service()
            .service_arn(&service_arn)
            .send()
            .await
            .with_context(|| format!("describe App Runner service {service_name}"))?;

        let state = response
            .service()
            .map(|service| service.status().as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(KindStatus::new(
            state.clone(),
            format!("App Runner service {service_name} is {state}"),
        ))
    }
}

/// Extract the service name from an App Runner service ARN.
///
/// Expected ARN format: `arn:aws:apprunner:region:account:service/name/id`
fn extract_service_name(arn: &str) -> String {
    let parts: Vec<&str> = arn.split('/').collect();
    if parts.len() >= 2 {
        parts[parts.len() - 2].to_string()
    } else {
        arn.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_service_name_from_arn() {
        assert_eq!(
            extract_service_name(
                "arn:aws:apprunner:eu-west-1:123456789012:service/dev-legitmark-app/8fe1e10304f84fd2b0df550fe98a71fa"
            ),
            "dev-legitmark-app"
        );
    }

    #[test]
    fn passes_through_non_arn_input() {
        assert_eq!(extract_service_name("plain-name"), "plain-name");
    }
}
