use anyhow::{Context, Result};
use aws_sdk_elasticache::Client as ElastiCacheClient;
use aws_sdk_resourcegroupstagging::Client as TaggingClient;
use tracing::{info, warn};

use crate::clients::AwsClients;
use crate::config::Config;
use crate::discovery;
use crate::status::KindStatus;
use crate::tags::{fallback_name, RequiredTags};

/// Handler for the environment's ElastiCache replication group.
///
/// The replication-group API has no pause/resume primitive, so shutdown and
/// startup only log intent. Availability is unaffected and billing does not
/// stop; this is a known limitation, not an oversight.
pub struct ElastiCacheManager {
    elasticache: ElastiCacheClient,
    tagging: TaggingClient,
    environment: String,
    project: String,
    region: String,
    required: RequiredTags,
}

impl ElastiCacheManager {
    pub fn new(clients: &AwsClients, config: &Config) -> Self {
        Self {
            elasticache: clients.elasticache.clone(),
            tagging: clients.tagging.clone(),
            environment: config.environment.clone(),
            project: config.project.clone(),
            region: config.region.clone(),
            required: RequiredTags::new(&config.environment, &config.project),
        }
    }

    /// Resolve the replication group id via tag scan, falling back to the
    /// naming convention when discovery yields nothing.
    async fn locate(&self) -> String {
        match discovery::find_tagged_resources(
            &self.tagging,
            "elasticache:replicationgroup",
            &self.required,
        )
        .await
        {
            Ok(arns) if !arns.is_empty() => {
                if arns.len() > 1 {
                    warn!(count = arns.len(), "Multiple tagged replication groups found, using the first");
                }
                extract_replication_group_id(&arns[0])
            }
            Ok(_) => {
                let name = fallback_name(&self.environment, &self.project, "redis", &self.region);
                info!(group = %name, "No tagged replication group found, using naming fallback");
                name
            }
            Err(err) => {
                let name = fallback_name(&self.environment, &self.project, "redis", &self.region);
                warn!(error = %err, group = %name, "ElastiCache tag discovery failed, using naming fallback");
                name
            }
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        let group_id = self.locate().await;
        info!(
            group = %group_id,
            "ElastiCache replication groups cannot be paused, skipping (billing continues)"
        );
        Ok(())
    }

    pub async fn startup(&self) -> Result<()> {
        let group_id = self.locate().await;
        info!(
            group = %group_id,
            "ElastiCache replication groups are never paused, nothing to resume"
        );
        Ok(())
    }

    pub async fn status(&self) -> Result<KindStatus> {
        let group_id = self.locate().await;
        match self
            .elasticache
            .describe_replication_groups()
            .replication_group_id(&group_id)
            .send()
            .await
        {
            Ok(response) => {
                let state = response
                    .replication_groups()
                    .first()
                    .and_then(|group| group.status())
                    .unwrap_or("unknown")
                    .to_string();
                Ok(KindStatus::new(
                    state.clone(),
                    format!("Replication group {group_id} is {state}"),
                ))
            }
            Err(err) => {
                let err = err.into_service_error();
                if err.is_replication_group_not_found_fault() {
                    Ok(KindStatus::new(
                        "not-found",
                        format!("Replication group {group_id} does not exist"),
                    ))
                } else {
                    Err(err).with_context(|| format!("describe replication group {group_id}"))
                }
            }
        }
    }
}

/// Extract the replication group id from an ElastiCache ARN.
///
/// Expected ARN format:
/// `arn:aws:elasticache:region:account:replicationgroup:group-id`
fn extract_replication_group_id(arn: &str) -> String {
    arn.split(':').last().unwrap_or(arn).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_group_id_from_arn() {
        assert_eq!(
            extract_replication_group_id(
                "arn:aws:elasticache:eu-west-1:123456789012:replicationgroup:dev-legitmark-redis"
            ),
            "dev-legitmark-redis"
        );
    }
}
