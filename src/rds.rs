use anyhow::{Context, Result};
use aws_sdk_rds::Client as RdsClient;
use aws_sdk_resourcegroupstagging::Client as TaggingClient;
use tracing::{info, warn};

use crate::clients::AwsClients;
use crate::config::Config;
use crate::discovery;
use crate::status::KindStatus;
use crate::tags::{fallback_name, RequiredTags};

/// Shutdown/startup handler for the environment's RDS database.
///
/// The `dev` environment runs a single DB instance; every other environment
/// runs an Aurora cluster. This fork is fixed policy, not resource-driven.
pub struct RdsManager {
    rds: RdsClient,
    tagging: TaggingClient,
    environment: String,
    project: String,
    region: String,
    required: RequiredTags,
}

enum RdsTarget {
    Instance(String),
    Cluster(String),
}

impl RdsManager {
    pub fn new(clients: &AwsClients, config: &Config) -> Self {
        Self {
            rds: clients.rds.clone(),
            tagging: clients.tagging.clone(),
            environment: config.environment.clone(),
            project: config.project.clone(),
            region: config.region.clone(),
            required: RequiredTags::new(&config.environment, &config.project),
        }
    }

    fn is_instance_environment(&self) -> bool {
        self.environment == "dev"
    }

    /// Resolve the live database identifier via tag scan, falling back to
    /// the naming convention when discovery yields nothing.
    async fn locate(&self) -> RdsTarget {
        let resource_type = if self.is_instance_environment() {
            "rds:db"
        } else {
            "rds:cluster"
        };

        let identifier = match discovery::find_tagged_resources(
            &self.tagging,
            resource_type,
            &self.required,
        )
        .await
        {
            Ok(arns) if !arns.is_empty() => {
                if arns.len() > 1 {
                    warn!(count = arns.len(), "Multiple tagged RDS resources found, using the first");
                }
                extract_rds_id(&arns[0])
            }
            Ok(_) => {
                let name = fallback_name(&self.environment, &self.project, "db", &self.region);
                info!(identifier = %name, "No tagged RDS resource found, using naming fallback");
                name
            }
            Err(err) => {
                let name = fallback_name(&self.environment, &self.project, "db", &self.region);
                warn!(error = %err, identifier = %name, "RDS tag discovery failed, using naming fallback");
                name
            }
        };

        if self.is_instance_environment() {
            RdsTarget::Instance(identifier)
        } else {
            RdsTarget::Cluster(identifier)
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        match self.locate().await {
            RdsTarget::Instance(id) => self.stop_instance(&id).await,
            RdsTarget::Cluster(id) => self.stop_cluster(&id).await,
        }
    }

    pub async fn startup(&self) -> Result<()> {
        match self.locate().await {
            RdsTarget::Instance(id) => self.start_instance(&id).await,
            RdsTarget::Cluster(id) => self.start_cluster(&id).await,
        }
    }

    pub async fn status(&self) -> Result<KindStatus> {
        match self.locate().await {
            RdsTarget::Instance(id) => self.instance_status(&id).await,
            RdsTarget::Cluster(id) => self.cluster_status(&id).await,
        }
    }

    async fn stop_instance(&self, db_id: &str) -> Result<()> {
        info!(instance = %db_id, "Stopping RDS instance");
        if let Err(err) = self
            .rds
            .stop_db_instance()
            .db_instance_identifier(db_id)
            .send()
            .await
        {
            let err = err.into_service_error();
            if err.is_invalid_db_instance_state_fault() {
                info!(instance = %db_id, "RDS instance is not in a stoppable state, treating as stopped");
            } else {
                return Err(err).with_context(|| format!("stop RDS instance {db_id}"));
            }
        }
        Ok(())
    }

    async fn start_instance(&self, db_id: &str) -> Result<()> {
        info!(instance = %db_id, "Starting RDS instance");
        if let Err(err) = self
            .rds
            .start_db_instance()
            .db_instance_identifier(db_id)
            .send()
            .await
        {
            let err = err.into_service_error();
            if err.is_invalid_db_instance_state_fault() {
                info!(instance = %db_id, "RDS instance is not in a startable state, treating as started");
            } else {
                return Err(err).with_context(|| format!("start RDS instance {db_id}"));
            }
        }
        Ok(())
    }

    async fn stop_cluster(&self, cluster_id: &str) -> Result<()> {
        info!(cluster = %cluster_id, "Stopping RDS cluster");
        if let Err(err) = self
            .rds
            .stop_db_cluster()
            .db_cluster_identifier(cluster_id)
            .send()
            .await
        {
            let err = err.into_service_error();
            if err.is_invalid_db_cluster_state_fault() {
                info!(cluster = %cluster_id, "RDS cluster is not in a stoppable state, treating as stopped");
            } else {
                return Err(err).with_context(|| format!("stop RDS cluster {cluster_id}"));
            }
        }
        Ok(())
    }

    async fn start_cluster(&self, cluster_id: &str) -> Result<()> {
        info!(cluster = %cluster_id, "Starting RDS cluster");
        if let Err(err) = self
            .rds
            .start_db_cluster()
            .db_cluster_identifier(cluster_id)
            .send()
            .await
        {
            let err = err.into_service_error();
            if err.is_invalid_db_cluster_state_fault() {
                info!(cluster = %cluster_id, "RDS cluster is not in a startable state, treating as started");
            } else {
                return Err(err).with_context(|| format!("start RDS cluster {cluster_id}"));
            }
        }
        Ok(())
    }

    async fn instance_status(&self, db_id: &str) -> Result<KindStatus> {
        match self
            .rds
            .describe_db_instances()
            .db_instance_identifier(db_id)
            .send()
            .await
        {
            Ok(response) => {
                let state = response
                    .db_instances()
                    .first()
                    .and_then(|instance| instance.db_instance_status())
                    .unwrap_or("unknown")
                    .to_string();
                Ok(KindStatus::new(
                    state.clone(),
                    format!("DB instance {db_id} is {state}"),
                ))
            }
            Err(err) => {
                let err = err.into_service_error();
                if err.is_db_instance_not_found_fault() {
                    Ok(KindStatus::new(
                        "not-found",
                        format!("DB instance {db_id} does not exist"),
                    ))
                } else {
                    Err(err).with_context(|| format!("describe RDS instance {db_id}"))
                }
            }
        }
    }

    async fn cluster_status(&self, cluster_id: &str) -> Result<KindStatus> {
        match self
            .rds
            .describe_db_clusters()
            .db_cluster_identifier(cluster_id)
            .send()
            .await
        {
            Ok(response) => {
                let state = response
                    .db_clusters()
                    .first()
                    .and_then(|cluster| cluster.status())
                    .unwrap_or("unknown")
                    .to_string();
                Ok(KindStatus::new(
                    state.clone(),
                    format!("DB cluster {cluster_id} is {state}"),
                ))
            }
            Err(err) => {
                let err = err.into_service_error();
                if err.is_db_cluster_not_found_fault() {
                    Ok(KindStatus::new(
                        "not-found",
                        format!("DB cluster {cluster_id} does not exist"),
                    ))
                } else {
                    Err(err).with_context(|| format!("describe RDS cluster {cluster_id}"))
                }
            }
        }
    }
}

/// Extract the resource identifier from an RDS ARN.
///
/// Expected ARN formats:
/// - Cluster: `arn:aws:rds:region:account:cluster:cluster-id`
/// - Instance: `arn:aws:rds:region:account:db:instance-id`
fn extract_rds_id(arn: &str) -> String {
    arn.split(':').last().unwrap_or(arn).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_identifier_from_cluster_arn() {
        assert_eq!(
            extract_rds_id("arn:aws:rds:eu-west-1:123456789012:cluster:staging-legitmark-db"),
            "staging-legitmark-db"
        );
    }

    #[test]
    fn extracts_identifier_from_instance_arn() {
        assert_eq!(
            extract_rds_id("arn:aws:rds:eu-west-1:123456789012:db:dev-legitmark-db"),
            "dev-legitmark-db"
        );
    }

    #[test]
    fn passes_through_non_arn_input() {
        assert_eq!(extract_rds_id("plain-identifier"), "plain-identifier");
    }
}
