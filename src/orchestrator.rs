use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::apprunner::AppRunnerManager;
use crate::clients::AwsClients;
use crate::cloudfront::CloudFrontManager;
use crate::config::{Config, PRODUCTION_ENVIRONMENT};
use crate::ec2::Ec2Manager;
use crate::elasticache::ElastiCacheManager;
use crate::lambda::LambdaManager;
use crate::rds::RdsManager;
use crate::status::{CloudFrontStatus, Ec2Status, KindStatus, LambdaStatus, ResourceStatus};

/// The resource kinds the orchestrator steps through, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Rds,
    ElastiCache,
    AppRunner,
    CloudFront,
    Lambda,
    Ec2,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::Rds => "RDS",
            ResourceKind::ElastiCache => "ElastiCache",
            ResourceKind::AppRunner => "AppRunner",
            ResourceKind::CloudFront => "CloudFront",
            ResourceKind::Lambda => "Lambda",
            ResourceKind::Ec2 => "EC2",
        };
        f.write_str(name)
    }
}

/// Per-kind success flags; CloudFront is tracked per distribution id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceOutcomes {
    pub rds: bool,
    pub elasticache: bool,
    pub apprunner: bool,
    pub lambda: bool,
    pub ec2: bool,
    pub cloudfront: BTreeMap<String, bool>,
}

/// Aggregated result of one shutdown/startup run.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub resources: ResourceOutcomes,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResourceStatus>,
}

/// Accumulator for per-kind outcomes.
///
/// Every step is recorded whether it succeeded or failed; recording a
/// failure never stops the run, which makes the "keep going on partial
/// failure" contract explicit instead of buried in control flow.
#[derive(Debug, Default)]
pub struct OperationRecorder {
    outcomes: ResourceOutcomes,
    errors: Vec<String>,
}

impl OperationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: ResourceKind, result: Result<()>) {
        let ok = result.is_ok();
        match kind {
            ResourceKind::Rds => self.outcomes.rds = ok,
            ResourceKind::ElastiCache => self.outcomes.elasticache = ok,
            ResourceKind::AppRunner => self.outcomes.apprunner = ok,
            ResourceKind::Lambda => self.outcomes.lambda = ok,
            ResourceKind::Ec2 => self.outcomes.ec2 = ok,
            // Whole-kind CloudFront failures (discovery) land here; individual
            // distributions go through record_distribution.
            ResourceKind::CloudFront => {}
        }
        if let Err(err) = result {
            warn!(kind = %kind, error = %format!("{err:#}"), "Resource step failed, continuing");
            self.errors.push(format!("{kind}: {err:#}"));
        }
    }

    pub fn record_distribution(&mut self, id: &str, result: Result<()>) {
        let ok = result.is_ok();
        self.outcomes.cloudfront.insert(id.to_string(), ok);
        if let Err(err) = result {
            warn!(distribution = %id, error = %format!("{err:#}"), "Distribution step failed, continuing");
            self.errors
                .push(format!("{}: {id}: {err:#}", ResourceKind::CloudFront));
        }
    }

    pub fn finish(self, status: Option<ResourceStatus>) -> OperationResult {
        OperationResult {
            success: self.errors.is_empty(),
            resources: self.outcomes,
            errors: self.errors,
            status,
        }
    }
}

/// Refuse to mutate anything in the production environment.
///
/// Raised before any resource is touched, never retried.
pub fn ensure_mutable_environment(environment: &str) -> Result<()> {
    if environment == PRODUCTION_ENVIRONMENT {
        bail!("refusing to run against the {PRODUCTION_ENVIRONMENT} environment");
    }
    Ok(())
}

/// Runs shutdown/startup/status as a sequence of independently-failing
/// steps over every resource kind.
///
/// No state is carried between invocations: each call re-discovers
/// resources from scratch rather than trusting a previous run's view.
pub struct Orchestrator {
    environment: String,
    rds: RdsManager,
    elasticache: ElastiCacheManager,
    apprunner: AppRunnerManager,
    cloudfront: CloudFrontManager,
    lambda: LambdaManager,
    ec2: Ec2Manager,
}

impl Orchestrator {
    pub fn new(config: &Config, clients: &AwsClients) -> Self {
        Self {
            environment: config.environment.clone(),
            rds: RdsManager::new(clients, config),
            elasticache: ElastiCacheManager::new(clients, config),
            apprunner: AppRunnerManager::new(clients, config),
            cloudfront: CloudFrontManager::new(clients, config),
            lambda: LambdaManager::new(clients, config),
            ec2: Ec2Manager::new(clients, config),
        }
    }

    pub async fn shutdown_resources(&self) -> Result<OperationResult> {
        ensure_mutable_environment(&self.environment)?;
        info!(environment = %self.environment, "Shutting down resources");

        let mut recorder = OperationRecorder::new();
        recorder.record(ResourceKind::Rds, self.rds.shutdown().await);
        recorder.record(ResourceKind::ElastiCache, self.elasticache.shutdown().await);
        recorder.record(ResourceKind::AppRunner, self.apprunner.shutdown().await);
        match self.cloudfront.set_enabled(false).await {
            Ok(outcomes) => {
                for (id, result) in outcomes {
                    recorder.record_distribution(&id, result);
                }
            }
            Err(err) => recorder.record(ResourceKind::CloudFront, Err(err)),
        }
        recorder.record(ResourceKind::Lambda, self.lambda.shutdown().await);
        recorder.record(ResourceKind::Ec2, self.ec2.shutdown().await);

        let status = self.get_resource_status().await;
        let result = recorder.finish(Some(status));
        info!(
            environment = %self.environment,
            success = result.success,
            errors = result.errors.len(),
            "Shutdown completed"
        );
        Ok(result)
    }

    pub async fn startup_resources(&self) -> Result<OperationResult> {
        ensure_mutable_environment(&self.environment)?;
        info!(environment = %self.environment, "Starting up resources");

        let mut recorder = OperationRecorder::new();
        recorder.record(ResourceKind::Rds, self.rds.startup().await);
        recorder.record(ResourceKind::ElastiCache, self.elasticache.startup().await);
        recorder.record(ResourceKind::AppRunner, self.apprunner.startup().await);
        match self.cloudfront.set_enabled(true).await {
            Ok(outcomes) => {
                for (id, result) in outcomes {
                    recorder.record_distribution(&id, result);
                }
            }
            Err(err) => recorder.record(ResourceKind::CloudFront, Err(err)),
        }
        recorder.record(ResourceKind::Lambda, self.lambda.startup().await);
        recorder.record(ResourceKind::Ec2, self.ec2.startup().await);

        let status = self.get_resource_status().await;
        let result = recorder.finish(Some(status));
        info!(
            environment = %self.environment,
            success = result.success,
            errors = result.errors.len(),
            "Startup completed"
        );
        Ok(result)
    }

    /// Assemble the unified status snapshot. Each per-kind query is
    /// isolated: a failure turns into that kind's error sub-status and
    /// never blocks the others.
    pub async fn get_resource_status(&self) -> ResourceStatus {
        ResourceStatus {
            rds: self
                .rds
                .status()
                .await
                .unwrap_or_else(|err| KindStatus::error(&err)),
            elasticache: self
                .elasticache
                .status()
                .await
                .unwrap_or_else(|err| KindStatus::error(&err)),
            apprunner: self
                .apprunner
                .status()
                .await
                .unwrap_or_else(|err| KindStatus::error(&err)),
            lambda: self
                .lambda
                .status()
                .await
                .unwrap_or_else(|err| LambdaStatus::error(&err)),
            ec2: self
                .ec2
                .status()
                .await
                .unwrap_or_else(|err| Ec2Status::error(&err)),
            cloudfront: self
                .cloudfront
                .status()
                .await
                .unwrap_or_else(|err| CloudFrontStatus::error(&err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn success_tracks_empty_error_list() {
        let mut recorder = OperationRecorder::new();
        recorder.record(ResourceKind::Rds, Ok(()));
        recorder.record(ResourceKind::Ec2, Ok(()));
        let result = recorder.finish(None);
        assert!(result.success);
        assert!(result.errors.is_empty());

        let mut recorder = OperationRecorder::new();
        recorder.record(ResourceKind::Rds, Err(anyhow!("boom")));
        let result = recorder.finish(None);
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn failed_step_does_not_stop_later_steps() {
        // Fold the same step sequence the orchestrator runs; an RDS
        // failure must leave every later kind recorded.
        let steps: Vec<(ResourceKind, Result<()>)> = vec![
            (ResourceKind::Rds, Err(anyhow!("connection refused"))),
            (ResourceKind::ElastiCache, Ok(())),
            (ResourceKind::AppRunner, Ok(())),
            (ResourceKind::Lambda, Ok(())),
            (ResourceKind::Ec2, Ok(())),
        ];

        let mut recorder = OperationRecorder::new();
        for (kind, result) in steps {
            recorder.record(kind, result);
        }
        let result = recorder.finish(None);

        assert!(!result.success);
        assert!(!result.resources.rds);
        assert!(result.resources.elasticache);
        assert!(result.resources.apprunner);
        assert!(result.resources.lambda);
        assert!(result.resources.ec2);
        assert_eq!(result.errors, vec!["RDS: connection refused".to_string()]);
    }

    #[test]
    fn error_entries_are_prefixed_with_the_kind() {
        let mut recorder = OperationRecorder::new();
        recorder.record(ResourceKind::Lambda, Err(anyhow!("throttled")));
        recorder.record_distribution("E2EXAMPLE", Err(anyhow!("etag mismatch")));
        let result = recorder.finish(None);

        assert_eq!(
            result.errors,
            vec![
                "Lambda: throttled".to_string(),
                "CloudFront: E2EXAMPLE: etag mismatch".to_string(),
            ]
        );
        assert_eq!(result.resources.cloudfront.get("E2EXAMPLE"), Some(&false));
    }

    #[test]
    fn distribution_outcomes_are_tracked_per_id() {
        let mut recorder = OperationRecorder::new();
        recorder.record_distribution("E1", Ok(()));
        recorder.record_distribution("E2", Err(anyhow!("denied")));
        let result = recorder.finish(None);

        assert_eq!(result.resources.cloudfront.get("E1"), Some(&true));
        assert_eq!(result.resources.cloudfront.get("E2"), Some(&false));
        assert!(!result.success);
    }

    #[test]
    fn production_environment_is_rejected() {
        assert!(ensure_mutable_environment("prod").is_err());
        assert!(ensure_mutable_environment("dev").is_ok());
        assert!(ensure_mutable_environment("staging").is_ok());
        // Only the exact name is guarded.
        assert!(ensure_mutable_environment("production").is_ok());
    }
}
