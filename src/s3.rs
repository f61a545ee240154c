use anyhow::{Context, Result};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::types::{
    AbortIncompleteMultipartUpload, BucketLifecycleConfiguration, ExpirationStatus, LifecycleRule,
    LifecycleRuleFilter, NoncurrentVersionExpiration,
};
use aws_sdk_s3::Client as S3Client;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::clients::AwsClients;

/// Id of the lifecycle rule this manager installs.
const DEFAULT_RULE_ID: &str = "resource-manager-default";

/// Days after which incomplete multipart uploads are aborted.
const ABORT_MULTIPART_DAYS: i32 = 7;

/// Days after which noncurrent object versions expire.
const NONCURRENT_EXPIRE_DAYS: i32 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct BucketReport {
    pub name: String,
    pub has_lifecycle: Option<bool>,
    pub versioning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageAnalysisReport {
    pub generated_at: String,
    pub buckets_without_lifecycle: usize,
    pub buckets: Vec<BucketReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageOptimizeReport {
    pub generated_at: String,
    pub updated: Vec<String>,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Cost reporting over S3 buckets: surfaces buckets with no lifecycle
/// rules and can install a conservative default.
pub struct S3Manager {
    s3: S3Client,
}

impl S3Manager {
    pub fn new(clients: &AwsClients) -> Self {
        Self {
            s3: clients.s3.clone(),
        }
    }

    async fn bucket_names(&self) -> Result<Vec<String>> {
        let response = self.s3.list_buckets().send().await.context("list buckets")?;
        Ok(response
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect())
    }

    /// True when the bucket has at least one lifecycle rule.
    async fn has_lifecycle(&self, bucket: &str) -> Result<bool> {
        match self
            .s3
            .get_bucket_lifecycle_configuration()
            .bucket(bucket)
            .send()
            .await
        {
            Ok(response) => Ok(!response.rules().is_empty()),
            Err(err) => {
                let err = err.into_service_error();
                if err.code() == Some("NoSuchLifecycleConfiguration") {
                    Ok(false)
                } else {
                    Err(err).with_context(|| format!("get lifecycle configuration for {bucket}"))
                }
            }
        }
    }

    /// Report lifecycle and versioning state for every bucket. A failing
    /// bucket gets its error recorded in its own entry.
    pub async fn analyze(&self) -> Result<StorageAnalysisReport> {
        let names = self.bucket_names().await?;
        let mut buckets = Vec::with_capacity(names.len());

        for name in &names {
            let lifecycle = self.has_lifecycle(name).await;
            let versioning = self
                .s3
                .get_bucket_versioning()
                .bucket(name)
                .send()
                .await
                .map(|response| {
                    response
                        .status()
                        .map(|status| status.as_str().to_string())
                        .unwrap_or_else(|| "Disabled".to_string())
                });

            let mut report = BucketReport {
                name: name.clone(),
                has_lifecycle: None,
                versioning: None,
                error: None,
            };
            match lifecycle {
                Ok(value) => report.has_lifecycle = Some(value),
                Err(err) => {
                    warn!(bucket = %name, error = %format!("{err:#}"), "Failed to inspect bucket lifecycle");
                    report.error = Some(format!("{err:#}"));
                }
            }
            match versioning {
                Ok(value) => report.versioning = Some(value),
                Err(err) => {
                    warn!(bucket = %name, error = %err, "Failed to inspect bucket versioning");
                    if report.error.is_none() {
                        report.error = Some(err.to_string());
                    }
                }
            }
            buckets.push(report);
        }

        let buckets_without_lifecycle = buckets
            .iter()
            .filter(|bucket| bucket.has_lifecycle == Some(false))
            .count();

        info!(
            buckets = buckets.len(),
            without_lifecycle = buckets_without_lifecycle,
            "Analyzed buckets"
        );

        Ok(StorageAnalysisReport {
            generated_at: Utc::now().to_rfc3339(),
            buckets_without_lifecycle,
            buckets,
        })
    }

    /// Install the default lifecycle rule on buckets that have none.
    /// Per-bucket failures are recorded in the report, never fatal.
    pub async fn optimize(&self) -> Result<StorageOptimizeReport> {
        let names = self.bucket_names().await?;
        let mut updated = Vec::new();
        let mut errors = Vec::new();
        let mut skipped = 0;

        for name in &names {
            match self.has_lifecycle(name).await {
                Ok(true) => {
                    skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    errors.push(format!("{name}: {err:#}"));
                    continue;
                }
            }

            match self.install_default_lifecycle(name).await {
                Ok(()) => {
                    info!(bucket = %name, "Installed default lifecycle rule");
                    updated.push(name.clone());
                }
                Err(err) => {
                    warn!(bucket = %name, error = %format!("{err:#}"), "Failed to install lifecycle rule");
                    errors.push(format!("{name}: {err:#}"));
                }
            }
        }

        Ok(StorageOptimizeReport {
            generated_at: Utc::now().to_rfc3339(),
            updated,
            skipped,
            errors,
        })
    }

    async fn install_default_lifecycle(&self, bucket: &str) -> Result<()> {
        let rule = LifecycleRule::builder()
            .id(DEFAULT_RULE_ID)
            .status(ExpirationStatus::Enabled)
            .filter(LifecycleRuleFilter::builder().prefix("").build())
            .abort_incomplete_multipart_upload(
                AbortIncompleteMultipartUpload::builder()
                    .days_after_initiation(ABORT_MULTIPART_DAYS)
                    .build(),
            )
            .noncurrent_version_expiration(
                NoncurrentVersionExpiration::builder()
                    .noncurrent_days(NONCURRENT_EXPIRE_DAYS)
                    .build(),
            )
            .build()
            .context("build lifecycle rule")?;

        self.s3
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(
                BucketLifecycleConfiguration::builder()
                    .rules(rule)
                    .build()
                    .context("build lifecycle configuration")?,
            )
            .send()
            .await
            .with_context(|| format!("put lifecycle configuration on {bucket}"))?;

        Ok(())
    }
}
