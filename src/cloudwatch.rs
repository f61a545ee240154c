use anyhow::{Context, Result};
use aws_sdk_cloudwatch::Client as CloudWatchClient;
use aws_sdk_cloudwatchlogs::Client as LogsClient;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::clients::AwsClients;

/// Retention applied to log groups that have none.
pub const DEFAULT_RETENTION_DAYS: i32 = 30;

/// CloudWatch Logs storage price, USD per GB-month.
const STORAGE_USD_PER_GB_MONTH: f64 = 0.03;

/// Estimated monthly storage cost for the given number of stored bytes.
fn estimated_monthly_cost_usd(stored_bytes: i64) -> f64 {
    stored_bytes as f64 / 1_000_000_000.0 * STORAGE_USD_PER_GB_MONTH
}

#[derive(Debug, Clone, Serialize)]
pub struct LogGroupReport {
    pub name: String,
    pub stored_bytes: i64,
    pub retention_in_days: Option<i32>,
    pub estimated_monthly_cost_usd: f64,
    pub needs_retention_policy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogAnalysisReport {
    pub generated_at: String,
    pub total_stored_bytes: i64,
    pub total_estimated_monthly_cost_usd: f64,
    pub groups_without_retention: usize,
    pub groups: Vec<LogGroupReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogOptimizeReport {
    pub generated_at: String,
    pub retention_in_days: i32,
    pub updated: Vec<String>,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlarmInfo {
    pub name: String,
    pub state: Option<String>,
    pub reason: Option<String>,
    pub metric: Option<String>,
    pub namespace: Option<String>,
}

/// Cost/observability reporting over CloudWatch Logs and alarms.
pub struct CloudWatchManager {
    logs: LogsClient,
    cloudwatch: CloudWatchClient,
}

impl CloudWatchManager {
    pub fn new(clients: &AwsClients) -> Self {
        Self {
            logs: clients.logs.clone(),
            cloudwatch: clients.cloudwatch.clone(),
        }
    }

    async fn list_log_groups(&self) -> Result<Vec<LogGroupReport>> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.logs.describe_log_groups();
            if let Some(ref token) = next_token {
                request = request.next_token(token);
            }

            let response = request.send().await.context("describe log groups")?;

            for group in response.log_groups() {
                let Some(name) = group.log_group_name() else {
                    continue;
                };
                let stored_bytes = group.stored_bytes().unwrap_or(0);
                let retention = group.retention_in_days();

                groups.push(LogGroupReport {
                    name: name.to_string(),
                    stored_bytes,
                    retention_in_days: retention,
                    estimated_monthly_cost_usd: estimated_monthly_cost_usd(stored_bytes),
                    needs_retention_policy: retention.is_none(),
                });
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(groups)
    }

    /// Report per-group storage usage and flag groups retaining logs
    /// forever.
    pub async fn analyze(&self) -> Result<LogAnalysisReport> {
        let groups = self.list_log_groups().await?;

        let total_stored_bytes = groups.iter().map(|group| group.stored_bytes).sum();
        let groups_without_retention = groups
            .iter()
            .filter(|group| group.needs_retention_policy)
            .count();

        info!(
            groups = groups.len(),
            without_retention = groups_without_retention,
            "Analyzed log groups"
        );

        Ok(LogAnalysisReport {
            generated_at: Utc::now().to_rfc3339(),
            total_stored_bytes,
            total_estimated_monthly_cost_usd: estimated_monthly_cost_usd(total_stored_bytes),
            groups_without_retention,
            groups,
        })
    }

    /// Apply the default retention to every group that has none. Per-group
    /// failures are recorded in the report, never fatal.
    pub async fn optimize(&self) -> Result<LogOptimizeReport> {
        let groups = self.list_log_groups().await?;
        let mut updated = Vec::new();
        let mut errors = Vec::new();
        let mut skipped = 0;

        for group in &groups {
            if !group.needs_retention_policy {
                skipped += 1;
                continue;
            }

            match self
                .logs
                .put_retention_policy()
                .log_group_name(&group.name)
                .retention_in_days(DEFAULT_RETENTION_DAYS)
                .send()
                .await
            {
                Ok(_) => {
                    info!(group = %group.name, days = DEFAULT_RETENTION_DAYS, "Applied retention policy");
                    updated.push(group.name.clone());
                }
                Err(err) => {
                    warn!(group = %group.name, error = %err, "Failed to apply retention policy");
                    errors.push(format!("{}: {err}", group.name));
                }
            }
        }

        Ok(LogOptimizeReport {
            generated_at: Utc::now().to_rfc3339(),
            retention_in_days: DEFAULT_RETENTION_DAYS,
            updated,
            skipped,
            errors,
        })
    }

    /// List metric alarms with their state and reason.
    pub async fn alarms(&self) -> Result<Vec<AlarmInfo>> {
        let mut alarms = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.cloudwatch.describe_alarms();
            if let Some(ref token) = next_token {
                request = request.next_token(token);
            }

            let response = request.send().await.context("describe alarms")?;

            for alarm in response.metric_alarms() {
                let Some(name) = alarm.alarm_name() else {
                    continue;
                };
                alarms.push(AlarmInfo {
                    name: name.to_string(),
                    state: alarm.state_value().map(|state| state.as_str().to_string()),
                    reason: alarm.state_reason().map(str::to_string),
                    metric: alarm.metric_name().map(str::to_string),
                    namespace: alarm.namespace().map(str::to_string),
                });
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(alarms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_estimate_scales_with_stored_bytes() {
        assert_eq!(estimated_monthly_cost_usd(0), 0.0);
        assert!((estimated_monthly_cost_usd(1_000_000_000) - 0.03).abs() < 1e-9);
        assert!((estimated_monthly_cost_usd(500_000_000_000) - 15.0).abs() < 1e-9);
    }
}
