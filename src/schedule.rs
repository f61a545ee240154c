use anyhow::{bail, Context, Result};
use aws_sdk_scheduler::types::{FlexibleTimeWindow, FlexibleTimeWindowMode, Target};
use aws_sdk_scheduler::Client as SchedulerClient;
use serde::Serialize;
use tracing::{info, warn};

use crate::clients::AwsClients;
use crate::config::Config;

/// Which orchestrator operation a schedule rule triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    Shutdown,
    Startup,
}

impl std::fmt::Display for ScheduleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleAction::Shutdown => f.write_str("shutdown"),
            ScheduleAction::Startup => f.write_str("startup"),
        }
    }
}

impl std::str::FromStr for ScheduleAction {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "shutdown" => Ok(ScheduleAction::Shutdown),
            "startup" => Ok(ScheduleAction::Startup),
            other => bail!("invalid action '{other}': must be 'shutdown' or 'startup'"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleInfo {
    pub name: String,
    pub state: Option<String>,
    pub expression: Option<String>,
}

/// CRUD over the EventBridge Scheduler rules that later invoke shutdown or
/// startup. The scheduler itself is an opaque collaborator; this manager
/// only creates, lists, and deletes rules in its group.
pub struct ScheduleManager {
    scheduler: SchedulerClient,
    group: String,
    target_arn: Option<String>,
    role_arn: Option<String>,
}

impl ScheduleManager {
    pub fn new(clients: &AwsClients, config: &Config) -> Self {
        Self {
            scheduler: clients.scheduler.clone(),
            group: config.schedule_group.clone(),
            target_arn: config.schedule_target_arn.clone(),
            role_arn: config.schedule_role_arn.clone(),
        }
    }

    /// True when the target/role configuration needed to create rules is
    /// present. Listing and deleting work either way.
    pub fn is_configured(&self) -> bool {
        self.target_arn.is_some() && self.role_arn.is_some()
    }

    pub async fn list(&self) -> Result<Vec<ScheduleInfo>> {
        let mut schedules = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.scheduler.list_schedules().group_name(&self.group);
            if let Some(ref token) = next_token {
                request = request.next_token(token);
            }

            let response = request.send().await.context("list schedules")?;

            for summary in response.schedules() {
                let Some(name) = summary.name() else {
                    continue;
                };
                let expression = match self
                    .scheduler
                    .get_schedule()
                    .name(name)
                    .group_name(&self.group)
                    .send()
                    .await
                {
                    Ok(detail) => detail.schedule_expression().map(str::to_string),
                    Err(err) => {
                        warn!(schedule = %name, error = %err, "Failed to fetch schedule detail");
                        None
                    }
                };

                schedules.push(ScheduleInfo {
                    name: name.to_string(),
                    state: summary.state().map(|state| state.as_str().to_string()),
                    expression,
                });
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(schedules)
    }

    /// Create a cron/rate rule that invokes the configured target with the
    /// given action.
    pub async fn create(
        &self,
        name: &str,
        expression: &str,
        action: ScheduleAction,
    ) -> Result<()> {
        let (Some(target_arn), Some(role_arn)) = (&self.target_arn, &self.role_arn) else {
            bail!("SCHEDULE_TARGET_ARN and SCHEDULE_ROLE_ARN must be configured to create schedules");
        };

        let target = Target::builder()
            .arn(target_arn)
            .role_arn(role_arn)
            .input(serde_json::json!({ "action": action.to_string() }).to_string())
            .build()
            .context("build schedule target")?;

        let window = FlexibleTimeWindow::builder()
            .mode(FlexibleTimeWindowMode::Off)
            .build()
            .context("build flexible time window")?;

        info!(schedule = %name, expression = %expression, action = %action, "Creating schedule");
        self.scheduler
            .create_schedule()
            .name(name)
            .group_name(&self.group)
            .schedule_expression(expression)
            .flexible_time_window(window)
            .target(target)
            .send()
            .await
            .with_context(|| format!("create schedule {name}"))?;

        Ok(())
    }

    /// Delete a rule by name. Deleting a rule that is already gone is
    /// treated as success.
    pub async fn delete(&self, name: &str) -> Result<()> {
        info!(schedule = %name, "Deleting schedule");
        if let Err(err) = self
            .scheduler
            .delete_schedule()
            .name(name)
            .group_name(&self.group)
            .send()
            .await
        {
            let err = err.into_service_error();
            if err.is_resource_not_found_exception() {
                info!(schedule = %name, "Schedule already gone");
            } else {
                return Err(err).with_context(|| format!("delete schedule {name}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_actions() {
        assert_eq!(
            "shutdown".parse::<ScheduleAction>().unwrap(),
            ScheduleAction::Shutdown
        );
        assert_eq!(
            "startup".parse::<ScheduleAction>().unwrap(),
            ScheduleAction::Startup
        );
    }

    #[test]
    fn rejects_unknown_action() {
        assert!("reboot".parse::<ScheduleAction>().is_err());
        assert!("".parse::<ScheduleAction>().is_err());
    }
}
