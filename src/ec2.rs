use anyhow::{Context, Result};
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::Filter;
use aws_sdk_ec2::Client as Ec2Client;
use tracing::info;

use crate::clients::AwsClients;
use crate::config::Config;
use crate::status::{Ec2InstanceDetail, Ec2Status};
use crate::tags::RequiredTags;

/// Shutdown/startup handler for the environment's tagged EC2 instances.
///
/// Discovery filters server-side on the full required tag set, and stop and
/// start each go out as one batched call over the instances actually in a
/// transitionable state.
pub struct Ec2Manager {
    ec2: Ec2Client,
    required: RequiredTags,
}

/// The state an instance must currently be in for the transition to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Stop,
    Start,
}

impl Transition {
    fn required_state(self) -> &'static str {
        match self {
            Transition::Stop => "running",
            Transition::Start => "stopped",
        }
    }
}

/// True when an instance in `state` can take part in the transition.
fn transitionable(state: &str, transition: Transition) -> bool {
    state == transition.required_state()
}

impl Ec2Manager {
    pub fn new(clients: &AwsClients, config: &Config) -> Self {
        Self {
            ec2: clients.ec2.clone(),
            required: RequiredTags::new(&config.environment, &config.project),
        }
    }

    fn tag_filters(&self) -> Vec<Filter> {
        self.required
            .as_map()
            .iter()
            .map(|(key, value)| {
                Filter::builder()
                    .name(format!("tag:{key}"))
                    .values(value)
                    .build()
            })
            .collect()
    }

    /// Describe all instances carrying the required tag set, with their
    /// current state and metadata.
    async fn discover(&self) -> Result<Vec<Ec2InstanceDetail>> {
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.ec2.describe_instances();
            for filter in self.tag_filters() {
                request = request.filters(filter);
            }
            if let Some(ref token) = next_token {
                request = request.next_token(token);
            }

            let response = request.send().await.context("describe EC2 instances")?;

            for reservation in response.reservations() {
                for instance in reservation.instances() {
                    let Some(id) = instance.instance_id() else {
                        continue;
                    };
                    let state = instance
                        .state()
                        .and_then(|state| state.name())
                        .map(|name| name.as_str().to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    let name = instance
                        .tags()
                        .iter()
                        .find(|tag| tag.key() == Some("Name"))
                        .and_then(|tag| tag.value())
                        .map(str::to_string);

                    instances.push(Ec2InstanceDetail {
                        id: id.to_string(),
                        state,
                        instance_type: instance
                            .instance_type()
                            .map(|kind| kind.as_str().to_string()),
                        name,
                    });
                }
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        info!(count = instances.len(), "Found EC2 instances with matching tags");
        Ok(instances)
    }

    pub async fn shutdown(&self) -> Result<()> {
        let instances = self.discover().await?;
        let ids: Vec<String> = instances
            .iter()
            .filter(|instance| transitionable(&instance.state, Transition::Stop))
            .map(|instance| instance.id.clone())
            .collect();

        if ids.is_empty() {
            info!("No EC2 instances in a stoppable state, skipping");
            return Ok(());
        }

        info!(count = ids.len(), "Stopping EC2 instances");
        if let Err(err) = self
            .ec2
            .stop_instances()
            .set_instance_ids(Some(ids))
            .send()
            .await
        {
            let err = err.into_service_error();
            if err.code() == Some("IncorrectInstanceState") {
                info!("EC2 instances changed state mid-flight, treating as stopped");
            } else {
                return Err(err).context("stop EC2 instances");
            }
        }
        Ok(())
    }

    pub async fn startup(&self) -> Result<()> {
        let instances = self.discover().await?;
        let ids: Vec<String> = instances
            .iter()
            .filter(|instance| transitionable(&instance.state, Transition::Start))
            .map(|instance| instance.id.clone())
            .collect();

        if ids.is_empty() {
            info!("No EC2 instances in a startable state, skipping");
            return Ok(());
        }

        info!(count = ids.len(), "Starting EC2 instances");
        if let Err(err) = self
            .ec2
            .start_instances()
            .set_instance_ids(Some(ids))
            .send()
            .await
        {
            let err = err.into_service_error();
            if err.code() == Some("IncorrectInstanceState") {
                info!("EC2 instances changed state mid-flight, treating as started");
            } else {
                return Err(err).context("start EC2 instances");
            }
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<Ec2Status> {
        let instances = self.discover().await?;

        let running = instances
            .iter()
            .filter(|instance| instance.state == "running")
            .count();
        let status = if instances.is_empty() {
            "none".to_string()
        } else if running == instances.len() {
            "running".to_string()
        } else if running == 0 {
            "stopped".to_string()
        } else {
            "partial".to_string()
        };

        Ok(Ec2Status {
            status,
            message: format!("{running} of {} instances running", instances.len()),
            instances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_instances_are_stoppable() {
        assert!(transitionable("running", Transition::Stop));
        for state in ["stopped", "stopping", "pending", "terminated", "unknown"] {
            assert!(!transitionable(state, Transition::Stop), "{state}");
        }
    }

    #[test]
    fn only_stopped_instances_are_startable() {
        assert!(transitionable("stopped", Transition::Start));
        for state in ["running", "stopping", "pending", "terminated", "unknown"] {
            assert!(!transitionable(state, Transition::Start), "{state}");
        }
    }
}
