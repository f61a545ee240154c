use anyhow::{Context, Result};
use aws_sdk_cloudfront::Client as CloudFrontClient;
use tracing::{info, warn};

use crate::clients::AwsClients;
use crate::config::Config;
use crate::status::{CloudFrontDistributionDetail, CloudFrontStatus};
use crate::tags::{tag_pairs_to_map, RequiredTags};

/// Shutdown/startup handler for the environment's CloudFront distributions.
///
/// Shutdown disables a distribution, startup re-enables it. The update goes
/// through CloudFront's optimistic-concurrency protocol: read the current
/// config with its ETag, flip `enabled`, write back with the token. A
/// distribution already in the target state is skipped without a write.
pub struct CloudFrontManager {
    cloudfront: CloudFrontClient,
    required: RequiredTags,
}

#[derive(Debug, Clone)]
struct DiscoveredDistribution {
    id: String,
    arn: String,
    enabled: bool,
    status: String,
}

/// True when a write is needed to reach the target state.
fn needs_toggle(current_enabled: bool, target_enabled: bool) -> bool {
    current_enabled != target_enabled
}

impl CloudFrontManager {
    pub fn new(clients: &AwsClients, config: &Config) -> Self {
        Self {
            cloudfront: clients.cloudfront.clone(),
            required: RequiredTags::new(&config.environment, &config.project),
        }
    }

    /// List every distribution, keep the ones carrying the required tag set.
    ///
    /// A tag-fetch failure for one distribution is logged and that
    /// distribution skipped; it never aborts the whole scan.
    async fn discover(&self) -> Result<Vec<DiscoveredDistribution>> {
        let mut matched = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut request = self.cloudfront.list_distributions();
            if let Some(ref token) = marker {
                request = request.marker(token);
            }

            let response = request.send().await.context("list CloudFront distributions")?;
            let Some(list) = response.distribution_list() else {
                break;
            };

            for item in list.items() {
                let summary = DiscoveredDistribution {
                    id: item.id().to_string(),
                    arn: item.arn().to_string(),
                    enabled: item.enabled(),
                    status: item.status().to_string(),
                };

                match self.matches_tags(&summary.arn).await {
                    Ok(true) => matched.push(summary),
                    Ok(false) => {}
                    Err(err) => {
                        warn!(
                            distribution = %summary.id,
                            error = %err,
                            "Failed to fetch distribution tags, skipping"
                        );
                    }
                }
            }

            match list.next_marker() {
                Some(token) if list.is_truncated() && !token.is_empty() => {
                    marker = Some(token.to_string());
                }
                _ => break,
            }
        }

        info!(count = matched.len(), "Found CloudFront distributions with matching tags");
        Ok(matched)
    }

    async fn matches_tags(&self, arn: &str) -> Result<bool> {
        let response = self
            .cloudfront
            .list_tags_for_resource()
            .resource(arn)
            .send()
            .await?;

        let tags = tag_pairs_to_map(
            response
                .tags()
                .map(|tags| tags.items())
                .unwrap_or_default()
                .iter()
                .map(|tag| (Some(tag.key()), tag.value())),
        );

        Ok(self.required.matches(&tags))
    }

    /// Flip every matching distribution to the target enabled state.
    ///
    /// Returns one outcome per distribution id; discovery failure is the
    /// only whole-kind error.
    pub async fn set_enabled(&self, target_enabled: bool) -> Result<Vec<(String, Result<()>)>> {
        let distributions = self.discover().await?;
        let mut outcomes = Vec::with_capacity(distributions.len());

        for distribution in &distributions {
            let result = self.toggle(&distribution.id, target_enabled).await;
            outcomes.push((distribution.id.clone(), result));
        }

        Ok(outcomes)
    }

    async fn toggle(&self, id: &str, target_enabled: bool) -> Result<()> {
        let response = self
            .cloudfront
            .get_distribution_config()
            .id(id)
            .send()
            .await
            .with_context(|| format!("get config for distribution {id}"))?;

        let etag = response
            .e_tag()
            .with_context(|| format!("distribution {id} config has no ETag"))?
            .to_string();
        let mut config = response
            .distribution_config()
            .cloned()
            .with_context(|| format!("distribution {id} has no config"))?;

        if !needs_toggle(config.enabled, target_enabled) {
            info!(
                distribution = %id,
                enabled = target_enabled,
                "Distribution already in target state, skipping update"
            );
            return Ok(());
        }

        info!(distribution = %id, enabled = target_enabled, "Updating distribution enabled flag");
        config.enabled = target_enabled;

        self.cloudfront
            .update_distribution()
            .id(id)
            .if_match(etag)
            .distribution_config(config)
            .send()
            .await
            .with_context(|| format!("update distribution {id}"))?;

        Ok(())
    }

    pub async fn status(&self) -> Result<CloudFrontStatus> {
        let distributions = self.discover().await?;

        let details: Vec<CloudFrontDistributionDetail> = distributions
            .iter()
            .map(|distribution| CloudFrontDistributionDetail {
                id: distribution.id.clone(),
                enabled: distribution.enabled,
                status: distribution.status.clone(),
            })
            .collect();

        let enabled_count = details.iter().filter(|detail| detail.enabled).count();
        let status = if details.is_empty() {
            "none".to_string()
        } else if enabled_count == details.len() {
            "enabled".to_string()
        } else if enabled_count == 0 {
            "disabled".to_string()
        } else {
            "partial".to_string()
        };

        Ok(CloudFrontStatus {
            status,
            message: format!("{enabled_count} of {} distributions enabled", details.len()),
            distributions: details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_is_skipped_when_already_in_target_state() {
        assert!(!needs_toggle(true, true));
        assert!(!needs_toggle(false, false));
    }

    #[test]
    fn toggle_is_needed_when_states_differ() {
        assert!(needs_toggle(true, false));
        assert!(needs_toggle(false, true));
    }
}
