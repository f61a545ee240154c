use std::sync::Arc;

use anyhow::{bail, Context, Result};
use aws_sdk_lambda::Client as LambdaClient;
use tracing::{error, info, warn};

use crate::clients::AwsClients;
use crate::config::Config;
use crate::status::{LambdaFunctionDetail, LambdaStatus};
use crate::tags::RequiredTags;
use crate::vault::{restore_plan, Concurrency, RestorePlan, SnapshotStore, TagSnapshotStore};

/// Shutdown/startup handler for the environment's tagged Lambda functions.
///
/// Shutdown throttles each function to zero reserved concurrency (the
/// function keeps existing, it just cannot run) and drops any provisioned
/// concurrency. The prior reserved-concurrency value is stashed in the
/// snapshot store so startup can restore the exact prior capacity.
pub struct LambdaManager {
    lambda: LambdaClient,
    required: RequiredTags,
    self_function_arn: Option<String>,
    store: Arc<dyn SnapshotStore>,
}

#[derive(Debug, Clone)]
struct FunctionInfo {
    name: String,
    arn: String,
    runtime: Option<String>,
    memory_mb: Option<i32>,
}

impl LambdaManager {
    pub fn new(clients: &AwsClients, config: &Config) -> Self {
        Self {
            lambda: clients.lambda.clone(),
            required: RequiredTags::new(&config.environment, &config.project),
            self_function_arn: config.self_function_arn.clone(),
            store: Arc::new(TagSnapshotStore::new(clients.lambda.clone())),
        }
    }

    /// List every function in the region, keep the ones carrying the
    /// required tag set. The manager's own function is excluded so it
    /// cannot throttle itself.
    ///
    /// A tag-fetch failure for one function is logged and that function
    /// skipped; it never aborts the whole scan.
    async fn discover(&self) -> Result<Vec<FunctionInfo>> {
        let mut matched = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut request = self.lambda.list_functions();
            if let Some(ref token) = marker {
                request = request.marker(token);
            }

            let response = request.send().await.context("list Lambda functions")?;

            for function in response.functions() {
                let (Some(name), Some(arn)) = (function.function_name(), function.function_arn())
                else {
                    continue;
                };

                if self.self_function_arn.as_deref() == Some(arn) {
                    info!(function = %name, "Excluding the resource manager's own function");
                    continue;
                }

                match self.matches_tags(arn).await {
                    Ok(true) => matched.push(FunctionInfo {
                        name: name.to_string(),
                        arn: arn.to_string(),
                        runtime: function.runtime().map(|runtime| runtime.as_str().to_string()),
                        memory_mb: function.memory_size(),
                    }),
                    Ok(false) => {}
                    Err(err) => {
                        warn!(function = %name, error = %err, "Failed to fetch function tags, skipping");
                    }
                }
            }

            match response.next_marker() {
                Some(token) if !token.is_empty() => marker = Some(token.to_string()),
                _ => break,
            }
        }

        info!(count = matched.len(), "Found Lambda functions with matching tags");
        Ok(matched)
    }

    async fn matches_tags(&self, arn: &str) -> Result<bool> {
        let response = self.lambda.list_tags().resource(arn).send().await?;
        let tags = response.tags().cloned().unwrap_or_default();
        Ok(self.required.matches(&tags))
    }

    pub async fn shutdown(&self) -> Result<()> {
        let functions = self.discover().await?;
        let mut failed: Vec<String> = Vec::new();

        for function in &functions {
            if let Err(err) = self.throttle(function).await {
                error!(function = %function.name, error = %format!("{err:#}"), "Failed to throttle function");
                failed.push(function.name.clone());
            }
        }

        if !failed.is_empty() {
            bail!(
                "failed to throttle {} of {} functions: {}",
                failed.len(),
                functions.len(),
                failed.join(", ")
            );
        }
        Ok(())
    }

    pub async fn startup(&self) -> Result<()> {
        let functions = self.discover().await?;
        let mut failed: Vec<String> = Vec::new();

        for function in &functions {
            if let Err(err) = self.restore(function).await {
                error!(function = %function.name, error = %format!("{err:#}"), "Failed to restore function");
                failed.push(function.name.clone());
            }
        }

        if !failed.is_empty() {
            bail!(
                "failed to restore {} of {} functions: {}",
                failed.len(),
                functions.len(),
                failed.join(", ")
            );
        }
        Ok(())
    }

    /// Capture the current reserved concurrency, then throttle to zero and
    /// drop provisioned concurrency.
    async fn throttle(&self, function: &FunctionInfo) -> Result<()> {
        let current = self.reserved_concurrency(&function.name).await?;
        let snapshot = match current {
            Some(value) => Concurrency::Limited(value),
            None => Concurrency::Unlimited,
        };

        self.store
            .save(&function.arn, snapshot)
            .await
            .with_context(|| format!("save concurrency snapshot for {}", function.name))?;

        info!(function = %function.name, previous = %snapshot, "Throttling function to zero concurrency");
        self.lambda
            .put_function_concurrency()
            .function_name(&function.name)
            .reserved_concurrent_executions(0)
            .send()
            .await
            .with_context(|| format!("throttle function {}", function.name))?;

        self.remove_provisioned_concurrency(&function.name).await
    }

    /// Restore reserved concurrency from the snapshot store, or remove the
    /// limit when no snapshot exists, then discard the snapshot.
    async fn restore(&self, function: &FunctionInfo) -> Result<()> {
        let snapshot = self
            .store
            .load(&function.arn)
            .await
            .with_context(|| format!("load concurrency snapshot for {}", function.name))?;

        if snapshot.is_none() {
            warn!(
                function = %function.name,
                "No concurrency snapshot found, assuming the function was unlimited"
            );
        }

        match restore_plan(snapshot) {
            RestorePlan::SetReserved(value) => {
                info!(function = %function.name, reserved_concurrency = value, "Restoring reserved concurrency");
                self.lambda
                    .put_function_concurrency()
                    .function_name(&function.name)
                    .reserved_concurrent_executions(value)
                    .send()
                    .await
                    .with_context(|| format!("restore concurrency for {}", function.name))?;
            }
            RestorePlan::RemoveLimit => {
                info!(function = %function.name, "Removing reserved concurrency limit");
                self.lambda
                    .delete_function_concurrency()
                    .function_name(&function.name)
                    .send()
                    .await
                    .with_context(|| format!("remove concurrency limit for {}", function.name))?;
            }
        }

        if snapshot.is_some() {
            self.store
                .clear(&function.arn)
                .await
                .with_context(|| format!("clear concurrency snapshot for {}", function.name))?;
        }
        Ok(())
    }

    /// Delete every provisioned-concurrency config on the function,
    /// whatever qualifier it is attached to. Already-absent configs are
    /// treated as deleted.
    async fn remove_provisioned_concurrency(&self, function_name: &str) -> Result<()> {
        let mut marker: Option<String> = None;

        loop {
            let mut request = self
                .lambda
                .list_provisioned_concurrency_configs()
                .function_name(function_name);
            if let Some(ref token) = marker {
                request = request.marker(token);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("list provisioned concurrency for {function_name}"))?;

            for config in response.provisioned_concurrency_configs() {
                let Some(qualifier) = config
                    .function_arn()
                    .and_then(|arn| arn.rsplit(':').next())
                else {
                    continue;
                };

                info!(
                    function = %function_name,
                    qualifier = %qualifier,
                    "Deleting provisioned concurrency config"
                );
                if let Err(err) = self
                    .lambda
                    .delete_provisioned_concurrency_config()
                    .function_name(function_name)
                    .qualifier(qualifier)
                    .send()
                    .await
                {
                    let err = err.into_service_error();
                    if err.is_resource_not_found_exception() {
                        info!(
                            function = %function_name,
                            qualifier = %qualifier,
                            "Provisioned concurrency config already gone"
                        );
                    } else {
                        return Err(err).with_context(|| {
                            format!(
                                "delete provisioned concurrency for {function_name}:{qualifier}"
                            )
                        });
                    }
                }
            }

            match response.next_marker() {
                Some(token) if !token.is_empty() => marker = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(())
    }

    async fn reserved_concurrency(&self, function_name: &str) -> Result<Option<i32>> {
        let response = self
            .lambda
            .get_function_concurrency()
            .function_name(function_name)
            .send()
            .await
            .with_context(|| format!("get reserved concurrency for {function_name}"))?;
        Ok(response.reserved_concurrent_executions())
    }

    async fn provisioned_config_count(&self, function_name: &str) -> Result<usize> {
        let response = self
            .lambda
            .list_provisioned_concurrency_configs()
            .function_name(function_name)
            .send()
            .await
            .with_context(|| format!("list provisioned concurrency for {function_name}"))?;
        Ok(response.provisioned_concurrency_configs().len())
    }

    pub async fn status(&self) -> Result<LambdaStatus> {
        let functions = self.discover().await?;
        let mut details = Vec::with_capacity(functions.len());

        for function in &functions {
            let reserved = match self.reserved_concurrency(&function.name).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(function = %function.name, error = %err, "Failed to read reserved concurrency");
                    None
                }
            };
            let provisioned = match self.provisioned_config_count(&function.name).await {
                Ok(count) => count,
                Err(err) => {
                    warn!(function = %function.name, error = %err, "Failed to list provisioned concurrency");
                    0
                }
            };

            details.push(LambdaFunctionDetail {
                name: function.name.clone(),
                runtime: function.runtime.clone(),
                memory_mb: function.memory_mb,
                reserved_concurrency: reserved,
                provisioned_concurrency_configs: provisioned,
            });
        }

        let throttled = details
            .iter()
            .filter(|detail| detail.reserved_concurrency == Some(0))
            .count();
        let status = if details.is_empty() {
            "none".to_string()
        } else if throttled == details.len() {
            "stopped".to_string()
        } else if throttled == 0 {
            "running".to_string()
        } else {
            "partial".to_string()
        };

        Ok(LambdaStatus {
            status,
            message: format!("{throttled} of {} functions throttled", details.len()),
            functions: details,
        })
    }
}
