use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_lambda::Client as LambdaClient;
use tracing::{debug, info, warn};

/// Tag key under which a function's pre-shutdown reserved concurrency is
/// stashed so startup can restore it.
pub const SNAPSHOT_TAG_KEY: &str = "ResourceManagerPrevReservedConcurrency";

const UNLIMITED: &str = "unlimited";

/// A function's reserved-concurrency setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// No reserved-concurrency limit configured.
    Unlimited,
    /// Reserved concurrency capped at the given number of executions.
    Limited(i32),
}

impl Concurrency {
    pub fn encode(&self) -> String {
        match self {
            Concurrency::Unlimited => UNLIMITED.to_string(),
            Concurrency::Limited(value) => value.to_string(),
        }
    }

    pub fn decode(raw: &str) -> Option<Self> {
        if raw == UNLIMITED {
            return Some(Concurrency::Unlimited);
        }
        raw.parse::<i32>()
            .ok()
            .filter(|value| *value >= 0)
            .map(Concurrency::Limited)
    }
}

impl std::fmt::Display for Concurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// What startup should do with a function's reserved concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePlan {
    /// Reapply the recorded cap.
    SetReserved(i32),
    /// Remove the limit entirely.
    RemoveLimit,
}

/// Decide how to restore a function from a (possibly absent) snapshot.
///
/// A missing snapshot means the function is assumed to have been unlimited
/// before shutdown. This is a best-effort default: a function that was
/// deliberately capped before this system ever managed it ends up
/// uncapped.
pub fn restore_plan(snapshot: Option<Concurrency>) -> RestorePlan {
    match snapshot {
        Some(Concurrency::Limited(value)) => RestorePlan::SetReserved(value),
        Some(Concurrency::Unlimited) | None => RestorePlan::RemoveLimit,
    }
}

/// True when the stored snapshot differs from the value about to be saved,
/// i.e. a tag write is actually needed.
pub fn needs_save(existing: Option<Concurrency>, value: Concurrency) -> bool {
    existing != Some(value)
}

/// Persistence for pre-shutdown concurrency snapshots.
///
/// The production implementation writes a tag on the function itself; the
/// trait exists so the store can be swapped for a real key-value backend
/// without touching the Lambda executor.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, function_arn: &str, value: Concurrency) -> Result<()>;
    async fn load(&self, function_arn: &str) -> Result<Option<Concurrency>>;
    async fn clear(&self, function_arn: &str) -> Result<()>;
}

/// Snapshot store backed by a tag on the Lambda function.
pub struct TagSnapshotStore {
    lambda: LambdaClient,
}

impl TagSnapshotStore {
    pub fn new(lambda: LambdaClient) -> Self {
        Self { lambda }
    }

    async fn read_raw(&self, function_arn: &str) -> Result<Option<String>> {
        let response = self
            .lambda
            .list_tags()
            .resource(function_arn)
            .send()
            .await?;
        Ok(response
            .tags()
            .and_then(|tags| tags.get(SNAPSHOT_TAG_KEY))
            .cloned())
    }
}

#[async_trait]
impl SnapshotStore for TagSnapshotStore {
    async fn save(&self, function_arn: &str, value: Concurrency) -> Result<()> {
        let existing = self
            .read_raw(function_arn)
            .await?
            .and_then(|raw| Concurrency::decode(&raw));
        if !needs_save(existing, value) {
            debug!(function = %function_arn, value = %value, "Snapshot tag already up to date");
            return Ok(());
        }

        info!(function = %function_arn, value = %value, "Saving concurrency snapshot tag");
        self.lambda
            .tag_resource()
            .resource(function_arn)
            .tags(SNAPSHOT_TAG_KEY, value.encode())
            .send()
            .await?;
        Ok(())
    }

    async fn load(&self, function_arn: &str) -> Result<Option<Concurrency>> {
        match self.read_raw(function_arn).await? {
            Some(raw) => match Concurrency::decode(&raw) {
                Some(value) => Ok(Some(value)),
                None => {
                    warn!(
                        function = %function_arn,
                        raw = %raw,
                        "Unparseable concurrency snapshot tag, treating as absent"
                    );
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn clear(&self, function_arn: &str) -> Result<()> {
        info!(function = %function_arn, "Removing concurrency snapshot tag");
        self.lambda
            .untag_resource()
            .resource(function_arn)
            .tag_keys(SNAPSHOT_TAG_KEY)
            .send()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store standing in for the tag-backed one.
    struct InMemorySnapshotStore {
        entries: Mutex<HashMap<String, Concurrency>>,
    }

    impl InMemorySnapshotStore {
        fn new() -> Self {
            Self {
                entries: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl SnapshotStore for InMemorySnapshotStore {
        async fn save(&self, function_arn: &str, value: Concurrency) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(function_arn.to_string(), value);
            Ok(())
        }

        async fn load(&self, function_arn: &str) -> Result<Option<Concurrency>> {
            Ok(self.entries.lock().unwrap().get(function_arn).copied())
        }

        async fn clear(&self, function_arn: &str) -> Result<()> {
            self.entries.lock().unwrap().remove(function_arn);
            Ok(())
        }
    }

    #[test]
    fn codec_round_trips() {
        for value in [Concurrency::Unlimited, Concurrency::Limited(0), Concurrency::Limited(7)] {
            assert_eq!(Concurrency::decode(&value.encode()), Some(value));
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(Concurrency::decode(""), None);
        assert_eq!(Concurrency::decode("seven"), None);
        assert_eq!(Concurrency::decode("-1"), None);
        assert_eq!(Concurrency::decode("7.5"), None);
    }

    #[test]
    fn restore_plan_reapplies_recorded_cap() {
        assert_eq!(
            restore_plan(Some(Concurrency::Limited(7))),
            RestorePlan::SetReserved(7)
        );
    }

    #[test]
    fn restore_plan_removes_limit_without_snapshot() {
        assert_eq!(restore_plan(None), RestorePlan::RemoveLimit);
        assert_eq!(
            restore_plan(Some(Concurrency::Unlimited)),
            RestorePlan::RemoveLimit
        );
    }

    #[test]
    fn save_is_skipped_when_value_unchanged() {
        assert!(!needs_save(
            Some(Concurrency::Limited(7)),
            Concurrency::Limited(7)
        ));
        assert!(needs_save(
            Some(Concurrency::Limited(7)),
            Concurrency::Limited(8)
        ));
        assert!(needs_save(None, Concurrency::Unlimited));
        assert!(needs_save(
            Some(Concurrency::Unlimited),
            Concurrency::Limited(0)
        ));
    }

    #[tokio::test]
    async fn store_round_trip_through_trait_object() {
        let store: Box<dyn SnapshotStore> = Box::new(InMemorySnapshotStore::new());
        let arn = "arn:aws:lambda:eu-west-1:123456789012:function:api";

        store.save(arn, Concurrency::Limited(7)).await.unwrap();
        assert_eq!(store.load(arn).await.unwrap(), Some(Concurrency::Limited(7)));

        store.clear(arn).await.unwrap();
        assert_eq!(store.load(arn).await.unwrap(), None);
    }
}
