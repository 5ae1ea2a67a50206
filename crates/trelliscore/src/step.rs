//! Durable, replay-safe units of work.
//!
//! A step is identified by the run key (the trigger event's idempotency key)
//! plus a stable step name. The first successful result of a step is recorded
//! in a [`StepStore`]; when a run is re-entered with the same key, completed
//! steps return their recorded result without executing again.

use crate::{FlowError, NodeError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Retry budget applied to every step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

/// Error types that can flow out of a step.
pub trait StepError: std::error::Error + Sized {
    fn is_retriable(&self) -> bool;

    /// Convert the last failure once the retry budget is spent.
    fn exhausted(step: &str, attempts: u32, last: Self) -> Self;

    /// Wrap a failure of the step store itself.
    fn store(err: FlowError) -> Self;

    /// A recorded result that no longer deserializes. Never retriable.
    fn unreadable(step: &str, err: serde_json::Error) -> Self;
}

impl StepError for FlowError {
    fn is_retriable(&self) -> bool {
        FlowError::is_retriable(self)
    }

    fn exhausted(step: &str, attempts: u32, last: Self) -> Self {
        FlowError::RetriesExhausted {
            step: step.to_string(),
            attempts,
            source: Box::new(last),
        }
    }

    fn store(err: FlowError) -> Self {
        err
    }

    fn unreadable(_step: &str, err: serde_json::Error) -> Self {
        FlowError::Serialization(err)
    }
}

impl StepError for NodeError {
    fn is_retriable(&self) -> bool {
        NodeError::is_retriable(self)
    }

    fn exhausted(step: &str, attempts: u32, last: Self) -> Self {
        NodeError::NonRetriable(format!(
            "step '{}' failed after {} attempts: {}",
            step, attempts, last
        ))
    }

    fn store(err: FlowError) -> Self {
        NodeError::ExecutionFailed(err.to_string())
    }

    fn unreadable(step: &str, err: serde_json::Error) -> Self {
        NodeError::NonRetriable(format!("recorded result of step '{}' is unreadable: {}", step, err))
    }
}

/// Where completed step results are recorded.
#[async_trait]
pub trait StepStore: Send + Sync {
    async fn load(&self, run_key: &str, step: &str) -> Result<Option<serde_json::Value>>;

    async fn save(&self, run_key: &str, step: &str, value: serde_json::Value) -> Result<()>;
}

/// Process-local step store.
#[derive(Default)]
pub struct InMemoryStepStore {
    steps: RwLock<HashMap<(String, String), serde_json::Value>>,
}

impl InMemoryStepStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the steps recorded for a run, sorted.
    pub async fn completed_steps(&self, run_key: &str) -> Vec<String> {
        let steps = self.steps.read().await;
        let mut names: Vec<String> = steps
            .keys()
            .filter(|(key, _)| key == run_key)
            .map(|(_, step)| step.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl StepStore for InMemoryStepStore {
    async fn load(&self, run_key: &str, step: &str) -> Result<Option<serde_json::Value>> {
        let steps = self.steps.read().await;
        Ok(steps.get(&(run_key.to_string(), step.to_string())).cloned())
    }

    async fn save(&self, run_key: &str, step: &str, value: serde_json::Value) -> Result<()> {
        let mut steps = self.steps.write().await;
        steps.insert((run_key.to_string(), step.to_string()), value);
        Ok(())
    }
}

/// Handle through which the engine and executors run durable steps.
#[derive(Clone)]
pub struct StepHandle {
    store: Arc<dyn StepStore>,
    run_key: String,
    prefix: String,
    policy: RetryPolicy,
}

impl StepHandle {
    pub fn new(store: Arc<dyn StepStore>, run_key: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            store,
            run_key: run_key.into(),
            prefix: String::new(),
            policy,
        }
    }

    pub fn run_key(&self) -> &str {
        &self.run_key
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// A handle whose step names live under `scope/`.
    pub fn scoped(&self, scope: &str) -> Self {
        Self {
            store: self.store.clone(),
            run_key: self.run_key.clone(),
            prefix: format!("{}{}/", self.prefix, scope),
            policy: self.policy.clone(),
        }
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Run `f` as a named step, or return its recorded result on replay.
    pub async fn run<T, E, F, Fut>(&self, name: &str, mut f: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: StepError,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let step = self.qualified(name);

        if let Some(recorded) = self.recorded::<T, E>(name).await? {
            debug!(run_key = %self.run_key, step = %step, "Replaying recorded step");
            return Ok(recorded);
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => {
                    let recorded = serde_json::to_value(&value).map_err(|e| E::store(e.into()))?;
                    self.store
                        .save(&self.run_key, &step, recorded)
                        .await
                        .map_err(E::store)?;
                    return Ok(value);
                }
                Err(err) if err.is_retriable() && attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        run_key = %self.run_key,
                        step = %step,
                        attempt,
                        "Step failed, retrying in {}ms: {}",
                        delay.as_millis(),
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_retriable() => {
                    return Err(E::exhausted(&step, attempt, err));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// The recorded result of a step, if it has completed for this run.
    pub async fn recorded<T, E>(&self, name: &str) -> std::result::Result<Option<T>, E>
    where
        T: DeserializeOwned,
        E: StepError,
    {
        let step = self.qualified(name);
        match self.store.load(&self.run_key, &step).await.map_err(E::store)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| E::unreadable(&step, e)),
            None => Ok(None),
        }
    }

    /// Sleep as a step; a replayed run does not sleep again.
    pub async fn sleep<E: StepError>(&self, name: &str, duration: Duration) -> std::result::Result<(), E> {
        self.run(name, || async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn handle(store: Arc<InMemoryStepStore>, attempts: u32) -> StepHandle {
        StepHandle::new(store, "evt_1", RetryPolicy::immediate(attempts))
    }

    #[tokio::test]
    async fn completed_step_is_replayed_not_rerun() {
        let store = Arc::new(InMemoryStepStore::new());
        let calls = AtomicU32::new(0);
        let calls = &calls;

        for _ in 0..2 {
            let value: u32 = handle(store.clone(), 3)
                .run("count", || async move {
                    Ok::<_, FlowError>(calls.fetch_add(1, Ordering::SeqCst) + 10)
                })
                .await
                .unwrap();
            assert_eq!(value, 10);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retriable_failure_is_retried_until_success() {
        let store = Arc::new(InMemoryStepStore::new());
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let value: String = handle(store, 3)
            .run("flaky", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(NodeError::ExecutionFailed("503".into()))
                } else {
                    Ok("ok".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_failure_stops_immediately() {
        let store = Arc::new(InMemoryStepStore::new());
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: std::result::Result<(), NodeError> = handle(store.clone(), 5)
            .run("fatal", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NodeError::Configuration("variableName is required".into()))
            })
            .await;

        assert_eq!(
            result,
            Err(NodeError::Configuration("variableName is required".into()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.completed_steps("evt_1").await.is_empty());
    }

    #[tokio::test]
    async fn exhausted_budget_becomes_fatal() {
        let store = Arc::new(InMemoryStepStore::new());

        let result: std::result::Result<(), FlowError> = handle(store, 2)
            .run("down", || async { Err(FlowError::Store("connection reset".into())) })
            .await;

        match result {
            Err(err @ FlowError::RetriesExhausted { .. }) => {
                assert!(!err.is_retriable());
                assert!(err.to_string().contains("after 2 attempts"));
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn scoped_handles_do_not_collide() {
        let store = Arc::new(InMemoryStepStore::new());
        let root = handle(store.clone(), 1);

        let a: u32 = root.scoped("node:a").run("fetch", || async { Ok::<_, FlowError>(1) }).await.unwrap();
        let b: u32 = root.scoped("node:b").run("fetch", || async { Ok::<_, FlowError>(2) }).await.unwrap();

        assert_eq!((a, b), (1, 2));
        assert_eq!(
            store.completed_steps("evt_1").await,
            vec!["node:a/fetch".to_string(), "node:b/fetch".to_string()]
        );
    }

    #[tokio::test]
    async fn unreadable_record_is_not_retried() {
        let store = Arc::new(InMemoryStepStore::new());
        store
            .save("evt_1", "node:a/fetch", serde_json::json!("not a number"))
            .await
            .unwrap();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: std::result::Result<u32, NodeError> = handle(store, 3)
            .scoped("node:a")
            .run("fetch", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, NodeError::NonRetriable(ref msg) if msg.contains("node:a/fetch")));
        assert!(!err.is_retriable());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recorded_reports_completed_steps_only() {
        let store = Arc::new(InMemoryStepStore::new());
        let step = handle(store, 1);

        let before: Option<u32> = step.recorded::<u32, FlowError>("count").await.unwrap();
        step.run("count", || async { Ok::<_, FlowError>(7u32) }).await.unwrap();
        let after: Option<u32> = step.recorded::<u32, FlowError>("count").await.unwrap();

        assert_eq!((before, after), (None, Some(7)));
    }

    #[test]
    fn backoff_grows_geometrically() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }
}
