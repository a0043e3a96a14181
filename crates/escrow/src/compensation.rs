//! Compensation stack: runs a rejected transaction's undo labels in
//! LIFO order through the injected [`CompensationExecutor`], each
//! bounded by a fixed per-closure timeout so one stuck undo can't hang
//! the whole rollback.

use agentkern_govcore::CompensationExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const COMPENSATION_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `stack` (innermost-first, i.e. reverse of push order) through
/// `executor`. Returns `true` if every step completed; a single
/// failing or timed-out step aborts the remaining rollback and
/// returns `false` — the transaction moves to `Compensated` either
/// way, since a partial rollback still needs to be visible for
/// operator follow-up.
pub async fn run_compensation(executor: &dyn CompensationExecutor, stack: &[String]) -> bool {
    let mut clean = true;
    for label in stack.iter().rev() {
        let outcome = tokio::time::timeout(COMPENSATION_STEP_TIMEOUT, executor.run(label)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(label, %err, "compensation step failed");
                clean = false;
            }
            Err(_) => {
                error!(label, "compensation step timed out");
                clean = false;
            }
        }
    }
    if !clean {
        warn!("compensation stack completed with at least one failed step");
    }
    clean
}

/// A no-op executor for transactions with nothing registered to undo.
pub struct NoopCompensationExecutor;

#[async_trait::async_trait]
impl CompensationExecutor for NoopCompensationExecutor {
    async fn run(&self, _label: &str) -> agentkern_govcore::CoreResult<()> {
        Ok(())
    }
}

pub fn noop_executor() -> Arc<dyn CompensationExecutor> {
    Arc::new(NoopCompensationExecutor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentkern_govcore::CoreError;
    use tokio::sync::Mutex;

    struct RecordingExecutor {
        order: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait::async_trait]
    impl CompensationExecutor for RecordingExecutor {
        async fn run(&self, label: &str) -> agentkern_govcore::CoreResult<()> {
            self.order.lock().await.push(label.to_string());
            if self.fail_on.as_deref() == Some(label) {
                return Err(CoreError::StoreUnavailable("undo failed".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_labels_in_lifo_order() {
        let executor = RecordingExecutor {
            order: Mutex::new(Vec::new()),
            fail_on: None,
        };
        let stack = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(run_compensation(&executor, &stack).await);
        assert_eq!(*executor.order.lock().await, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn a_failing_step_still_runs_the_rest_but_reports_unclean() {
        let executor = RecordingExecutor {
            order: Mutex::new(Vec::new()),
            fail_on: Some("b".to_string()),
        };
        let stack = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(!run_compensation(&executor, &stack).await);
        assert_eq!(*executor.order.lock().await, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn empty_stack_is_trivially_clean() {
        let executor = NoopCompensationExecutor;
        assert!(run_compensation(&executor, &[]).await);
    }
}
