//! Base Orch trait.

use async_trait::async_trait;

/// A reconciliation agent driven by table changes.
///
/// The daemon loop feeds observed changes into the agent's consumers and
/// then calls [`Orch::do_task`]. `do_task` is also called on every timer
/// tick so agents can retry work that was deferred.
///
/// # Lifecycle
///
/// 1. Construction: the agent is created with its store handle
/// 2. Initial load: every subscribed table is replayed as SET changes
/// 3. Event loop: `do_task()` runs after each batch of changes or tick
/// 4. Shutdown: the loop returns and the agent is dropped
#[async_trait]
pub trait Orch: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Processes everything queued on the agent's consumers.
    ///
    /// Failures are handled here (logged, retried or rejected); the loop
    /// never sees them.
    async fn do_task(&mut self);

    /// Returns true while queued or deferred work remains.
    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// Human readable listing of queued or deferred work.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingOrch {
        runs: usize,
    }

    #[async_trait]
    impl Orch for CountingOrch {
        fn name(&self) -> &str {
            "CountingOrch"
        }

        async fn do_task(&mut self) {
            self.runs += 1;
        }

        fn has_pending_tasks(&self) -> bool {
            self.runs == 0
        }
    }

    #[tokio::test]
    async fn test_orch_defaults() {
        let mut orch = CountingOrch { runs: 0 };

        assert_eq!(orch.name(), "CountingOrch");
        assert!(orch.has_pending_tasks());
        assert!(orch.dump_pending_tasks().is_empty());

        orch.do_task().await;
        assert_eq!(orch.runs, 1);
        assert!(!orch.has_pending_tasks());
    }
}
