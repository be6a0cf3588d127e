//! Ordered undo stack for multi-step provisioning.
//!
//! Each successful step pushes the action that reverses it. On abort the
//! stack is unwound newest-first; a failing action is logged and the unwind
//! carries on with the next one. Nothing an undo action returns can change
//! the outcome the caller already decided on.

use futures::future::BoxFuture;
use std::fmt;
use tracing::{error, info};

type UndoAction<'a> = BoxFuture<'a, anyhow::Result<()>>;

/// Pending compensating actions, in the order their steps completed.
#[derive(Default)]
pub struct Compensations<'a> {
    actions: Vec<(String, UndoAction<'a>)>,
}

/// What happened while unwinding.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompensationReport {
    /// Descriptions of every action that was run, in execution order.
    pub attempted: Vec<String>,
    /// `(description, reason)` for each action that failed.
    pub failed: Vec<(String, String)>,
}

impl CompensationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<'a> Compensations<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the undo for a step that has just succeeded.
    ///
    /// The future is not polled until [`unwind`](Self::unwind) runs it.
    pub fn push<F>(&mut self, description: impl Into<String>, action: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'a,
    {
        self.actions.push((description.into(), Box::pin(action)));
    }

    /// Forget every pending action; the steps they guard are now permanent.
    pub fn disarm(mut self) {
        self.actions.clear();
    }

    /// Run every pending action, newest first.
    pub async fn unwind(mut self) -> CompensationReport {
        let mut report = CompensationReport::default();

        while let Some((description, action)) = self.actions.pop() {
            match action.await {
                Ok(()) => {
                    info!(step = %description, "compensation step completed");
                }
                Err(err) => {
                    error!(step = %description, error = %format!("{:#}", err), "compensation step failed");
                    report.failed.push((description.clone(), format!("{:#}", err)));
                }
            }
            report.attempted.push(description);
        }

        report
    }
}

impl fmt::Debug for Compensations<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(|(description, _)| description))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn unwinds_in_reverse_push_order() {
        let log = recorder();
        let mut undo = Compensations::new();
        for name in ["first", "second", "third"] {
            let log = log.clone();
            undo.push(name, async move {
                log.lock().unwrap().push(name);
                anyhow::Ok(())
            });
        }

        let report = undo.unwind().await;

        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
        assert_eq!(report.attempted, vec!["third", "second", "first"]);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn failing_action_does_not_stop_the_unwind() {
        let log = recorder();
        let mut undo = Compensations::new();

        let first = log.clone();
        undo.push("delete app", async move {
            first.lock().unwrap().push("delete app");
            anyhow::Ok(())
        });
        undo.push("delete bucket", async {
            Err::<(), _>(anyhow::anyhow!("bucket not empty"))
        });

        let report = undo.unwind().await;

        assert_eq!(*log.lock().unwrap(), vec!["delete app"]);
        assert_eq!(report.attempted.len(), 2);
        assert_eq!(
            report.failed,
            vec![("delete bucket".to_string(), "bucket not empty".to_string())]
        );
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn actions_are_lazy_until_unwound() {
        let log = recorder();
        let mut undo = Compensations::new();
        let inner = log.clone();
        undo.push("noop", async move {
            inner.lock().unwrap().push("ran");
            anyhow::Ok(())
        });

        assert_eq!(format!("{:?}", undo), r#"["noop"]"#);
        undo.disarm();
        assert!(log.lock().unwrap().is_empty());
    }
}
