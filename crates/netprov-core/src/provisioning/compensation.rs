//! Compensating actions for activation rollback

use tracing::{info, warn};

use crate::Error;
use crate::device::DeviceSession;

/// Undo of one object created during the forward pass
#[derive(Debug, Clone)]
pub(crate) struct Compensation {
    pub path: &'static str,
    pub id: String,
    /// Human-readable object description for logs
    pub label: String,
}

/// Compensations collected in forward order, unwound in reverse
#[derive(Debug, Default)]
pub(crate) struct Compensations {
    actions: Vec<Compensation>,
}

impl Compensations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: &'static str, id: impl Into<String>, label: impl Into<String>) {
        self.actions.push(Compensation {
            path,
            id: id.into(),
            label: label.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Remove every registered object, newest first
    ///
    /// Every attempt is logged. Failures are returned and never stop the
    /// remaining removals.
    pub async fn unwind(self, session: &DeviceSession, contract_id: i64) -> Vec<Error> {
        let mut failures = Vec::new();
        for action in self.actions.into_iter().rev() {
            info!(
                contract_id,
                path = action.path,
                id = %action.id,
                "Rolling back {}",
                action.label
            );
            match session.resource(action.path).remove(&action.id).await {
                Ok(()) => info!(contract_id, path = action.path, "Rolled back {}", action.label),
                Err(e) => {
                    warn!(
                        contract_id,
                        path = action.path,
                        id = %action.id,
                        "Rollback of {} failed: {}",
                        action.label,
                        e
                    );
                    failures.push(e);
                }
            }
        }
        failures
    }
}
