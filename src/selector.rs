//! Active backend tracking.

use tracing::info;

use crate::providers::Backend;

/// Notification emitted whenever the user picks a backend. The owner of the
/// selector hands it to whatever must react (the controller resets the
/// session on receipt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendChanged(pub Backend);

/// Holds the single active [`Backend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendSelector {
    active: Backend,
}

impl BackendSelector {
    pub fn new(initial: Backend) -> Self {
        BackendSelector { active: initial }
    }

    /// Set the active backend. Always emits, even when re-selecting the
    /// current value, because a selection resets the conversation.
    pub fn select(&mut self, backend: Backend) -> BackendChanged {
        let previous = std::mem::replace(&mut self.active, backend);
        info!(from = %previous, to = %backend, "backend selected");
        BackendChanged(backend)
    }

    pub fn current(&self) -> Backend {
        self.active
    }
}
