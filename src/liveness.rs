//! Processing state read by the keep-alive endpoint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingState {
    pub is_processing: bool,
    pub current_task: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct Liveness {
    state: Arc<RwLock<ProcessingState>>,
}

/// Clears the processing state when dropped.
#[must_use]
pub struct ProcessingGuard {
    liveness: Liveness,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_processing(&self, task: &str) {
        let mut state = self.state.write();
        state.is_processing = true;
        state.current_task = Some(task.to_string());
        state.started_at = Some(Utc::now());
    }

    pub fn clear(&self) {
        *self.state.write() = ProcessingState::default();
    }

    /// Marks `task` as running until the returned guard drops.
    pub fn enter(&self, task: &str) -> ProcessingGuard {
        self.set_processing(task);
        ProcessingGuard {
            liveness: self.clone(),
        }
    }

    pub fn snapshot(&self) -> ProcessingState {
        self.state.read().clone()
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.liveness.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_clears_on_drop() {
        let liveness = Liveness::new();
        {
            let _guard = liveness.enter("Video Assembly");
            let state = liveness.snapshot();
            assert!(state.is_processing);
            assert_eq!(state.current_task.as_deref(), Some("Video Assembly"));
            assert!(state.started_at.is_some());
        }
        assert_eq!(liveness.snapshot(), ProcessingState::default());
    }

    #[test]
    fn clones_share_state() {
        let liveness = Liveness::new();
        let reader = liveness.clone();
        liveness.set_processing("YouTube Upload");
        assert_eq!(reader.snapshot().current_task.as_deref(), Some("YouTube Upload"));
        liveness.clear();
        assert!(!reader.snapshot().is_processing);
    }
}
