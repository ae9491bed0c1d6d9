//! Exclusive access to the session's engine

use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::engine::RenderEngine;
use crate::{Error, Result};

/// Owner of the session's engine
///
/// Engine calls take a turn on a fair mutex so that they reach the engine one
/// at a time, in arrival order. Releasing the engine does not wait for the
/// current turn to finish.
#[derive(Debug)]
pub struct EngineHandle {
    turn: Arc<Mutex<()>>,
    slot: Mutex<Option<Arc<dyn RenderEngine>>>,
}

/// One turn on the engine
pub struct EngineGuard {
    engine: Arc<dyn RenderEngine>,
    _turn: OwnedMutexGuard<()>,
}

impl Deref for EngineGuard {
    type Target = dyn RenderEngine;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}

impl EngineHandle {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            turn: Arc::new(Mutex::new(())),
            slot: Mutex::new(Some(engine)),
        }
    }

    /// Wait for a turn on the engine
    ///
    /// Fails with [`Error::SessionClosed`] once the engine has been released.
    pub async fn lock(&self) -> Result<EngineGuard> {
        let turn = Arc::clone(&self.turn).lock_owned().await;
        let engine = self
            .slot
            .lock()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(Error::SessionClosed)?;

        Ok(EngineGuard { engine, _turn: turn })
    }

    /// Release the engine; later turns fail
    pub async fn take(&self) -> Option<Arc<dyn RenderEngine>> {
        self.slot.lock().await.take()
    }

    pub async fn is_released(&self) -> bool {
        self.slot.lock().await.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    #[tokio::test]
    async fn test_lock_after_take_fails() {
        let handle = EngineHandle::new(Arc::new(MockEngine::new()));
        assert!(handle.lock().await.is_ok());

        assert!(handle.take().await.is_some());
        assert!(handle.is_released().await);
        assert!(matches!(handle.lock().await, Err(Error::SessionClosed)));
        assert!(handle.take().await.is_none());
    }

    #[tokio::test]
    async fn test_take_does_not_wait_for_turn() {
        let handle = EngineHandle::new(Arc::new(MockEngine::new()));
        let guard = handle.lock().await.unwrap();

        assert!(handle.take().await.is_some());
        drop(guard);
    }
}
