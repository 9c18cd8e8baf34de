//! Container lifecycle actions

use crate::error::ManagerError;
use async_trait::async_trait;

/// Lifecycle actions a backend may support for one container
#[async_trait]
pub trait Manager: Send + Sync {
    async fn start(&self) -> Result<(), ManagerError>;
    async fn stop(&self) -> Result<(), ManagerError>;
    async fn pause(&self) -> Result<(), ManagerError>;
    async fn unpause(&self) -> Result<(), ManagerError>;
    async fn restart(&self) -> Result<(), ManagerError>;
    async fn remove(&self) -> Result<(), ManagerError>;
}

/// Manager for backends that only observe containers
#[derive(Debug, Clone, Copy)]
pub struct ReadOnlyManager {
    backend: &'static str,
}

impl ReadOnlyManager {
    pub fn new(backend: &'static str) -> Self {
        Self { backend }
    }

    fn unsupported(&self, action: &'static str) -> Result<(), ManagerError> {
        Err(ManagerError::Unsupported {
            action,
            backend: self.backend,
        })
    }
}

#[async_trait]
impl Manager for ReadOnlyManager {
    async fn start(&self) -> Result<(), ManagerError> {
        self.unsupported("start")
    }

    async fn stop(&self) -> Result<(), ManagerError> {
        self.unsupported("stop")
    }

    async fn pause(&self) -> Result<(), ManagerError> {
        self.unsupported("pause")
    }

    async fn unpause(&self) -> Result<(), ManagerError> {
        self.unsupported("unpause")
    }

    async fn restart(&self) -> Result<(), ManagerError> {
        self.unsupported("restart")
    }

    async fn remove(&self) -> Result<(), ManagerError> {
        self.unsupported("remove")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_only_manager_rejects_actions() {
        let manager = ReadOnlyManager::new("runc");
        let err = manager.pause().await.unwrap_err();
        assert_eq!(err.to_string(), "pause is not supported by the runc backend");
        assert!(manager.remove().await.is_err());
    }
}
