use std::time::Duration;

use anyhow::Error;
use async_trait::async_trait;

use super::model::{HistoryEntry, HistoryStatus, RuntimeContainer};

/// Boundary to the container runtime. Implementations must convert
/// every runtime failure into an `Error`; `await_healthy` is the one
/// exception and reports failure as `false`.
#[async_trait]
pub trait ContainerRuntime {
    /// All running containers with their labels.
    async fn list_running(&self) -> Result<Vec<RuntimeContainer>, Error>;

    async fn inspect(&self, name: &str) -> Result<RuntimeContainer, Error>;

    async fn pull(&self, image: &str, tag: &str) -> Result<(), Error>;

    async fn restart(&self, name: &str) -> Result<(), Error>;

    /// Pull `image`, then stop, remove and recreate the container under
    /// the same name with its introspected configuration carried over.
    async fn recreate(&self, name: &str, image: &str) -> Result<(), Error>;

    /// `docker compose up -d --no-deps <service>` against one file.
    async fn compose_up(&self, file_path: &str, service: &str) -> Result<(), Error>;

    /// Poll live status until the container is running and healthy (or
    /// has no health probe), or `timeout` elapses.
    async fn await_healthy(&self, name: &str, timeout: Duration) -> bool;
}

/// Read-only tag listing against the two supported registry APIs.
#[async_trait]
pub trait RegistryClient {
    /// Up to 50 most recent tags of a DockerHub-compatible repository.
    async fn dockerhub_tags(&self, org: &str, repo: &str) -> Result<Vec<String>, Error>;

    /// Tags of up to 30 most recent GHCR package versions, flattened in
    /// listing order.
    async fn ghcr_tags(&self, org: &str, repo: &str) -> Result<Vec<String>, Error>;
}

/// Durable store for version history, pending updates and settings
/// overrides. Each call is a single atomic statement.
#[async_trait]
pub trait VersionStore {
    /// Append an entry and prune the container's history to `limit` rows,
    /// oldest first.
    async fn add_history(
        &self,
        container: &str,
        tag: &str,
        status: HistoryStatus,
        limit: u32,
    ) -> Result<(), Error>;

    /// Most recent `limit` entries, newest first.
    async fn history(&self, container: &str, limit: u32) -> Result<Vec<HistoryEntry>, Error>;

    async fn save_available_update(&self, container: &str, tag: &str) -> Result<(), Error>;

    async fn clear_available_update(&self, container: &str) -> Result<(), Error>;

    async fn available_update(&self, container: &str) -> Result<Option<String>, Error>;

    async fn setting(&self, key: &str) -> Result<Option<String>, Error>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), Error>;

    async fn settings(&self) -> Result<Vec<(String, String)>, Error>;
}

/// Push notification channel. Best effort: implementations log and
/// swallow delivery failures.
#[async_trait]
pub trait Notifier {
    async fn notify(&self, title: &str, body: &str, priority: &str, tags: &str);
}
