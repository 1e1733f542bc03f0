use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use itertools::Itertools;
use log::{error, info, warn};
use tokio::sync::Mutex as TokioMutex;

use crate::config::AppConfig;
use jobs::{JobId, JobTracker, Severity};
use model::{HistoryStatus, MonitoredContainer, OpResult, Settings, StrategyConfig};
use port::{ContainerRuntime, Notifier, RegistryClient, VersionStore};

pub mod files;
pub mod jobs;
pub mod model;
pub mod port;
pub mod strategy;
pub mod version;

/// Shorter health wait after a rollback; its failure is not retried.
const ROLLBACK_HEALTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Changelog pages for commonly deployed images, keyed by an image
/// reference fragment. `{repo}` expands to the last path segment.
const KNOWN_CHANGELOGS: [(&str, &str); 11] = [
    ("lscr.io/linuxserver", "https://github.com/linuxserver/{repo}/releases"),
    ("ghcr.io/immich-app", "https://github.com/immich-app/immich/releases"),
    ("ghcr.io/gethomepage", "https://github.com/gethomepage/homepage/releases"),
    ("ghcr.io/flaresolverr", "https://github.com/FlareSolverr/FlareSolverr/releases"),
    ("ghcr.io/advplyr", "https://github.com/advplyr/audiobookshelf/releases"),
    ("adguard/adguardhome", "https://github.com/AdguardTeam/AdGuardHome/releases"),
    ("binwiederhier/ntfy", "https://github.com/binwiederhier/ntfy/releases"),
    ("plexinc/pms-docker", "https://forums.plex.tv/t/plex-media-server/30447"),
    ("qbittorrentofficial", "https://github.com/qbittorrent/qBittorrent/releases"),
    ("jellyfin/jellyfin", "https://github.com/jellyfin/jellyfin/releases"),
    ("portainer/portainer", "https://github.com/portainer/portainer/releases"),
];

pub struct UpdateService {
    pub config: AppConfig,
    pub runtime: Box<dyn ContainerRuntime + Send + Sync>,
    pub registry: Box<dyn RegistryClient + Send + Sync>,
    pub store: Box<dyn VersionStore + Send + Sync>,
    pub notifier: Box<dyn Notifier + Send + Sync>,
    pub jobs: JobTracker,
    /// One lock per container name so update/rollback/auto-update runs
    /// against the same container serialize.
    locks: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

impl UpdateService {
    pub fn new(
        config: AppConfig,
        runtime: Box<dyn ContainerRuntime + Send + Sync>,
        registry: Box<dyn RegistryClient + Send + Sync>,
        store: Box<dyn VersionStore + Send + Sync>,
        notifier: Box<dyn Notifier + Send + Sync>,
    ) -> UpdateService {
        UpdateService {
            config,
            runtime,
            registry,
            store,
            notifier,
            jobs: JobTracker::new(),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn container_lock(&self, name: &str) -> Arc<TokioMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Emit a progress line to the log and, when present, to the job's
    /// ledger.
    fn progress(&self, job: Option<JobId>, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warn => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
        if let Some(id) = job {
            self.jobs.append(id, severity, message);
        }
    }

    async fn setting_or<T: std::str::FromStr + Copy>(&self, key: &str, default: T) -> T {
        match self.store.setting(key).await {
            Ok(Some(value)) => value.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Effective settings for one operation: store overrides first,
    /// static configuration as the fallback.
    pub async fn settings(&self) -> Settings {
        Settings {
            allow_prerelease: self
                .setting_or("allow_prerelease", self.config.allow_prerelease)
                .await,
            auto_update: self.setting_or("auto_update", self.config.auto_update).await,
            health_check_timeout: self
                .setting_or("health_check_timeout", self.config.health_check_timeout)
                .await,
            history_limit: self
                .setting_or("history_limit", self.config.history_limit)
                .await,
            check_interval: self
                .setting_or("check_interval", self.config.check_interval)
                .await,
        }
    }

    /// Fresh discovery pass: every running container that opted in via
    /// the enable label or the legacy name mapping, updates first.
    pub async fn monitored_containers(&self) -> Vec<MonitoredContainer> {
        let running = match self.runtime.list_running().await {
            Ok(running) => running,
            Err(e) => {
                error!("Container discovery failed: {:#}", e);
                return Vec::new();
            }
        };
        let settings = self.settings().await;
        let version_map = self.config.version_map();
        let changelog_map = self.config.changelog_map();

        let mut items = Vec::new();
        for container in running {
            let own = strategy::own_labels(&container.labels);
            let legacy = version_map.contains_key(&container.name);
            let enabled = own
                .get("enable")
                .map_or(false, |v| v.eq_ignore_ascii_case("true"));
            if !enabled && !legacy {
                continue;
            }

            let strategy_config =
                strategy::resolve_strategy(&container.name, &own, &version_map);
            let current_tag = strategy_config
                .read_current(&self.config.env_file_path)
                .unwrap_or_else(|| container.tag.clone());
            let available_tag = self
                .store
                .available_update(&container.name)
                .await
                .unwrap_or_default();
            let history = self
                .store
                .history(&container.name, settings.history_limit)
                .await
                .unwrap_or_default();
            let has_update = available_tag
                .as_deref()
                .map_or(false, |tag| tag != current_tag);

            items.push(MonitoredContainer {
                container: container.name,
                changelog: changelog_for(&container.image, own.get("changelog"), &changelog_map),
                image: container.image,
                current_tag,
                available_tag,
                has_update,
                status: container.status,
                strategy: strategy_config.name(),
                strategy_label: strategy_config.label(),
                history,
            });
        }
        items
            .into_iter()
            .sorted_by_key(|item| (!item.has_update, item.container.clone()))
            .collect()
    }

    /// Update one container to `new_tag` under its resolved strategy,
    /// gated by the health check and rolled back on gate failure.
    pub async fn update_service(
        &self,
        container: &str,
        new_tag: &str,
        job: Option<JobId>,
    ) -> OpResult {
        let lock = self.container_lock(container);
        let _guard = lock.lock().await;
        let settings = self.settings().await;

        let target = match self.runtime.inspect(container).await {
            Ok(target) => target,
            Err(e) => {
                let msg = format!("Cannot inspect {}: {:#}", container, e);
                self.progress(job, Severity::Error, msg.clone());
                return OpResult::err(msg);
            }
        };
        if target.image.is_empty() || target.image == "unknown" {
            return OpResult::err("Cannot determine image name");
        }

        let own = strategy::own_labels(&target.labels);
        let strategy_config =
            strategy::resolve_strategy(container, &own, &self.config.version_map());
        self.progress(
            job,
            Severity::Info,
            format!(
                "Updating {} to {} via {}",
                container,
                new_tag,
                strategy_config.label()
            ),
        );

        // Record the recovery point before any change is made.
        let current_tag = match &strategy_config {
            StrategyConfig::DockerApi => target.tag.clone(),
            _ => strategy_config
                .read_current(&self.config.env_file_path)
                .unwrap_or_else(|| "unknown".to_string()),
        };
        if let Err(e) = self
            .store
            .add_history(
                container,
                &current_tag,
                HistoryStatus::Previous,
                settings.history_limit,
            )
            .await
        {
            self.progress(
                job,
                Severity::Warn,
                format!("Could not record previous tag: {:#}", e),
            );
        }

        self.progress(
            job,
            Severity::Info,
            format!("Applying {} -> {}", current_tag, new_tag),
        );
        // The mechanism may know the displaced tag better than the
        // inspection did (an untagged compose image reads as "latest").
        let displaced_tag = match strategy_config
            .apply(
                self.runtime.as_ref(),
                &self.config.env_file_path,
                container,
                &target.image,
                new_tag,
                &current_tag,
            )
            .await
        {
            Ok(tag) => tag,
            Err(e) => {
                // Apply-time failures are assumed to have left nothing worth
                // reverting; the env-file pull case already reverted itself.
                let msg = format!("{:#}", e);
                self.progress(job, Severity::Error, msg.clone());
                return OpResult::err(msg);
            }
        };

        self.progress(
            job,
            Severity::Info,
            format!(
                "Waiting up to {}s for {} to become healthy",
                settings.health_check_timeout, container
            ),
        );
        let healthy = self
            .runtime
            .await_healthy(
                container,
                Duration::from_secs(settings.health_check_timeout),
            )
            .await;
        if !healthy {
            self.progress(
                job,
                Severity::Warn,
                format!("Health check failed, rolling back {} to {}", container, displaced_tag),
            );
            match strategy_config
                .revert(
                    self.runtime.as_ref(),
                    &self.config.env_file_path,
                    container,
                    &target.image,
                    &displaced_tag,
                )
                .await
            {
                Ok(()) => {
                    self.runtime
                        .await_healthy(container, ROLLBACK_HEALTH_TIMEOUT)
                        .await;
                }
                Err(e) => {
                    self.progress(job, Severity::Error, format!("Rollback failed: {:#}", e));
                }
            }
            self.notifier
                .notify(
                    &format!("Update Failed: {}", container),
                    &format!("Rolled back to {}", displaced_tag),
                    "4",
                    "warning",
                )
                .await;
            return OpResult::err("Health check failed - auto-rolled back");
        }

        if let Err(e) = self
            .store
            .add_history(
                container,
                new_tag,
                HistoryStatus::Deployed,
                settings.history_limit,
            )
            .await
        {
            self.progress(
                job,
                Severity::Warn,
                format!("Could not record deployed tag: {:#}", e),
            );
        }
        if let Err(e) = self.store.clear_available_update(container).await {
            self.progress(
                job,
                Severity::Warn,
                format!("Could not clear pending update: {:#}", e),
            );
        }
        self.notifier
            .notify(
                &format!("Updated: {}", container),
                &format!("{}: {} to {}", container, current_tag, new_tag),
                "3",
                "white_check_mark",
            )
            .await;
        self.progress(
            job,
            Severity::Info,
            format!("Updated {} to {}", container, new_tag),
        );
        OpResult::ok(format!("Updated to {}", new_tag))
    }

    /// Roll back to `target_tag`, or to the second-most-recent history
    /// entry when no target is given, by re-running the update pipeline.
    pub async fn rollback_service(
        &self,
        container: &str,
        target_tag: Option<String>,
        job: Option<JobId>,
    ) -> OpResult {
        let settings = self.settings().await;
        let history = self
            .store
            .history(container, settings.history_limit)
            .await
            .unwrap_or_default();
        if history.is_empty() {
            return OpResult::err("No version history available");
        }
        let target = match target_tag {
            Some(tag) => tag,
            None => {
                let candidates: Vec<_> = history
                    .iter()
                    .filter(|h| {
                        matches!(
                            h.status,
                            HistoryStatus::Previous
                                | HistoryStatus::Deployed
                                | HistoryStatus::RolledBack
                        )
                    })
                    .collect();
                if candidates.len() < 2 {
                    return OpResult::err("No previous version to roll back to");
                }
                candidates[1].tag.clone()
            }
        };

        self.progress(
            job,
            Severity::Info,
            format!("Rolling back {} to {}", container, target),
        );
        let result = self.update_service(container, &target, job).await;
        if result.success {
            if let Err(e) = self
                .store
                .add_history(
                    container,
                    &target,
                    HistoryStatus::RolledBack,
                    settings.history_limit,
                )
                .await
            {
                self.progress(
                    job,
                    Severity::Warn,
                    format!("Could not record rollback: {:#}", e),
                );
            }
        }
        result
    }

    /// One poller pass: ask the resolver about every monitored container
    /// sequentially, record findings and auto-update when configured.
    pub async fn check_once(&self, job: Option<JobId>) {
        let settings = self.settings().await;
        let mut found: Vec<(String, String, String)> = Vec::new();

        for item in self.monitored_containers().await {
            if item.image.is_empty() || item.image == "unknown" {
                continue;
            }
            let latest = version::resolve_latest_tag(
                self.registry.as_ref(),
                &item.image,
                &item.current_tag,
                settings.allow_prerelease,
            )
            .await;
            let Some(latest) = latest else { continue };
            if latest == item.current_tag {
                continue;
            }

            self.progress(
                job,
                Severity::Info,
                format!(
                    "Update available: {} {} -> {}",
                    item.container, item.current_tag, latest
                ),
            );
            if let Err(e) = self
                .store
                .save_available_update(&item.container, &latest)
                .await
            {
                self.progress(
                    job,
                    Severity::Warn,
                    format!("Could not record available update: {:#}", e),
                );
            }
            found.push((item.container.clone(), item.current_tag.clone(), latest.clone()));

            if settings.auto_update {
                let result = self.update_service(&item.container, &latest, job).await;
                if !result.success {
                    self.progress(
                        job,
                        Severity::Error,
                        format!(
                            "Auto-update failed for {}: {}",
                            item.container,
                            result.error.unwrap_or_default()
                        ),
                    );
                }
            }
        }

        if !found.is_empty() && !settings.auto_update {
            let lines = found
                .iter()
                .map(|(name, current, latest)| format!("- {}: {} -> {}", name, current, latest))
                .join("\n");
            self.notifier
                .notify(
                    &format!("{} update(s) available", found.len()),
                    &format!("Updates ready:\n{}", lines),
                    "3",
                    "package",
                )
                .await;
        }
    }
}

fn changelog_for(
    image: &str,
    label_override: Option<&String>,
    overrides: &HashMap<String, String>,
) -> Option<String> {
    if let Some(url) = label_override {
        return Some(url.clone());
    }
    let image_lower = image.to_lowercase();
    for (fragment, url) in overrides {
        if image_lower.contains(&fragment.to_lowercase()) {
            return Some(url.clone());
        }
    }
    let repo = image.rsplit('/').next().unwrap_or(image);
    KNOWN_CHANGELOGS
        .iter()
        .find(|(pattern, _)| image_lower.contains(pattern))
        .map(|(_, template)| template.replace("{repo}", repo))
}

/// Long-lived background loop; one sequential pass per interval.
pub async fn run_poller(service: Arc<UpdateService>) {
    loop {
        info!("Running update check ...");
        service.check_once(None).await;
        let interval = service.settings().await.check_interval;
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}
