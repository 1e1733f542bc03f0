use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Error};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::network::ConnectNetworkOptions;
use bollard::secret::{
    ContainerInspectResponse, ContainerStateStatusEnum, CreateImageInfo, EndpointSettings,
    HealthStatusEnum, HostConfig,
};
use bollard::Docker;
use futures::TryStreamExt;
use log::{error, info, warn};
use regex::Regex;
use tokio::process::Command;

use crate::domain::model::RuntimeContainer;
use crate::domain::port::ContainerRuntime;

/// Grace period for stopping a container before recreation.
const STOP_TIMEOUT_SECS: i64 = 30;
const COMPOSE_TIMEOUT: Duration = Duration::from_secs(120);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Auto-generated network aliases are the short container id.
static CONTAINER_ID_ALIAS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{12}$").unwrap());

pub struct DockerRuntime {
    pub docker: Docker,
}

fn split_image(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((base, tag)) if !tag.contains('/') => (base.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

fn non_empty_vec<T>(v: Option<Vec<T>>) -> Option<Vec<T>> {
    v.filter(|v| !v.is_empty())
}

fn non_empty_map<K, V>(m: Option<HashMap<K, V>>) -> Option<HashMap<K, V>> {
    m.filter(|m| !m.is_empty())
}

fn non_empty_string(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Rebuild the creation config of a running container from its
/// inspection, omitting every field introspection reports as empty.
fn carry_over_config(inspected: &ContainerInspectResponse, new_image: &str) -> Config<String> {
    let cfg = inspected.config.clone().unwrap_or_default();
    let host = inspected.host_config.clone().unwrap_or_default();
    Config {
        image: Some(new_image.to_string()),
        env: non_empty_vec(cfg.env),
        labels: non_empty_map(cfg.labels),
        hostname: non_empty_string(cfg.hostname),
        entrypoint: non_empty_vec(cfg.entrypoint),
        cmd: non_empty_vec(cfg.cmd),
        working_dir: non_empty_string(cfg.working_dir),
        user: non_empty_string(cfg.user),
        tty: cfg.tty,
        open_stdin: cfg.open_stdin,
        host_config: Some(HostConfig {
            binds: non_empty_vec(host.binds),
            restart_policy: host.restart_policy,
            network_mode: non_empty_string(host.network_mode),
            port_bindings: non_empty_map(host.port_bindings),
            cap_add: non_empty_vec(host.cap_add),
            cap_drop: non_empty_vec(host.cap_drop),
            devices: non_empty_vec(host.devices),
            privileged: host.privileged,
            shm_size: host.shm_size,
            pid_mode: non_empty_string(host.pid_mode),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl DockerRuntime {
    fn to_runtime_container(
        name: String,
        image: Option<String>,
        status: Option<String>,
        labels: Option<HashMap<String, String>>,
    ) -> RuntimeContainer {
        let (image, tag) = split_image(image.as_deref().unwrap_or("unknown"));
        RuntimeContainer {
            name,
            image,
            tag,
            status: status.unwrap_or_else(|| "unknown".to_string()),
            labels: labels.unwrap_or_default(),
        }
    }

    async fn reconnect_networks(
        &self,
        name: &str,
        inspected: &ContainerInspectResponse,
        default_network: &str,
    ) {
        let networks = inspected
            .network_settings
            .clone()
            .and_then(|s| s.networks)
            .unwrap_or_default();
        for (net_name, endpoint) in networks {
            if net_name == default_network {
                continue;
            }
            // keep user aliases, drop the auto-generated container-id one
            let aliases: Vec<String> = endpoint
                .aliases
                .unwrap_or_default()
                .into_iter()
                .filter(|a| !CONTAINER_ID_ALIAS.is_match(a))
                .collect();
            let options = ConnectNetworkOptions {
                container: name.to_string(),
                endpoint_config: EndpointSettings {
                    aliases: non_empty_vec(Some(aliases)),
                    ..Default::default()
                },
            };
            if let Err(e) = self.docker.connect_network(&net_name, options).await {
                warn!("Could not attach {} to {}: {}", name, net_name, e);
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<RuntimeContainer>, Error> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;
        Ok(containers
            .into_iter()
            .map(|c| {
                let name = c
                    .names
                    .and_then(|names| names.first().cloned())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .or(c.id)
                    .unwrap_or_default();
                Self::to_runtime_container(name, c.image, c.state, c.labels)
            })
            .collect())
    }

    async fn inspect(&self, name: &str) -> Result<RuntimeContainer, Error> {
        let inspected = self
            .docker
            .inspect_container(name, None)
            .await
            .with_context(|| format!("Can't inspect container {}", name))?;
        let cfg = inspected.config.unwrap_or_default();
        let status = inspected
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string());
        Ok(Self::to_runtime_container(
            name.to_string(),
            cfg.image,
            status,
            cfg.labels,
        ))
    }

    async fn pull(&self, image: &str, tag: &str) -> Result<(), Error> {
        info!("Pulling {}:{} ...", image, tag);
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: image,
                    tag,
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<CreateImageInfo>>()
            .await
            .with_context(|| format!("Error while pulling {}:{}", image, tag))?;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<(), Error> {
        self.docker
            .restart_container(name, None)
            .await
            .with_context(|| format!("Error while restarting {}", name))
    }

    async fn recreate(&self, name: &str, image: &str) -> Result<(), Error> {
        let (base, tag) = split_image(image);
        self.pull(&base, &tag).await.context("Pull failed")?;

        let inspected = self
            .docker
            .inspect_container(name, None)
            .await
            .with_context(|| format!("Can't inspect container {}", name))?;

        info!("Stopping and removing {} ...", name);
        self.docker
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await
            .context("Stop failed")?;
        self.docker
            .remove_container(name, None::<RemoveContainerOptions>)
            .await
            .context("Remove failed")?;

        info!("Recreating {} with {} ...", name, image);
        let config = carry_over_config(&inspected, image);
        let default_network = config
            .host_config
            .as_ref()
            .and_then(|h| h.network_mode.clone())
            .unwrap_or_else(|| "bridge".to_string());
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name,
                    platform: None,
                }),
                config,
            )
            .await
            .context("Recreate failed")?;

        self.reconnect_networks(name, &inspected, &default_network)
            .await;

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .context("Start failed")
    }

    async fn compose_up(&self, file_path: &str, service: &str) -> Result<(), Error> {
        let run = Command::new("docker")
            .args(["compose", "-f", file_path, "up", "-d", "--no-deps", service])
            .output();
        let output = tokio::time::timeout(COMPOSE_TIMEOUT, run)
            .await
            .map_err(|_| anyhow!("docker compose up timed out"))?
            .context("Failed to run docker compose")?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Err(anyhow!(
            "docker compose up failed: {}",
            if stderr.is_empty() { stdout } else { stderr }
        ))
    }

    async fn await_healthy(&self, name: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.docker.inspect_container(name, None).await {
                Ok(inspected) => {
                    if let Some(state) = inspected.state {
                        let running = state.status == Some(ContainerStateStatusEnum::RUNNING);
                        let healthy = match state.health.and_then(|h| h.status) {
                            None | Some(HealthStatusEnum::NONE) | Some(HealthStatusEnum::EMPTY) => {
                                true
                            }
                            Some(HealthStatusEnum::HEALTHY) => true,
                            _ => false,
                        };
                        if running && healthy {
                            return true;
                        }
                    }
                }
                Err(e) => {
                    // a vanished container is a failed gate, not an error
                    error!("Health check of {}: {}", name, e);
                    return false;
                }
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_references_split_on_last_colon() {
        assert_eq!(
            split_image("lscr.io/linuxserver/radarr:5.2.0"),
            ("lscr.io/linuxserver/radarr".to_string(), "5.2.0".to_string())
        );
        assert_eq!(
            split_image("nginx"),
            ("nginx".to_string(), "latest".to_string())
        );
        // a port in the registry host is not a tag
        assert_eq!(
            split_image("registry.local:5000/acme/widget"),
            ("registry.local:5000/acme/widget".to_string(), "latest".to_string())
        );
    }

    #[test]
    fn carried_config_omits_empty_fields() {
        let inspected = ContainerInspectResponse {
            config: Some(bollard::secret::ContainerConfig {
                env: Some(vec![]),
                labels: Some(HashMap::new()),
                hostname: Some(String::new()),
                cmd: Some(vec!["serve".to_string()]),
                ..Default::default()
            }),
            host_config: Some(HostConfig {
                binds: Some(vec!["/data:/data".to_string()]),
                network_mode: Some("bridge".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = carry_over_config(&inspected, "acme/widget:2.0");
        assert_eq!(config.image.as_deref(), Some("acme/widget:2.0"));
        assert_eq!(config.env, None);
        assert_eq!(config.labels, None);
        assert_eq!(config.hostname, None);
        assert_eq!(config.cmd, Some(vec!["serve".to_string()]));
        let host = config.host_config.unwrap();
        assert_eq!(host.binds, Some(vec!["/data:/data".to_string()]));
        assert_eq!(host.network_mode.as_deref(), Some("bridge"));
    }

    #[test]
    fn container_id_aliases_are_detected() {
        assert!(CONTAINER_ID_ALIAS.is_match("0123456789ab"));
        assert!(!CONTAINER_ID_ALIAS.is_match("radarr"));
        assert!(!CONTAINER_ID_ALIAS.is_match("0123456789abcdef"));
    }
}
