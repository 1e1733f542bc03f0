use std::collections::HashMap;

use anyhow::{Context, Error};

use super::files;
use super::model::StrategyConfig;
use super::port::ContainerRuntime;

/// Label namespace recognized on monitored containers.
pub const LABEL_PREFIX: &str = "tugboat.";

/// Strip the label namespace, keeping only our own keys
/// (`enable`, `compose_file`, `compose_service`, `env_var`, `changelog`).
pub fn own_labels(labels: &HashMap<String, String>) -> HashMap<String, String> {
    labels
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(LABEL_PREFIX)
                .map(|key| (key.to_string(), v.clone()))
        })
        .collect()
}

/// Pick the update mechanism for one container. The precedence is a
/// fixed total order: compose file label, then env variable (label or
/// legacy mapping), then plain Docker API recreate.
pub fn resolve_strategy(
    container: &str,
    labels: &HashMap<String, String>,
    version_map: &HashMap<String, String>,
) -> StrategyConfig {
    if let Some(file_path) = labels.get("compose_file") {
        let service_name = labels
            .get("compose_service")
            .cloned()
            .unwrap_or_else(|| container.to_string());
        return StrategyConfig::Compose {
            file_path: file_path.clone(),
            service_name,
        };
    }
    // an empty label value counts as absent
    if let Some(variable) = labels
        .get("env_var")
        .filter(|v| !v.is_empty())
        .or_else(|| version_map.get(container).filter(|v| !v.is_empty()))
    {
        return StrategyConfig::EnvFile {
            variable: variable.clone(),
        };
    }
    StrategyConfig::DockerApi
}

impl StrategyConfig {
    /// The strategy's own notion of the currently deployed tag. `None`
    /// for `DockerApi`, whose truth is the runtime image inspection.
    pub fn read_current(&self, env_file: &str) -> Option<String> {
        match self {
            StrategyConfig::DockerApi => None,
            StrategyConfig::EnvFile { variable } => files::read_env(env_file).remove(variable),
            StrategyConfig::Compose {
                file_path,
                service_name,
            } => files::compose_image_tag(file_path, service_name),
        }
    }

    /// Deploy `new_tag` and return the tag it displaced, as the
    /// mechanism itself observed it. A failed pull after the env file
    /// edit restores the previous value inline; any other failure
    /// aborts as-is and is reported to the caller without a rollback
    /// attempt.
    pub async fn apply(
        &self,
        runtime: &(dyn ContainerRuntime + Send + Sync),
        env_file: &str,
        container: &str,
        image: &str,
        new_tag: &str,
        previous_tag: &str,
    ) -> Result<String, Error> {
        match self {
            StrategyConfig::EnvFile { variable } => {
                files::write_env_var(env_file, variable, new_tag)?;
                if let Err(e) = runtime.pull(image, new_tag).await {
                    let _ = files::write_env_var(env_file, variable, previous_tag);
                    return Err(e.context(format!("Pull of {}:{} failed", image, new_tag)));
                }
                runtime
                    .restart(container)
                    .await
                    .with_context(|| format!("Restart of {} failed", container))?;
                Ok(previous_tag.to_string())
            }
            StrategyConfig::Compose {
                file_path,
                service_name,
            } => {
                let old_tag = files::set_compose_image_tag(file_path, service_name, new_tag)?;
                if let Err(e) = runtime.compose_up(file_path, service_name).await {
                    let _ = files::set_compose_image_tag(file_path, service_name, &old_tag);
                    return Err(e.context("docker compose up failed"));
                }
                Ok(old_tag)
            }
            StrategyConfig::DockerApi => {
                runtime
                    .recreate(container, &format!("{}:{}", image, new_tag))
                    .await?;
                Ok(previous_tag.to_string())
            }
        }
    }

    /// Re-deploy `previous_tag` after a failed health gate. Best effort;
    /// the caller logs a failure here but keeps the original error.
    pub async fn revert(
        &self,
        runtime: &(dyn ContainerRuntime + Send + Sync),
        env_file: &str,
        container: &str,
        image: &str,
        previous_tag: &str,
    ) -> Result<(), Error> {
        match self {
            StrategyConfig::EnvFile { variable } => {
                files::write_env_var(env_file, variable, previous_tag)?;
                runtime.restart(container).await
            }
            StrategyConfig::Compose {
                file_path,
                service_name,
            } => {
                files::set_compose_image_tag(file_path, service_name, previous_tag)?;
                runtime.compose_up(file_path, service_name).await
            }
            StrategyConfig::DockerApi => {
                runtime
                    .recreate(container, &format!("{}:{}", image, previous_tag))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::super::model::RuntimeContainer;
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn compose_label_wins_over_env_var() {
        let strategy = resolve_strategy(
            "radarr",
            &labels(&[
                ("compose_file", "/compose/docker-compose.yml"),
                ("env_var", "RADARR_VER"),
            ]),
            &HashMap::new(),
        );
        assert_eq!(
            strategy,
            StrategyConfig::Compose {
                file_path: "/compose/docker-compose.yml".into(),
                service_name: "radarr".into(),
            }
        );
    }

    #[test]
    fn compose_service_label_overrides_container_name() {
        let strategy = resolve_strategy(
            "radarr-1",
            &labels(&[
                ("compose_file", "/compose/docker-compose.yml"),
                ("compose_service", "radarr"),
            ]),
            &HashMap::new(),
        );
        match strategy {
            StrategyConfig::Compose { service_name, .. } => assert_eq!(service_name, "radarr"),
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn legacy_mapping_resolves_env_file() {
        let mut version_map = HashMap::new();
        version_map.insert("radarr".to_string(), "RADARR_VER".to_string());
        let strategy = resolve_strategy("radarr", &HashMap::new(), &version_map);
        assert_eq!(
            strategy,
            StrategyConfig::EnvFile {
                variable: "RADARR_VER".into()
            }
        );
    }

    #[test]
    fn env_var_label_beats_legacy_mapping() {
        let mut version_map = HashMap::new();
        version_map.insert("radarr".to_string(), "OLD_VAR".to_string());
        let strategy = resolve_strategy(
            "radarr",
            &labels(&[("env_var", "RADARR_VER")]),
            &version_map,
        );
        assert_eq!(
            strategy,
            StrategyConfig::EnvFile {
                variable: "RADARR_VER".into()
            }
        );
    }

    #[test]
    fn bare_container_defaults_to_docker_api() {
        let strategy = resolve_strategy("radarr", &HashMap::new(), &HashMap::new());
        assert_eq!(strategy, StrategyConfig::DockerApi);
    }

    #[test]
    fn empty_env_var_label_counts_as_absent() {
        let mut version_map = HashMap::new();
        version_map.insert("radarr".to_string(), "RADARR_VER".to_string());
        let strategy =
            resolve_strategy("radarr", &labels(&[("env_var", "")]), &version_map);
        assert_eq!(
            strategy,
            StrategyConfig::EnvFile {
                variable: "RADARR_VER".into()
            }
        );

        let strategy =
            resolve_strategy("radarr", &labels(&[("env_var", "")]), &HashMap::new());
        assert_eq!(strategy, StrategyConfig::DockerApi);
    }

    fn scratch(name: &str, content: &str) -> String {
        let path = std::env::temp_dir()
            .join(format!("tugboat-strategy-{}-{}", std::process::id(), name));
        fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[derive(Default)]
    struct ScriptedRuntime {
        fail_pull: bool,
        fail_compose: bool,
        restarts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerRuntime for ScriptedRuntime {
        async fn list_running(&self) -> anyhow::Result<Vec<RuntimeContainer>> {
            Ok(vec![])
        }
        async fn inspect(&self, name: &str) -> anyhow::Result<RuntimeContainer> {
            Err(anyhow!("no such container: {}", name))
        }
        async fn pull(&self, image: &str, tag: &str) -> anyhow::Result<()> {
            if self.fail_pull {
                return Err(anyhow!("manifest unknown for {}:{}", image, tag));
            }
            Ok(())
        }
        async fn restart(&self, name: &str) -> anyhow::Result<()> {
            self.restarts.lock().unwrap().push(name.to_string());
            Ok(())
        }
        async fn recreate(&self, _name: &str, _image: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn compose_up(&self, _file_path: &str, _service: &str) -> anyhow::Result<()> {
            if self.fail_compose {
                return Err(anyhow!("compose exited with status 1"));
            }
            Ok(())
        }
        async fn await_healthy(&self, _name: &str, _timeout: Duration) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn env_apply_pull_failure_restores_variable() {
        let env_file = scratch("env-pull-fail", "RADARR_VER=5.2.0\nOTHER=1\n");
        let runtime = ScriptedRuntime {
            fail_pull: true,
            ..ScriptedRuntime::default()
        };
        let strategy = StrategyConfig::EnvFile {
            variable: "RADARR_VER".into(),
        };

        let result = strategy
            .apply(&runtime, &env_file, "radarr", "linuxserver/radarr", "5.3.0", "5.2.0")
            .await;

        assert!(result.is_err());
        let env = files::read_env(&env_file);
        assert_eq!(env.get("RADARR_VER").map(String::as_str), Some("5.2.0"));
        // the restart never runs when the pull fails
        assert!(runtime.restarts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn env_apply_writes_variable_and_restarts() {
        let env_file = scratch("env-apply-ok", "RADARR_VER=5.2.0\n");
        let runtime = ScriptedRuntime::default();
        let strategy = StrategyConfig::EnvFile {
            variable: "RADARR_VER".into(),
        };

        let displaced = strategy
            .apply(&runtime, &env_file, "radarr", "linuxserver/radarr", "5.3.0", "5.2.0")
            .await
            .unwrap();

        assert_eq!(displaced, "5.2.0");
        let env = files::read_env(&env_file);
        assert_eq!(env.get("RADARR_VER").map(String::as_str), Some("5.3.0"));
        assert_eq!(runtime.restarts.lock().unwrap().as_slice(), ["radarr"]);
    }

    #[tokio::test]
    async fn compose_apply_failure_restores_tag() {
        let compose = scratch(
            "compose-up-fail",
            "services:\n  radarr:\n    image: lscr.io/linuxserver/radarr:5.2.0\n",
        );
        let runtime = ScriptedRuntime {
            fail_compose: true,
            ..ScriptedRuntime::default()
        };
        let strategy = StrategyConfig::Compose {
            file_path: compose.clone(),
            service_name: "radarr".into(),
        };

        let result = strategy
            .apply(&runtime, "/env/.env", "radarr", "lscr.io/linuxserver/radarr", "5.3.0", "5.2.0")
            .await;

        assert!(result.is_err());
        assert_eq!(
            files::compose_image_tag(&compose, "radarr").as_deref(),
            Some("5.2.0")
        );
    }

    #[tokio::test]
    async fn compose_apply_reports_displaced_tag_of_untagged_image() {
        let compose = scratch("compose-untagged", "services:\n  nginx:\n    image: nginx\n");
        let runtime = ScriptedRuntime::default();
        let strategy = StrategyConfig::Compose {
            file_path: compose.clone(),
            service_name: "nginx".into(),
        };

        let displaced = strategy
            .apply(&runtime, "/env/.env", "nginx", "nginx", "1.26", "unknown")
            .await
            .unwrap();

        // the revert target comes from the file, not the inspection
        assert_eq!(displaced, "latest");
        assert_eq!(
            files::compose_image_tag(&compose, "nginx").as_deref(),
            Some("1.26")
        );
    }

    #[test]
    fn own_labels_strips_namespace() {
        let raw = labels(&[
            ("tugboat.enable", "true"),
            ("tugboat.env_var", "RADARR_VER"),
            ("traefik.enable", "true"),
        ]);
        let own = own_labels(&raw);
        assert_eq!(own.get("enable").map(String::as_str), Some("true"));
        assert_eq!(own.get("env_var").map(String::as_str), Some("RADARR_VER"));
        assert!(!own.contains_key("traefik.enable"));
        assert_eq!(own.len(), 2);
    }
}
