use std::time::Duration;

use anyhow::{anyhow, Context, Error};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::domain::port::RegistryClient;

const DOCKERHUB_PAGE_SIZE: u32 = 50;
const GHCR_PER_PAGE: u32 = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Tag listing against the DockerHub and GitHub container registry
/// APIs. No retries beyond the GHCR org-to-user endpoint fallback; a
/// failed query is the caller's "no update found".
pub struct HttpRegistryClient {
    http: Client,
    github_token: String,
}

#[derive(Deserialize)]
struct DockerHubTags {
    #[serde(default)]
    results: Vec<DockerHubTag>,
}

#[derive(Deserialize)]
struct DockerHubTag {
    name: String,
}

#[derive(Deserialize)]
struct GhcrVersion {
    #[serde(default)]
    metadata: GhcrMetadata,
}

#[derive(Deserialize, Default)]
struct GhcrMetadata {
    #[serde(default)]
    container: GhcrContainer,
}

#[derive(Deserialize, Default)]
struct GhcrContainer {
    #[serde(default)]
    tags: Vec<String>,
}

impl HttpRegistryClient {
    pub fn new(github_token: String) -> Result<HttpRegistryClient, Error> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tugboat/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Can't build registry http client")?;
        Ok(HttpRegistryClient { http, github_token })
    }

    async fn ghcr_request(&self, url: &str) -> Result<reqwest::Response, Error> {
        let mut request = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if !self.github_token.is_empty() {
            request = request.bearer_auth(&self.github_token);
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn dockerhub_tags(&self, org: &str, repo: &str) -> Result<Vec<String>, Error> {
        let url = format!(
            "https://hub.docker.com/v2/repositories/{}/{}/tags?page_size={}",
            org, repo, DOCKERHUB_PAGE_SIZE
        );
        let response = self.http.get(&url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(anyhow!(
                "DockerHub {}/{} HTTP {}",
                org,
                repo,
                response.status()
            ));
        }
        let tags: DockerHubTags = response.json().await?;
        Ok(tags.results.into_iter().map(|t| t.name).collect())
    }

    async fn ghcr_tags(&self, org: &str, repo: &str) -> Result<Vec<String>, Error> {
        let org_url = format!(
            "https://api.github.com/orgs/{}/packages/container/{}/versions?per_page={}",
            org, repo, GHCR_PER_PAGE
        );
        let mut response = self.ghcr_request(&org_url).await?;
        // user-owned packages answer 401/404 on the org endpoint
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND
        ) {
            let user_url = format!(
                "https://api.github.com/users/{}/packages/container/{}/versions?per_page={}",
                org, repo, GHCR_PER_PAGE
            );
            response = self.ghcr_request(&user_url).await?;
        }
        if response.status() != StatusCode::OK {
            return Err(anyhow!("GHCR {}/{} HTTP {}", org, repo, response.status()));
        }
        let versions: Vec<GhcrVersion> = response.json().await?;
        Ok(versions
            .into_iter()
            .flat_map(|v| v.metadata.container.tags)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ghcr_payload_flattens_version_tags() {
        let payload = r#"[
            {"metadata": {"container": {"tags": ["2.1.0", "latest"]}}},
            {"metadata": {"container": {"tags": []}}},
            {"metadata": {"container": {"tags": ["2.0.0"]}}}
        ]"#;
        let versions: Vec<GhcrVersion> = serde_json::from_str(payload).unwrap();
        let tags: Vec<String> = versions
            .into_iter()
            .flat_map(|v| v.metadata.container.tags)
            .collect();
        assert_eq!(tags, ["2.1.0", "latest", "2.0.0"]);
    }

    #[test]
    fn dockerhub_payload_extracts_names() {
        let payload = r#"{"count": 2, "results": [{"name": "5.3.0"}, {"name": "5.2.0"}]}"#;
        let tags: DockerHubTags = serde_json::from_str(payload).unwrap();
        let names: Vec<String> = tags.results.into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["5.3.0", "5.2.0"]);
    }

    #[test]
    fn malformed_ghcr_version_defaults_to_no_tags() {
        let payload = r#"[{"id": 1}]"#;
        let versions: Vec<GhcrVersion> = serde_json::from_str(payload).unwrap();
        assert!(versions[0].metadata.container.tags.is_empty());
    }
}
