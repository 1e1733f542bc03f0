use std::sync::LazyLock;

use log::{error, warn};
use regex::Regex;

use super::port::RegistryClient;

/// Keywords marking a tag as a prerelease or development build.
const DEV_KEYWORDS: [&str; 11] = [
    "alpha",
    "beta",
    "rc",
    "nightly",
    "edge",
    "dev",
    "test",
    "snapshot",
    "experimental",
    "-b.",
    ".b.",
];

/// CPU architecture qualifiers that mark a tag as platform-specific.
const ARCH_KEYWORDS: [&str; 12] = [
    "arm64v8",
    "amd64",
    "armhf",
    "arm32v7",
    "i386",
    "ppc64le",
    "s390x",
    "linux-",
    "-arm64",
    "-armv7",
    "-armv6",
    "-aarch64",
];

static LS_BUILD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-ls\d+").unwrap());
static LT_BUILD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-lt\d+-").unwrap());
static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Decide whether a tag is a stable release candidate. With
/// `allow_prerelease` every tag passes. Matching is case-insensitive.
pub fn is_stable_tag(tag: &str, allow_prerelease: bool) -> bool {
    if allow_prerelease {
        return true;
    }
    let tag = tag.to_lowercase();
    if DEV_KEYWORDS.iter().any(|kw| tag.contains(kw)) {
        return false;
    }
    if ARCH_KEYWORDS.iter().any(|kw| tag.contains(kw)) {
        return false;
    }
    if LS_BUILD.is_match(&tag) || LT_BUILD.is_match(&tag) {
        return false;
    }
    true
}

/// Extract the ordering key of a tag: every maximal digit run, left to
/// right, after dropping a literal `version-` prefix and leading v/V.
/// A tag without digits keys as `[0]`.
///
/// Keys compare with native Vec ordering, so a shorter key that is a
/// prefix of a longer one sorts first (`[2] < [2, 0]`). That is the
/// long-observed behaviour and is kept as-is.
pub fn version_key(tag: &str) -> Vec<u64> {
    let cleaned = tag.replace("version-", "");
    let cleaned = cleaned.trim_start_matches(['v', 'V']);
    let numbers: Vec<u64> = DIGIT_RUN
        .find_iter(cleaned)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if numbers.is_empty() {
        vec![0]
    } else {
        numbers
    }
}

/// True iff `candidate` orders strictly greater than `current`.
pub fn is_newer(current: &str, candidate: &str) -> bool {
    version_key(candidate) > version_key(current)
}

/// Registry host dispatch for an image reference.
enum RegistryKind {
    Ghcr { org: String, repo: String },
    DockerHub { org: String, repo: String },
}

fn classify_image(image: &str) -> RegistryKind {
    let image = image.trim();
    if let Some(rest) = image.strip_prefix("ghcr.io/") {
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() >= 2 {
            return RegistryKind::Ghcr {
                org: parts[0].to_string(),
                repo: parts[1].to_string(),
            };
        }
    }
    if image.starts_with("lscr.io/linuxserver/") {
        return RegistryKind::DockerHub {
            org: "linuxserver".to_string(),
            repo: image.rsplit('/').next().unwrap_or(image).to_string(),
        };
    }
    let mut image = image;
    for prefix in ["docker.io/", "index.docker.io/"] {
        if let Some(rest) = image.strip_prefix(prefix) {
            image = rest;
            break;
        }
    }
    let parts: Vec<&str> = image.split('/').collect();
    match parts.len() {
        1 => RegistryKind::DockerHub {
            org: "library".to_string(),
            repo: parts[0].to_string(),
        },
        2 => RegistryKind::DockerHub {
            org: parts[0].to_string(),
            repo: parts[1].to_string(),
        },
        n => RegistryKind::DockerHub {
            org: parts[n - 2].to_string(),
            repo: parts[n - 1].to_string(),
        },
    }
}

/// Pick the greatest candidate newer than `current`. First-seen wins on
/// ties, which makes the choice arbitrary between equal keys.
fn newest_of<'a>(current: &str, tags: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut newest: Option<&str> = None;
    for tag in tags {
        if is_newer(current, tag) && newest.map_or(true, |n| is_newer(n, tag)) {
            newest = Some(tag);
        }
    }
    newest.map(String::from)
}

/// Ask the registry behind `image` for the newest stable tag strictly
/// greater than `current_tag`. Never fails: any registry error degrades
/// to `None` after logging.
pub async fn resolve_latest_tag(
    client: &(dyn RegistryClient + Send + Sync),
    image: &str,
    current_tag: &str,
    allow_prerelease: bool,
) -> Option<String> {
    match classify_image(image) {
        RegistryKind::Ghcr { org, repo } => {
            let tags = match client.ghcr_tags(&org, &repo).await {
                Ok(tags) => tags,
                Err(e) => {
                    error!("ghcr tag listing {}/{}: {:#}", org, repo, e);
                    return None;
                }
            };
            newest_of(
                current_tag,
                tags.iter()
                    .map(String::as_str)
                    // sha-prefixed tags are content digest placeholders
                    .filter(|t| !t.starts_with("sha"))
                    .filter(|t| is_stable_tag(t, allow_prerelease)),
            )
        }
        RegistryKind::DockerHub { org, repo } => {
            let tags = match client.dockerhub_tags(&org, &repo).await {
                Ok(tags) => tags,
                Err(e) => {
                    warn!("dockerhub tag listing {}/{}: {:#}", org, repo, e);
                    return None;
                }
            };
            newest_of(
                current_tag,
                tags.iter()
                    .map(String::as_str)
                    .filter(|t| is_stable_tag(t, allow_prerelease)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;

    #[test]
    fn stable_tags_pass() {
        assert!(is_stable_tag("1.2.3", false));
        assert!(is_stable_tag("2024.10", false));
        assert!(is_stable_tag("5.3.0", false));
    }

    #[test]
    fn prerelease_and_arch_tags_are_rejected() {
        assert!(!is_stable_tag("1.2.3-beta.1", false));
        assert!(!is_stable_tag("5.0-arm64v8", false));
        assert!(!is_stable_tag("9.1-ls42", false));
        assert!(!is_stable_tag("3.0-RC1", false));
        assert!(!is_stable_tag("1.0-lt7-suffix", false));
        assert!(!is_stable_tag("4.1.b.2", false));
    }

    #[test]
    fn allow_prerelease_passes_everything() {
        assert!(is_stable_tag("1.2.3-beta.1", true));
        assert!(is_stable_tag("5.0-arm64v8", true));
        assert!(is_stable_tag("9.1-ls42", true));
    }

    #[test]
    fn version_key_is_monotonic() {
        assert!(version_key("1.2.3") < version_key("1.2.4"));
        assert!(version_key("1.2.4") < version_key("1.3.0"));
    }

    #[test]
    fn version_key_strips_prefixes() {
        assert_eq!(version_key("v1.2.3"), version_key("1.2.3"));
        assert_eq!(version_key("version-10.4"), version_key("10.4"));
        assert_eq!(version_key("V2"), vec![2]);
    }

    #[test]
    fn version_key_without_digits_is_zero() {
        assert_eq!(version_key("latest"), vec![0]);
    }

    #[test]
    fn shorter_key_sorts_before_its_extension() {
        // Observed ordering quirk, kept on purpose.
        assert!(version_key("2") < version_key("2.0"));
    }

    #[test]
    fn is_newer_is_strict() {
        assert!(!is_newer("2.0", "2.0"));
        assert!(is_newer("5.2.0", "5.3.0"));
        assert!(!is_newer("5.3.0", "5.2.0"));
    }

    struct FakeRegistry {
        dockerhub: Result<Vec<String>, ()>,
        ghcr: Result<Vec<String>, ()>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRegistry {
        fn hub(tags: &[&str]) -> Self {
            FakeRegistry {
                dockerhub: Ok(tags.iter().map(|s| s.to_string()).collect()),
                ghcr: Ok(vec![]),
                calls: Mutex::new(vec![]),
            }
        }

        fn ghcr(tags: &[&str]) -> Self {
            FakeRegistry {
                dockerhub: Ok(vec![]),
                ghcr: Ok(tags.iter().map(|s| s.to_string()).collect()),
                calls: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn dockerhub_tags(&self, org: &str, repo: &str) -> anyhow::Result<Vec<String>> {
            self.calls.lock().unwrap().push(format!("hub:{}/{}", org, repo));
            self.dockerhub.clone().map_err(|_| anyhow!("unreachable"))
        }

        async fn ghcr_tags(&self, org: &str, repo: &str) -> anyhow::Result<Vec<String>> {
            self.calls.lock().unwrap().push(format!("ghcr:{}/{}", org, repo));
            self.ghcr.clone().map_err(|_| anyhow!("unreachable"))
        }
    }

    #[tokio::test]
    async fn resolves_newest_stable_dockerhub_tag() {
        let registry = FakeRegistry::hub(&["5.3.0", "5.4.0-beta.1", "5.2.0", "5.2.5"]);
        let latest =
            resolve_latest_tag(&registry, "lscr.io/linuxserver/radarr", "5.2.0", false).await;
        assert_eq!(latest.as_deref(), Some("5.3.0"));
        assert_eq!(
            registry.calls.lock().unwrap().as_slice(),
            ["hub:linuxserver/radarr"]
        );
    }

    #[tokio::test]
    async fn ghcr_skips_digest_placeholders() {
        let registry = FakeRegistry::ghcr(&["sha256-deadbeef", "2.1.0", "2.0.0"]);
        let latest = resolve_latest_tag(&registry, "ghcr.io/acme/widget", "2.0.0", false).await;
        assert_eq!(latest.as_deref(), Some("2.1.0"));
        assert_eq!(
            registry.calls.lock().unwrap().as_slice(),
            ["ghcr:acme/widget"]
        );
    }

    #[tokio::test]
    async fn unprefixed_image_uses_library_org() {
        let registry = FakeRegistry::hub(&["1.26"]);
        let latest = resolve_latest_tag(&registry, "nginx", "1.25", false).await;
        assert_eq!(latest.as_deref(), Some("1.26"));
        assert_eq!(registry.calls.lock().unwrap().as_slice(), ["hub:library/nginx"]);
    }

    #[tokio::test]
    async fn long_paths_take_last_two_segments() {
        let registry = FakeRegistry::hub(&[]);
        resolve_latest_tag(&registry, "registry.example.com/team/app", "1.0", false).await;
        assert_eq!(registry.calls.lock().unwrap().as_slice(), ["hub:team/app"]);
    }

    #[tokio::test]
    async fn registry_failure_degrades_to_none() {
        let registry = FakeRegistry {
            dockerhub: Err(()),
            ghcr: Err(()),
            calls: Mutex::new(vec![]),
        };
        assert_eq!(resolve_latest_tag(&registry, "nginx", "1.25", false).await, None);
    }

    #[tokio::test]
    async fn already_current_yields_none() {
        let registry = FakeRegistry::hub(&["5.2.0", "5.1.0"]);
        let latest =
            resolve_latest_tag(&registry, "linuxserver/radarr", "5.2.0", false).await;
        assert_eq!(latest, None);
    }
}
