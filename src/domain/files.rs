use std::collections::HashMap;
use std::fs;

use anyhow::{anyhow, Context, Error};
use log::error;

/// Parse a key/value env file. Unreadable files degrade to an empty map
/// so discovery keeps working without one.
pub fn read_env(path: &str) -> HashMap<String, String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!("read_env {}: {}", path, e);
            return HashMap::new();
        }
    };
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Rewrite the `var=` line in place, preserving every other line
/// byte-for-byte, including its terminator and the trailing-newline
/// layout. Fails without touching the file when the variable line is
/// missing.
pub fn write_env_var(path: &str, var: &str, value: &str) -> Result<(), Error> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let prefix = format!("{}=", var);
    let mut found = false;
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        let terminator = if line.ends_with("\r\n") {
            "\r\n"
        } else if line.ends_with('\n') {
            "\n"
        } else {
            ""
        };
        let body = &line[..line.len() - terminator.len()];
        if !found && body.starts_with(&prefix) {
            out.push_str(&prefix);
            out.push_str(value);
            out.push_str(terminator);
            found = true;
        } else {
            out.push_str(line);
        }
    }
    if !found {
        return Err(anyhow!("{} not found in {}", var, path));
    }
    fs::write(path, out).with_context(|| format!("Failed to write {}", path))
}

fn read_compose(path: &str) -> Result<serde_yaml::Value, Error> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path))
}

fn split_image(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        // a colon inside the last path segment is a tag, anywhere else
        // it belongs to a registry host:port
        Some((base, tag)) if !tag.contains('/') => (base, tag),
        _ => (image, "latest"),
    }
}

/// Tag of one service's image inside a compose file, if present.
pub fn compose_image_tag(path: &str, service: &str) -> Option<String> {
    let data = match read_compose(path) {
        Ok(data) => data,
        Err(e) => {
            error!("compose_image_tag {}: {:#}", path, e);
            return None;
        }
    };
    let image = data.get("services")?.get(service)?.get("image")?.as_str()?;
    match image.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') => Some(tag.to_string()),
        _ => None,
    }
}

/// Rewrite the service's image tag, keeping the image base name.
/// Returns the tag that was replaced.
pub fn set_compose_image_tag(path: &str, service: &str, new_tag: &str) -> Result<String, Error> {
    let mut data = read_compose(path)?;
    let image_value = data
        .get_mut("services")
        .and_then(|s| s.get_mut(service))
        .and_then(|s| s.get_mut("image"))
        .ok_or_else(|| anyhow!("Service {} has no image in {}", service, path))?;
    let image = image_value
        .as_str()
        .ok_or_else(|| anyhow!("Image of service {} is not a string", service))?;
    let (base, old_tag) = split_image(image);
    let old_tag = old_tag.to_string();
    *image_value = serde_yaml::Value::String(format!("{}:{}", base, new_tag));
    let rendered = serde_yaml::to_string(&data)
        .with_context(|| format!("Failed to serialize {}", path))?;
    fs::write(path, rendered).with_context(|| format!("Failed to write {}", path))?;
    Ok(old_tag)
}
