//! Instance template processing.
//!
//! A template is fetched from stdin (`-`), an `http(s)://` URL or a local
//! path, rendered by substituting `{{ name }}` placeholders, then decoded as
//! YAML (or JSON) into an [`InstanceSpec`].

use std::collections::BTreeMap;
use tokio::io::AsyncReadExt;

use testkit_common::{TestkitError, TestkitResult};

use super::InstanceSpec;

/// Parse a `key=value` template parameter
pub fn parse_var(raw: &str) -> TestkitResult<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(TestkitError::InputValidationError(format!(
            "template parameter '{raw}' must look like key=value"
        ))),
    }
}

/// Fetch raw template text
pub async fn read_source(url: &str) -> TestkitResult<String> {
    if url == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .map_err(|e| TestkitError::TemplateDecodeError(format!("failed to read stdin: {e}")))?;
        return Ok(text);
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        let response = reqwest::get(url)
            .await
            .map_err(|e| TestkitError::TemplateDecodeError(format!("failed to fetch {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TestkitError::TemplateDecodeError(format!(
                "failed to fetch {url}: HTTP {status}"
            )));
        }
        return response
            .text()
            .await
            .map_err(|e| TestkitError::TemplateDecodeError(format!("failed to read {url}: {e}")));
    }

    let path = url.strip_prefix("file://").unwrap_or(url);
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TestkitError::TemplateDecodeError(format!("failed to read {path}: {e}")))
}

/// Substitute `{{ name }}` placeholders from `vars`, then the environment
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> TestkitResult<String> {
    render_with(template, |name| {
        vars.get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    })
}

fn render_with<F>(template: &str, lookup: F) -> TestkitResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            TestkitError::TemplateDecodeError("unterminated '{{' in template".to_string())
        })?;

        let name = after[..end].trim();
        if name.is_empty() {
            return Err(TestkitError::TemplateDecodeError(
                "empty placeholder in template".to_string(),
            ));
        }
        let value = lookup(name).ok_or_else(|| {
            TestkitError::TemplateDecodeError(format!("unresolved template parameter '{name}'"))
        })?;

        out.push_str(&value);
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Decode a rendered document into an instance spec
pub fn decode_spec(document: &str) -> TestkitResult<InstanceSpec> {
    serde_yaml::from_str(document)
        .map_err(|e| TestkitError::TemplateDecodeError(format!("invalid instance spec: {e}")))
}

/// Read, render and decode in one step
pub async fn load_spec(url: &str, vars: &BTreeMap<String, String>) -> TestkitResult<InstanceSpec> {
    let raw = read_source(url).await?;
    let rendered = render(&raw, vars)?;
    decode_spec(&rendered)
}
