//! Connection info export.
//!
//! Best-effort: every machine gets an entry, machines without an address get
//! a placeholder, and nothing here can fail the batch.

use clap::ValueEnum;
use serde::Serialize;

use testkit_common::ConnectionDescriptor;

use crate::bootstrap::BootstrapResult;
use crate::machine::Machine;

/// Output rendering for `create`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Shell `export` lines, one block per machine
    #[default]
    Env,
    /// Pretty JSON document
    Json,
}

/// Project machines onto their connection descriptors
pub fn render(machines: &[Machine]) -> Vec<ConnectionDescriptor> {
    machines
        .iter()
        .map(|m| {
            m.descriptor()
                .cloned()
                .unwrap_or_else(|| ConnectionDescriptor::placeholder(m.name()))
        })
        .collect()
}

/// Shell-sourceable blocks separated by a blank line
pub fn format_env(descriptors: &[ConnectionDescriptor]) -> String {
    let mut out = String::new();
    for descriptor in descriptors {
        if descriptor.is_placeholder() {
            out.push_str(&format!("# {}: no connection info\n", descriptor.name));
        } else {
            out.push_str(&format!("# {}\n", descriptor.name));
            for (key, value) in descriptor.env_vars() {
                out.push_str(&format!("export {key}={value}\n"));
            }
        }
        out.push('\n');
    }
    out
}

#[derive(Serialize)]
struct JsonExport<'a> {
    machines: &'a [ConnectionDescriptor],
    #[serde(skip_serializing_if = "Option::is_none")]
    bootstrap: Option<&'a BootstrapResult>,
}

/// Descriptors (and the bootstrap report, if any) as pretty JSON
pub fn format_json(
    descriptors: &[ConnectionDescriptor],
    bootstrap: Option<&BootstrapResult>,
) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonExport {
        machines: descriptors,
        bootstrap,
    })
}
