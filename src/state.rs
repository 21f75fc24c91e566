//! State file
//!
//! `stratum up` records the outputs of every materialized resource so that
//! `stratum destroy` can tear the stack down later without re-running
//! anything. The file holds secret outputs and is written owner-only.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::graph::{ResourceGraph, ResourceKind};
use crate::materializer::Materialization;
use crate::output::OutputAttributes;
use crate::{Error, Result};

const STATE_VERSION: u32 = 1;

/// Outputs recorded for one resource
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Resource kind
    pub kind: ResourceKind,
    /// Resource name
    pub name: String,
    /// Outputs at the end of the run
    pub outputs: OutputAttributes,
}

/// Recorded outputs of a stack
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFile {
    /// Format version
    pub version: u32,
    /// Cloud project the stack lives in
    pub project: String,
    /// Materialized resources, in declaration order
    pub resources: Vec<StateEntry>,
}

impl StateFile {
    /// Record the outputs of `result`
    pub fn capture(project: &str, graph: &ResourceGraph, result: &Materialization) -> Self {
        let resources = result
            .outputs()
            .iter()
            .filter_map(|(handle, outputs)| {
                let resource = graph.resource(*handle).ok()?;
                Some(StateEntry {
                    kind: resource.id.kind,
                    name: resource.id.name.clone(),
                    outputs: outputs.as_ref().clone(),
                })
            })
            .collect();
        Self {
            version: STATE_VERSION,
            project: project.to_string(),
            resources,
        }
    }

    /// Map recorded outputs back onto a freshly declared graph.
    ///
    /// Entries with no matching resource are skipped with a warning.
    pub fn restore(&self, graph: &ResourceGraph) -> Materialization {
        let mut outputs = BTreeMap::new();
        for entry in &self.resources {
            match graph.find(entry.kind, &entry.name) {
                Some(handle) => {
                    outputs.insert(handle, Arc::new(entry.outputs.clone()));
                }
                None => warn!(
                    kind = %entry.kind,
                    name = %entry.name,
                    "recorded resource is no longer declared; skipping"
                ),
            }
        }
        Materialization::from_outputs(outputs)
    }

    /// Read a state file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read state {}: {e}", path.display())))?;
        let state: Self = serde_json::from_str(&data)?;
        if state.version != STATE_VERSION {
            return Err(Error::config(format!(
                "state {} has version {}, expected {STATE_VERSION}",
                path.display(),
                state.version
            )));
        }
        Ok(state)
    }

    /// Write the state file, replacing any previous one
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        write_private(&tmp, data.as_bytes())?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data)?;
    Ok(())
}
