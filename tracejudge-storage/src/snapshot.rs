// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! JSON snapshot of the whole store.
//!
//! Written with the temp-file-then-rename pattern so a crash mid-write never
//! leaves a truncated snapshot behind. The previous snapshot is kept as
//! `.json.bak`.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracejudge_core::{DatasetItem, EvalJob, EvaluatorTemplate, LlmConfig, Result, Score, Trace};
use tracing::{info, warn};

/// Serialized form of every collection held by the store
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub traces: Vec<Trace>,
    #[serde(default)]
    pub scores: Vec<Score>,
    #[serde(default)]
    pub jobs: Vec<EvalJob>,
    #[serde(default)]
    pub evaluators: Vec<EvaluatorTemplate>,
    #[serde(default)]
    pub llm_configs: Vec<LlmConfig>,
    #[serde(default)]
    pub dataset_items: Vec<DatasetItem>,
}

impl Snapshot {
    /// Read a snapshot; a missing file yields an empty snapshot
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No snapshot at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let reader = BufReader::new(File::open(path)?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        info!(
            traces = snapshot.traces.len(),
            scores = snapshot.scores.len(),
            jobs = snapshot.jobs.len(),
            "Loaded snapshot from {}",
            path.display()
        );
        Ok(snapshot)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if path.exists() {
            let backup_path = path.with_extension("json.bak");
            if let Err(e) = fs::copy(path, &backup_path) {
                warn!("Failed to back up snapshot: {}", e);
            }
        }

        let temp_path = path.with_extension("json.tmp");
        {
            let writer = BufWriter::new(File::create(&temp_path)?);
            serde_json::to_writer(writer, self)?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}
