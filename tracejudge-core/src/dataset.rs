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

use serde::{Deserialize, Serialize};

/// One row of a dataset used as a job source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetItem {
    pub id: String,
    pub dataset_id: String,
    /// Trace the item was captured from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: serde_json::Value,
}

impl DatasetItem {
    /// Id under which scores for this item are recorded
    pub fn effective_trace_id(&self) -> &str {
        self.trace_id.as_deref().unwrap_or(&self.id)
    }

    /// JSON text of the input
    pub fn input_text(&self) -> String {
        self.input.to_string()
    }

    /// JSON text of the output, `{}` when absent
    pub fn output_text(&self) -> String {
        if self.output.is_null() {
            "{}".to_string()
        } else {
            self.output.to_string()
        }
    }
}
