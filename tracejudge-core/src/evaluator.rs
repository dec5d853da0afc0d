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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an evaluator's judgement is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreType {
    #[default]
    Numeric,
    Categorical,
    Boolean,
}

/// A reusable scoring rubric prompt bound to a score type and range.
///
/// The evaluation engine only ever reads templates. Presets carry no project
/// and are visible to every project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Rubric text with `{{input}}` / `{{output}}` style placeholders
    pub prompt_template: String,
    #[serde(default)]
    pub score_type: ScoreType,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
    #[serde(default)]
    pub preset: bool,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_max_score() -> f64 {
    10.0
}

fn default_active() -> bool {
    true
}

impl EvaluatorTemplate {
    /// Whether a project may use this evaluator
    pub fn visible_to(&self, project_id: &str) -> bool {
        match &self.project_id {
            None => true,
            Some(owner) => owner == project_id,
        }
    }
}
