//! Reasoning-oracle seams and the text formats exchanged with them.

use async_trait::async_trait;
use taskmesh_core::{
    CapabilityAdvertisement, ResultsMap, SubtaskSpec, TaskmeshError, TaskmeshResult,
};

/// Turns a natural-language query into a JSON array of subtasks.
#[async_trait]
pub trait DecompositionOracle: Send + Sync {
    async fn decompose(&self, query: &str, capabilities_text: &str) -> TaskmeshResult<String>;
}

/// Turns the query plus every node's result into the final answer.
#[async_trait]
pub trait IntegrationOracle: Send + Sync {
    async fn integrate(&self, query: &str, results_text: &str) -> TaskmeshResult<String>;
}

/// Parse decomposition output into an ordered subtask list.
///
/// Tolerates markdown code fences and prose around the array. Every `[`
/// paired with a later `]` is tried, earliest start and widest span first,
/// so bracketed prose ahead of the plan does not hide it.
pub fn parse_subtasks(raw: &str) -> TaskmeshResult<Vec<SubtaskSpec>> {
    let text = strip_code_fences(raw.trim());
    let starts: Vec<usize> = text.match_indices('[').map(|(i, _)| i).collect();
    let ends: Vec<usize> = text.match_indices(']').map(|(i, _)| i).collect();

    let mut first_error = None;
    for &start in &starts {
        for &end in ends.iter().rev().filter(|e| **e > start) {
            match serde_json::from_str::<Vec<SubtaskSpec>>(&text[start..=end]) {
                Ok(subtasks) => return Ok(subtasks),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
    }

    Err(match first_error {
        Some(e) => TaskmeshError::Decomposition(format!("malformed subtask list: {e}")),
        None => TaskmeshError::Decomposition(
            "output does not contain a JSON array of subtasks".into(),
        ),
    })
}

fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. "json") on the opening fence line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// The capability catalog as handed to the decomposition oracle.
pub fn render_catalog(capabilities: &[CapabilityAdvertisement]) -> TaskmeshResult<String> {
    Ok(serde_json::to_string_pretty(capabilities)?)
}

/// The results map as handed to the integration oracle, keyed by node index.
pub fn render_results(results: &ResultsMap) -> TaskmeshResult<String> {
    Ok(serde_json::to_string_pretty(results)?)
}
