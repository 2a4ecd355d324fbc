//! Placeholder substitution: `<output_of_task_N>` becomes the result of node `N`.
//!
//! Only top-level string values are scanned. Nested objects and arrays pass
//! through untouched even when they contain marker-looking strings.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use taskmesh_core::{ResultsMap, TaskParameters};

static OUTPUT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<output_of_task_(\d+)>").expect("Invalid output marker regex")
});

/// The marker text referring to node `index`.
pub fn output_marker(index: usize) -> String {
    format!("<output_of_task_{index}>")
}

/// Node indices referenced by markers in `text`, in order of appearance.
///
/// Indices too large for `usize` saturate, so they always fail validation.
pub fn references_in(text: &str) -> Vec<usize> {
    OUTPUT_MARKER
        .captures_iter(text)
        .map(|cap| cap[1].parse::<usize>().unwrap_or(usize::MAX))
        .collect()
}

/// Node indices referenced by any top-level string parameter.
pub fn parameter_references(params: &TaskParameters) -> Vec<usize> {
    params
        .values()
        .filter_map(|v| v.as_str())
        .flat_map(references_in)
        .collect()
}

/// Replace every marker in every top-level string parameter with the
/// rendered result it refers to. Markers without a recorded result are kept.
pub fn substitute(params: &TaskParameters, results: &ResultsMap) -> TaskParameters {
    params
        .iter()
        .map(|(key, value)| {
            let value = match value.as_str() {
                Some(text) => serde_json::Value::String(substitute_text(text, results)),
                None => value.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

fn substitute_text(text: &str, results: &ResultsMap) -> String {
    if !text.contains("<output_of_task_") {
        return text.to_string();
    }
    OUTPUT_MARKER
        .replace_all(text, |cap: &Captures<'_>| {
            cap[1]
                .parse::<usize>()
                .ok()
                .and_then(|index| results.get(index))
                .map(|result| result.render())
                .unwrap_or_else(|| cap[0].to_string())
        })
        .into_owned()
}
