//! The planner's `{server, tool, arguments}` decision and a forgiving parser for it.
//!
//! Language models wrap JSON in markdown fences, prepend prose, leave trailing
//! commas and elide lines with `...`. [`Plan::parse_lenient`] cleans up the
//! common cases before giving up with a [`PlanParseError`] that keeps every
//! intermediate text for debugging.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

static OBJECT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("object block pattern is valid"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma pattern is valid"));

/// A routing decision: which tool on which server, with what arguments.
///
/// `server` and `tool` are `None` when the planner found nothing to call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Target server name.
    #[serde(default)]
    pub server: Option<String>,
    /// Target tool name.
    #[serde(default)]
    pub tool: Option<String>,
    /// Tool arguments, passed through unvalidated.
    #[serde(default, deserialize_with = "arguments_or_empty")]
    pub arguments: Map<String, Value>,
    /// The planner's reasoning, or its clarification question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

fn arguments_or_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    })
}

/// The plan text could not be turned into JSON.
#[derive(Debug, Clone, Error)]
#[error("no JSON plan found in planner output: {last_error}")]
pub struct PlanParseError {
    /// Text as received.
    pub raw: String,
    /// Text after removing fences, zero-width spaces and `...` lines.
    pub cleaned: String,
    /// The extracted `{...}` block, if one was found.
    pub candidate: Option<String>,
    /// The last parser message.
    pub last_error: String,
}

impl Plan {
    /// A plan targeting `tool` on `server`.
    pub fn new(server: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            server: Some(server.into()),
            tool: Some(tool.into()),
            ..Default::default()
        }
    }

    /// Set the arguments.
    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Set the justification.
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    /// Server and tool, when both are present and non-blank.
    pub fn target(&self) -> Option<(&str, &str)> {
        let server = self.server.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let tool = self.tool.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        Some((server, tool))
    }

    /// Whether the plan names something to call.
    pub fn is_actionable(&self) -> bool {
        self.target().is_some()
    }

    /// Parse planner output, tolerating the usual formatting accidents.
    pub fn parse_lenient(raw: &str) -> Result<Self, PlanParseError> {
        let cleaned = clean(raw);

        let direct = match serde_json::from_str::<Plan>(&cleaned) {
            Ok(plan) => return Ok(plan),
            Err(e) => e.to_string(),
        };

        let Some(block) = OBJECT_BLOCK.find(&cleaned) else {
            return Err(PlanParseError {
                raw: raw.to_string(),
                cleaned,
                candidate: None,
                last_error: direct,
            });
        };

        let candidate = TRAILING_COMMA.replace_all(block.as_str(), "$1").into_owned();
        match serde_json::from_str::<Plan>(&candidate) {
            Ok(plan) => Ok(plan),
            Err(e) => Err(PlanParseError {
                raw: raw.to_string(),
                cleaned,
                candidate: Some(candidate),
                last_error: e.to_string(),
            }),
        }
    }
}

fn clean(raw: &str) -> String {
    let stripped = raw
        .trim()
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .replace('\u{200b}', "");
    stripped
        .lines()
        .filter(|line| line.trim() != "...")
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json() {
        let plan = Plan::parse_lenient(
            r#"{"server": "fs", "tool": "read_file", "arguments": {"path": "a.txt"}, "justification": "read it"}"#,
        )
        .unwrap();
        assert_eq!(plan.target(), Some(("fs", "read_file")));
        assert_eq!(plan.arguments["path"], "a.txt");
        assert_eq!(plan.justification.as_deref(), Some("read it"));
    }

    #[test]
    fn test_fenced_with_prose_and_trailing_commas() {
        let raw = "Sure! Here is the plan:\n```json\n{\n  \"server\": \"git\",\n  \"tool\": \"git_status\",\n  \"arguments\": {\"repo_path\": \".\",},\n}\n```\nLet me know.";
        let plan = Plan::parse_lenient(raw).unwrap();
        assert_eq!(plan.target(), Some(("git", "git_status")));
        assert_eq!(plan.arguments["repo_path"], ".");
    }

    #[test]
    fn test_zero_width_space_and_ellipsis_lines() {
        let raw = "\u{200b}{\"server\": \"local\",\n...\n\"tool\": \"ping\", \"arguments\": {}}";
        let plan = Plan::parse_lenient(raw).unwrap();
        assert_eq!(plan.target(), Some(("local", "ping")));
    }

    #[test]
    fn test_clarification_plan() {
        let plan = Plan::parse_lenient(
            r#"{"server": null, "tool": null, "arguments": {}, "justification": "which file?"}"#,
        )
        .unwrap();
        assert!(!plan.is_actionable());
        assert_eq!(plan.justification.as_deref(), Some("which file?"));
    }

    #[test]
    fn test_blank_names_are_not_actionable() {
        let plan = Plan {
            server: Some("  ".to_string()),
            tool: Some("x".to_string()),
            ..Default::default()
        };
        assert!(!plan.is_actionable());
        assert!(Plan::new("fs", "read").is_actionable());
    }

    #[test]
    fn test_target_trims_padding() {
        let plan = Plan::parse_lenient(r#"{"server": "fs ", "tool": " read_file"}"#).unwrap();
        assert_eq!(plan.target(), Some(("fs", "read_file")));
        assert!(plan.arguments.is_empty());
    }

    #[test]
    fn test_non_object_arguments_become_empty() {
        let plan =
            Plan::parse_lenient(r#"{"server": "fs", "tool": "ls", "arguments": null}"#).unwrap();
        assert!(plan.arguments.is_empty());
    }

    #[test]
    fn test_no_json_at_all() {
        let err = Plan::parse_lenient("I could not decide.").unwrap_err();
        assert_eq!(err.raw, "I could not decide.");
        assert!(err.candidate.is_none());
        assert!(!err.last_error.is_empty());
    }

    #[test]
    fn test_broken_candidate_is_reported() {
        let err = Plan::parse_lenient("plan: {\"server\": \"fs\" \"tool\": 1}").unwrap_err();
        assert_eq!(
            err.candidate.as_deref(),
            Some("{\"server\": \"fs\" \"tool\": 1}")
        );
        assert!(err.to_string().contains("no JSON plan"));
    }

    #[test]
    fn test_serializes_null_targets() {
        let value = serde_json::to_value(Plan::default()).unwrap();
        assert_eq!(value, json!({"server": null, "tool": null, "arguments": {}}));
    }
}
