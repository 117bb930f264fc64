//! [`WorkTrackerPort`] adapter over the Jira REST API v3: JQL search and
//! status transitions, with Atlassian Document Format descriptions
//! flattened to plain text.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use pipeline_core::domain::Issue;
use pipeline_core::error::{Error, Result};
use pipeline_core::ports::WorkTrackerPort;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
}

impl JiraConfig {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("JIRA_BASE_URL")
            .map_err(|_| Error::TrackerUnavailable("JIRA_BASE_URL is not set".to_string()))?;
        let email = std::env::var("JIRA_EMAIL")
            .map_err(|_| Error::TrackerUnavailable("JIRA_EMAIL is not set".to_string()))?;
        let api_token = std::env::var("JIRA_API_TOKEN")
            .map_err(|_| Error::TrackerUnavailable("JIRA_API_TOKEN is not set".to_string()))?;
        Ok(Self { base_url, email, api_token })
    }

    fn auth_header(&self) -> String {
        let raw = format!("{}:{}", self.email, self.api_token);
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
    }
}

pub struct JiraClient {
    http: reqwest::Client,
    config: JiraConfig,
}

impl JiraClient {
    pub fn new(config: JiraConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    jql: String,
    #[serde(rename = "maxResults")]
    max_results: usize,
    #[serde(rename = "startAt")]
    start_at: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    key: String,
    fields: RawFields,
}

#[derive(Debug, Deserialize)]
struct RawFields {
    summary: String,
    #[serde(default)]
    description: Option<Value>,
    status: RawStatus,
    #[serde(default)]
    priority: Option<RawNamed>,
    #[serde(default)]
    issuetype: Option<RawNamed>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    components: Vec<RawNamed>,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawNamed {
    name: String,
}

#[derive(Debug, Serialize)]
struct TransitionRequest {
    transition: TransitionId,
}

#[derive(Debug, Serialize)]
struct TransitionId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TransitionsResponse {
    transitions: Vec<TransitionOption>,
}

#[derive(Debug, Deserialize)]
struct TransitionOption {
    id: String,
    name: String,
}

#[async_trait]
impl WorkTrackerPort for JiraClient {
    async fn list_todo(&self, project: &str) -> Result<Vec<Issue>> {
        let jql = format!("project = {project} AND statusCategory != Done ORDER BY priority DESC, created ASC");
        let response = self
            .http
            .post(format!("{}/rest/api/3/search", self.config.base_url))
            .header("Authorization", self.config.auth_header())
            .json(&SearchRequest { jql, max_results: 100, start_at: 0 })
            .send()
            .await
            .map_err(|e| Error::TrackerUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::TrackerUnavailable(format!(
                "jira search returned {}",
                response.status()
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::TrackerUnavailable(format!("decoding search response: {e}")))?;

        Ok(parsed.issues.into_iter().map(raw_issue_to_domain).collect())
    }

    async fn transition(&self, key: &str, transition_name: &str) -> Result<()> {
        let available = self
            .http
            .get(format!("{}/rest/api/3/issue/{key}/transitions", self.config.base_url))
            .header("Authorization", self.config.auth_header())
            .send()
            .await
            .map_err(|e| Error::TrackerUnavailable(e.to_string()))?
            .json::<TransitionsResponse>()
            .await
            .map_err(|e| Error::TrackerUnavailable(format!("decoding transitions: {e}")))?;

        let target = available
            .transitions
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(transition_name))
            .ok_or_else(|| {
                Error::TrackerUnavailable(format!("no transition named '{transition_name}' for {key}"))
            })?;

        let response = self
            .http
            .post(format!("{}/rest/api/3/issue/{key}/transitions", self.config.base_url))
            .header("Authorization", self.config.auth_header())
            .json(&TransitionRequest {
                transition: TransitionId { id: target.id.clone() },
            })
            .send()
            .await
            .map_err(|e| Error::TrackerUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::TrackerUnavailable(format!(
                "transitioning {key} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn raw_issue_to_domain(raw: RawIssue) -> Issue {
    Issue {
        key: raw.key,
        title: raw.fields.summary,
        description: raw
            .fields
            .description
            .as_ref()
            .map(flatten_adf)
            .unwrap_or_default(),
        status: raw.fields.status.name,
        priority: raw.fields.priority.map(|p| p.name).unwrap_or_else(|| "medium".to_string()),
        issue_type: raw.fields.issuetype.map(|t| t.name).unwrap_or_else(|| "task".to_string()),
        components: raw.fields.components.into_iter().map(|c| c.name).collect(),
        labels: raw.fields.labels,
        created_at: raw.fields.created,
        updated_at: raw.fields.updated,
    }
}

/// Flattens an Atlassian Document Format node tree to plain text:
/// concatenates textual leaves, inserts a newline at paragraph/heading/list
/// item boundaries, and collapses runs of three or more blank lines into
/// one so deeply nested empty containers don't pad the output.
pub fn flatten_adf(doc: &Value) -> String {
    let mut out = String::new();
    flatten_adf_node(doc, &mut out);
    collapse_blank_runs(out.trim())
}

fn flatten_adf_node(node: &Value, out: &mut String) {
    let node_type = node.get("type").and_then(|t| t.as_str()).unwrap_or("");

    if node_type == "text" {
        if let Some(text) = node.get("text").and_then(|t| t.as_str()) {
            out.push_str(text);
        }
        return;
    }

    if let Some(content) = node.get("content").and_then(|c| c.as_array()) {
        for child in content {
            flatten_adf_node(child, out);
        }
    }

    if matches!(node_type, "paragraph" | "heading" | "listItem" | "codeBlock") {
        out.push('\n');
    }
}

fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_paragraphs_with_newline_between() {
        let doc = json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [{"type": "text", "text": "First line"}]},
                {"type": "paragraph", "content": [{"type": "text", "text": "Second line"}]}
            ]
        });
        assert_eq!(flatten_adf(&doc), "First line\nSecond line");
    }

    #[test]
    fn collapses_long_runs_of_blank_lines() {
        let doc = json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [{"type": "text", "text": "A"}]},
                {"type": "paragraph", "content": []},
                {"type": "paragraph", "content": []},
                {"type": "paragraph", "content": []},
                {"type": "paragraph", "content": [{"type": "text", "text": "B"}]}
            ]
        });
        let flattened = flatten_adf(&doc);
        assert!(!flattened.contains("\n\n\n"));
        assert!(flattened.starts_with('A'));
        assert!(flattened.ends_with('B'));
    }

    #[test]
    fn basic_auth_header_is_base64_of_email_colon_token() {
        let config = JiraConfig {
            base_url: "https://example.atlassian.net".to_string(),
            email: "a@b.com".to_string(),
            api_token: "tok".to_string(),
        };
        let header = config.auth_header();
        assert!(header.starts_with("Basic "));
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(header.trim_start_matches("Basic "))
            .unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "a@b.com:tok");
    }
}
