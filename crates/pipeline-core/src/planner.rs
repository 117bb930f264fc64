//! Method choice (linear vs graph), subtask generation, scoring, merging.
//! See `SPEC_FULL.md` §5 / spec.md §4.4.

use crate::domain::{Issue, Subtask, SubtaskGraph};
use crate::error::{Error, Result};
use crate::json_extract::{extract_json, extract_json_array};
use crate::llm::{LlmCallOptions, LlmPort};
use crate::prompt::PromptRegistry;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMethod {
    Linear,
    Graph,
}

pub struct PlannerOutput {
    pub method: PlanMethod,
    pub subtasks: Vec<Subtask>,
    pub overall_score: f64,
    pub tokens_used: u64,
}

pub struct Planner<'a> {
    pub llm: &'a dyn LlmPort,
    pub prompts: &'a PromptRegistry,
    pub model: String,
}

impl<'a> Planner<'a> {
    pub async fn plan(&self, issue: &Issue) -> Result<PlannerOutput> {
        let mut tokens_used = 0u64;

        let method = self.choose_method(issue, &mut tokens_used).await;
        tracing::info!(method = ?method, issue = %issue.key, "planner method chosen");

        match method {
            PlanMethod::Linear => self.plan_linear(issue, tokens_used).await,
            PlanMethod::Graph => self.plan_graph(issue, tokens_used).await,
        }
    }

    async fn choose_method(&self, issue: &Issue, tokens_used: &mut u64) -> PlanMethod {
        let vars = issue_vars(issue);
        let prompt = match self.prompts.format("planner.method_choice", &vars) {
            Ok(p) => p,
            Err(_) => return PlanMethod::Graph,
        };
        let response = match self
            .llm
            .call(&prompt, "planner", self.options())
            .await
        {
            Ok(r) => r,
            // A failed classification call defaults to graph, the more
            // conservative of the two paths, rather than failing planning
            // outright over a non-essential decision.
            Err(_) => return PlanMethod::Graph,
        };
        *tokens_used += response.tokens_used;

        match extract_json(&response.text) {
            Ok(value) => match value.get("method").and_then(|m| m.as_str()) {
                Some("linear") => PlanMethod::Linear,
                Some("graph") => PlanMethod::Graph,
                _ => PlanMethod::Graph,
            },
            Err(_) => PlanMethod::Graph,
        }
    }

    async fn plan_linear(&self, issue: &Issue, mut tokens_used: u64) -> Result<PlannerOutput> {
        let vars = issue_vars(issue);
        let prompt = self.prompts.format("planner.linear", &vars)?;
        let response = self
            .llm
            .call(&prompt, "planner", self.options())
            .await
            .map_err(|e| Error::PlanningFailed(e.to_string()))?;
        tokens_used += response.tokens_used;

        let items = extract_json_array(&response.text)
            .map_err(|e| Error::PlanningFailed(e.to_string()))?;
        let mut subtasks = parse_subtasks(&items);
        if subtasks.is_empty() {
            return Err(Error::PlanningFailed("planner returned no subtasks".into()));
        }
        for s in &mut subtasks {
            s.score = 10.0;
            s.score_reasoning = "linear path trusted without scoring".to_string();
        }

        Ok(PlannerOutput {
            method: PlanMethod::Linear,
            subtasks,
            overall_score: 10.0,
            tokens_used,
        })
    }

    async fn plan_graph(&self, issue: &Issue, mut tokens_used: u64) -> Result<PlannerOutput> {
        // 1. Generation
        let vars = issue_vars(issue);
        let prompt = self.prompts.format("planner.graph_generate", &vars)?;
        let response = self
            .llm
            .call(&prompt, "planner", self.options())
            .await
            .map_err(|e| Error::PlanningFailed(e.to_string()))?;
        tokens_used += response.tokens_used;

        let items = extract_json_array(&response.text)
            .map_err(|e| Error::PlanningFailed(e.to_string()))?;
        let nodes = parse_subtasks(&items);
        if nodes.is_empty() {
            return Err(Error::PlanningFailed("planner returned no subtasks".into()));
        }
        let mut graph = extract_explicit_edges(&response.text)
            .map(|edges| SubtaskGraph {
                nodes: nodes.clone(),
                edges,
            })
            .unwrap_or_else(|| SubtaskGraph::chain_from_nodes(nodes));
        graph.sanitize_edges();

        // 2. Scoring (single batched call over all subtasks)
        let mut scoring_vars = vars.clone();
        scoring_vars.insert(
            "subtasks_json".to_string(),
            serde_json::to_string(&graph.nodes).unwrap_or_default(),
        );
        let prompt = self.prompts.format("planner.graph_score", &scoring_vars)?;
        let response = self
            .llm
            .call(&prompt, "planner", self.options())
            .await
            .map_err(|e| Error::PlanningFailed(e.to_string()))?;
        tokens_used += response.tokens_used;

        let scored_items = extract_json_array(&response.text).unwrap_or_default();
        apply_scores(&mut graph, &scored_items);

        // 3. Merging
        let mut merge_vars = vars;
        merge_vars.insert(
            "scored_subtasks_json".to_string(),
            serde_json::to_string(&graph.nodes).unwrap_or_default(),
        );
        let prompt = self.prompts.format("planner.graph_merge", &merge_vars)?;
        let response = self
            .llm
            .call(&prompt, "planner", self.options())
            .await
            .map_err(|e| Error::PlanningFailed(e.to_string()))?;
        tokens_used += response.tokens_used;

        let merged_items = extract_json_array(&response.text)
            .map_err(|e| Error::PlanningFailed(e.to_string()))?;
        let merged = merge_subtasks(&graph, &merged_items);
        if merged.is_empty() {
            return Err(Error::PlanningFailed("merging produced no subtasks".into()));
        }
        let overall_score = merged.iter().map(|s| s.score).sum::<f64>() / merged.len() as f64;

        Ok(PlannerOutput {
            method: PlanMethod::Graph,
            subtasks: merged,
            overall_score,
            tokens_used,
        })
    }

    fn options(&self) -> LlmCallOptions {
        LlmCallOptions {
            model: Some(self.model.clone()),
            ..Default::default()
        }
    }
}

fn issue_vars(issue: &Issue) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("issue_key".to_string(), issue.key.clone());
    vars.insert("issue_title".to_string(), issue.title.clone());
    vars.insert("issue_description".to_string(), issue.description.clone());
    vars
}

/// Non-dict items in a scored/generated list are discarded rather than
/// failing the whole batch.
fn parse_subtasks(items: &[serde_json::Value]) -> Vec<Subtask> {
    items
        .iter()
        .filter_map(|v| v.as_object())
        .filter_map(|obj| {
            let id = obj.get("id")?.as_u64()? as u32;
            let description = obj.get("description")?.as_str()?.to_string();
            let priority = obj
                .get("priority")
                .and_then(|p| p.as_u64())
                .unwrap_or(3)
                .clamp(1, 5) as u8;
            let requirements_covered = obj
                .get("requirements_covered")
                .and_then(|r| r.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_u64().map(|n| n as u32)).collect())
                .unwrap_or_default();
            let reasoning = obj
                .get("reasoning")
                .and_then(|r| r.as_str())
                .unwrap_or_default()
                .to_string();
            Some(Subtask {
                id,
                description,
                priority,
                requirements_covered,
                reasoning,
                score: 0.0,
                score_reasoning: String::new(),
            })
        })
        .collect()
}

fn extract_explicit_edges(raw_text: &str) -> Option<Vec<(u32, u32)>> {
    let value = extract_json(raw_text).ok()?;
    let edges = value.get("edges")?.as_array()?;
    Some(
        edges
            .iter()
            .filter_map(|e| {
                let pair = e.as_array()?;
                let from = pair.first()?.as_u64()? as u32;
                let to = pair.get(1)?.as_u64()? as u32;
                Some((from, to))
            })
            .collect(),
    )
}

/// Applies batched scores to `graph.nodes` in place. Missing or malformed
/// entries default to 7.5 with "default" reasoning so scoring never stalls
/// the pipeline.
fn apply_scores(graph: &mut SubtaskGraph, scored_items: &[serde_json::Value]) {
    let mut by_id: BTreeMap<u32, (f64, String)> = BTreeMap::new();
    for item in scored_items {
        let Some(obj) = item.as_object() else { continue };
        let Some(id) = obj.get("id").and_then(|v| v.as_u64()) else {
            continue;
        };
        let score = obj
            .get("score")
            .and_then(|v| v.as_f64())
            .unwrap_or(7.5)
            .clamp(0.0, 10.0);
        let reasoning = obj
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string();
        by_id.insert(id as u32, (score, reasoning));
    }

    for node in &mut graph.nodes {
        let (score, reasoning) = by_id
            .get(&node.id)
            .cloned()
            .unwrap_or((7.5, "default".to_string()));
        node.score = score;
        node.score_reasoning = reasoning;
        tracing::debug!(id = node.id, score, "subtask scored");
    }
}

/// Consolidates the scored graph into merged "main" subtasks per merge item
/// `{id, description, priority, requirements_covered, reasoning,
/// covered_subtasks}`. A merged subtask's score is the unweighted average
/// of its `covered_subtasks`' scores; absent source ids fall back to a
/// textual match against the original description, else the graph-wide
/// average.
fn merge_subtasks(graph: &SubtaskGraph, merged_items: &[serde_json::Value]) -> Vec<Subtask> {
    let global_average = if graph.nodes.is_empty() {
        7.5
    } else {
        graph.nodes.iter().map(|n| n.score).sum::<f64>() / graph.nodes.len() as f64
    };

    merged_items
        .iter()
        .filter_map(|v| v.as_object())
        .filter_map(|obj| {
            let id = obj.get("id")?.as_u64()? as u32;
            let description = obj.get("description")?.as_str()?.to_string();
            let priority = obj
                .get("priority")
                .and_then(|p| p.as_u64())
                .unwrap_or(3)
                .clamp(1, 5) as u8;
            let requirements_covered = obj
                .get("requirements_covered")
                .and_then(|r| r.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_u64().map(|n| n as u32)).collect())
                .unwrap_or_default();
            let reasoning = obj
                .get("reasoning")
                .and_then(|r| r.as_str())
                .unwrap_or_default()
                .to_string();
            let covered_subtasks: Vec<u32> = obj
                .get("covered_subtasks")
                .and_then(|c| c.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_u64().map(|n| n as u32)).collect())
                .unwrap_or_default();

            let score = if covered_subtasks.is_empty() {
                // Fall back to a first-match-wins textual match against an
                // original subtask's description, by iteration order.
                graph
                    .nodes
                    .iter()
                    .find(|n| n.description == description)
                    .map(|n| n.score)
                    .unwrap_or(global_average)
            } else {
                let scores: Vec<f64> = covered_subtasks
                    .iter()
                    .filter_map(|id| graph.node(*id).map(|n| n.score))
                    .collect();
                if scores.is_empty() {
                    global_average
                } else {
                    scores.iter().sum::<f64>() / scores.len() as f64
                }
            };

            Some(Subtask {
                id,
                description,
                priority,
                requirements_covered,
                reasoning,
                score,
                score_reasoning: format!("averaged over {} source subtask(s)", covered_subtasks.len()),
            })
        })
        .collect()
}
