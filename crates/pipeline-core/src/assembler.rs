//! Builds the [`DeploymentDocument`] the developer and reviewer subgraphs
//! consume, from a planner's subtask list. See `SPEC_FULL.md` §4.5.

use crate::domain::{DeploymentDocument, FileEntry, FileStructure, Issue, Metadata, Subtask};
use crate::error::{Error, Result};
use crate::json_extract::extract_json;
use crate::llm::{LlmCallOptions, LlmPort};
use crate::ports::DocRendererPort;
use crate::prompt::PromptRegistry;
use std::collections::BTreeMap;

pub struct AssemblerOutput {
    pub document: DeploymentDocument,
    pub markdown: String,
    pub tokens_used: u64,
}

pub struct Assembler<'a> {
    pub llm: &'a dyn LlmPort,
    pub prompts: &'a PromptRegistry,
    pub renderer: &'a dyn DocRendererPort,
    pub model: String,
}

impl<'a> Assembler<'a> {
    pub async fn assemble(&self, issue: &Issue, subtasks: &[Subtask]) -> Result<AssemblerOutput> {
        let mut vars = BTreeMap::new();
        vars.insert("issue_key".to_string(), issue.key.clone());
        vars.insert("issue_title".to_string(), issue.title.clone());
        vars.insert("issue_description".to_string(), issue.description.clone());
        vars.insert(
            "subtasks_json".to_string(),
            serde_json::to_string(subtasks).unwrap_or_default(),
        );

        let prompt = self.prompts.format("assembler.generate", &vars)?;
        let response = self
            .llm
            .call(
                &prompt,
                "assembler",
                LlmCallOptions {
                    model: Some(self.model.clone()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::AssemblyFailed(e.to_string()))?;

        let value = extract_json(&response.text).map_err(|e| Error::AssemblyFailed(e.to_string()))?;
        let mut document = parse_document(&value, issue);

        if document.file_structure.files.is_empty() {
            tracing::warn!(issue = %issue.key, "assembler produced no files, synthesizing from subtasks");
            document.file_structure = synthesize_file_structure(subtasks);
        }

        for orphan in document.orphaned_spec_keys() {
            tracing::warn!(issue = %issue.key, key = orphan, "dropping orphaned technical spec key");
        }
        let known: std::collections::HashSet<String> = document
            .file_structure
            .files
            .iter()
            .map(|f| f.filename.clone())
            .collect();
        document.technical_specifications.retain(|k, _| known.contains(k));

        let markdown = self.renderer.render_markdown(&document);

        Ok(AssemblerOutput {
            document,
            markdown,
            tokens_used: response.tokens_used,
        })
    }
}

fn parse_document(value: &serde_json::Value, issue: &Issue) -> DeploymentDocument {
    let mut document: DeploymentDocument = serde_json::from_value(value.clone()).unwrap_or_default();
    document.metadata = Metadata {
        issue_key: issue.key.clone(),
        version: "1".to_string(),
        timestamp: chrono::Utc::now(),
    };
    document
}

/// Fallback when the model's `file_structure.files` is empty: one generic
/// file per subtask, named from a slugified description so the developer
/// subgraph always has something to generate against.
fn synthesize_file_structure(subtasks: &[Subtask]) -> FileStructure {
    let files = subtasks
        .iter()
        .map(|s| FileEntry {
            filename: format!("src/subtask_{}.rs", s.id),
            file_type: "rust".to_string(),
            description: s.description.clone(),
        })
        .collect();
    FileStructure {
        files,
        file_types: vec!["rust".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::markdown::MarkdownRenderer;
    use crate::test_support::{sample_issue, InMemoryLlmPort};

    fn subtasks() -> Vec<Subtask> {
        vec![Subtask {
            id: 1,
            description: "parse flag".to_string(),
            priority: 3,
            requirements_covered: vec![1],
            reasoning: "r".to_string(),
            score: 8.0,
            score_reasoning: "r".to_string(),
        }]
    }

    #[tokio::test]
    async fn synthesizes_files_when_model_returns_none() {
        let llm = InMemoryLlmPort::default();
        llm.queue(
            "assembler",
            r#"{"project_overview":{"title":"t","description":"d","project_type":"cli","architecture":"a"},
                "implementation_plan":[],"file_structure":{"files":[],"file_types":[]},
                "technical_specifications":{},"deployment_instructions":[]}"#,
            42,
        );
        let mut prompts = PromptRegistry::new();
        prompts.register("assembler.generate", "build a plan");
        let renderer = MarkdownRenderer;
        let assembler = Assembler {
            llm: &llm,
            prompts: &prompts,
            renderer: &renderer,
            model: "test-model".to_string(),
        };
        let out = assembler.assemble(&sample_issue("DEMO-1"), &subtasks()).await.unwrap();
        assert_eq!(out.document.file_structure.files.len(), 1);
        assert_eq!(out.document.file_structure.files[0].filename, "src/subtask_1.rs");
        assert!(out.markdown.contains("File Structure"));
    }

    #[tokio::test]
    async fn drops_orphaned_technical_spec_keys() {
        let llm = InMemoryLlmPort::default();
        llm.queue(
            "assembler",
            r#"{"project_overview":{"title":"t","description":"d","project_type":"cli","architecture":"a"},
                "implementation_plan":[],
                "file_structure":{"files":[{"filename":"src/cli.rs","type":"rust","description":"d"}],"file_types":["rust"]},
                "technical_specifications":{"src/cli.rs":"spec","src/ghost.rs":"orphan"},
                "deployment_instructions":[]}"#,
            10,
        );
        let mut prompts = PromptRegistry::new();
        prompts.register("assembler.generate", "build a plan");
        let renderer = MarkdownRenderer;
        let assembler = Assembler {
            llm: &llm,
            prompts: &prompts,
            renderer: &renderer,
            model: "test-model".to_string(),
        };
        let out = assembler.assemble(&sample_issue("DEMO-1"), &subtasks()).await.unwrap();
        assert!(out.document.technical_specifications.contains_key("src/cli.rs"));
        assert!(!out.document.technical_specifications.contains_key("src/ghost.rs"));
    }
}
