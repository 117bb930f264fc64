//! Generation and correction modes: turns a [`DeploymentDocument`] into
//! source files, bounded to [`crate::config::Config::dev_parallelism`]
//! concurrent per-file calls. See `SPEC_FULL.md` §4.6.

use crate::domain::{DeploymentDocument, GeneratedFileSet, MemoryFileEntry};
use crate::error::{Error, Result};
use crate::llm::{LlmCallOptions, LlmPort};
use crate::memory::{Memory, MemoryUpdate};
use crate::prompt::PromptRegistry;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;

pub struct DeveloperOutput {
    pub files: GeneratedFileSet,
    pub tokens_used: u64,
}

pub struct Developer<'a> {
    pub llm: &'a dyn LlmPort,
    pub prompts: &'a PromptRegistry,
    pub memory: &'a Memory,
    pub parallelism: usize,
    pub model: String,
}

impl<'a> Developer<'a> {
    /// First pass: one file per `document.file_structure.files` entry,
    /// written fresh with related prior-art files from memory as context.
    pub async fn generate(
        &self,
        issue_key: &str,
        issue_title: &str,
        document: &DeploymentDocument,
    ) -> Result<DeveloperOutput> {
        let related = self.memory.files_related_to_title(issue_title);
        let related_json = serde_json::to_string(&related).unwrap_or_default();

        let results = stream::iter(document.file_structure.files.clone().into_iter().map(|entry| {
            let related_json = related_json.clone();
            let spec = document
                .technical_specifications
                .get(&entry.filename)
                .cloned()
                .unwrap_or_default();
            async move {
                let mut vars = BTreeMap::new();
                vars.insert("issue_key".to_string(), issue_key.to_string());
                vars.insert("filename".to_string(), entry.filename.clone());
                vars.insert("file_type".to_string(), entry.file_type.clone());
                vars.insert("description".to_string(), entry.description.clone());
                vars.insert("technical_spec".to_string(), spec);
                vars.insert("related_files_json".to_string(), related_json);

                let prompt = self.prompts.format("developer.generate", &vars)?;
                let response = self
                    .llm
                    .call(
                        &prompt,
                        "developer",
                        LlmCallOptions {
                            model: Some(self.model.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| Error::GenerationFailed(format!("{}: {e}", entry.filename)))?;

                let content = strip_code_fences(&response.text);
                Ok::<_, Error>((entry.filename.clone(), content, response.tokens_used))
            }
        }))
        .buffer_unordered(self.parallelism.max(1))
        .collect::<Vec<_>>()
        .await;

        let mut files = GeneratedFileSet::new();
        let mut tokens_used = 0u64;
        let mut new_memory_files = BTreeMap::new();
        let mut new_relationships = BTreeMap::new();

        for result in results {
            let (filename, content, tokens) = result?;
            tokens_used += tokens;
            new_relationships.insert(filename.clone(), extract_references(&content));
            new_memory_files.insert(
                filename.clone(),
                MemoryFileEntry {
                    content: content.clone(),
                    file_type: document
                        .file_structure
                        .files
                        .iter()
                        .find(|f| f.filename == filename)
                        .map(|f| f.file_type.clone())
                        .unwrap_or_default(),
                    issue_key: issue_key.to_string(),
                },
            );
            files.insert(filename, content);
        }

        self.memory.update(MemoryUpdate {
            new_files: new_memory_files,
            new_relationships,
            issue_key: Some(issue_key.to_string()),
            ..Default::default()
        });

        Ok(DeveloperOutput { files, tokens_used })
    }

    /// Rebuild pass: rewrites every currently generated file against the
    /// deduplicated mistake list from the latest review, so a mistake the
    /// developer already resolved in a prior rebuild iteration is not
    /// re-sent to the model.
    pub async fn correct(
        &self,
        issue_key: &str,
        files: &GeneratedFileSet,
        mistakes: &[String],
    ) -> Result<DeveloperOutput> {
        let already_known: Vec<String> = self.memory.snapshot().cumulative_mistakes;
        let fresh_mistakes: Vec<&String> = mistakes
            .iter()
            .filter(|m| !already_known.contains(m))
            .collect();
        let mistakes_text = if fresh_mistakes.is_empty() {
            mistakes.join("\n")
        } else {
            fresh_mistakes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };

        let results = stream::iter(files.clone().into_iter().map(|(filename, content)| {
            let mistakes_text = mistakes_text.clone();
            async move {
                let mut vars = BTreeMap::new();
                vars.insert("issue_key".to_string(), issue_key.to_string());
                vars.insert("filename".to_string(), filename.clone());
                vars.insert("current_content".to_string(), content.clone());
                vars.insert("mistakes".to_string(), mistakes_text);

                let prompt = self.prompts.format("developer.correct", &vars)?;
                let response = self
                    .llm
                    .call(
                        &prompt,
                        "developer",
                        LlmCallOptions {
                            model: Some(self.model.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| Error::GenerationFailed(format!("{filename}: {e}")))?;

                let content = strip_code_fences(&response.text);
                Ok::<_, Error>((filename.clone(), content, response.tokens_used))
            }
        }))
        .buffer_unordered(self.parallelism.max(1))
        .collect::<Vec<_>>()
        .await;

        let mut corrected = GeneratedFileSet::new();
        let mut tokens_used = 0u64;
        for result in results {
            let (filename, content, tokens) = result?;
            tokens_used += tokens;
            corrected.insert(filename, content);
        }

        self.memory.update(MemoryUpdate {
            new_mistakes: mistakes.to_vec(),
            resolved_mistakes: mistakes.to_vec(),
            ..Default::default()
        });

        Ok(DeveloperOutput {
            files: corrected,
            tokens_used,
        })
    }
}

/// Strips a single leading/trailing markdown code fence (with an optional
/// language tag) from generated source, without the JSON-balancing that
/// [`crate::json_extract`] needs for structured output.
fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        body.strip_suffix("```").unwrap_or(body).trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Pulls plausible intra-project import targets (`use foo::bar;`, `from
/// foo import bar`, `import foo`) out of generated source so the memory's
/// `file_relationships` map has something to key off of across issues.
fn extract_references(content: &str) -> Vec<String> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"(?m)^\s*(?:use|import|from)\s+([A-Za-z0-9_:.]+)").unwrap()
    });
    let mut seen = std::collections::HashSet::new();
    re.captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
