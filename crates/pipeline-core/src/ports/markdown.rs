//! Deterministic markdown formatter for [`DeploymentDocument`], used as the
//! assembler's "deterministic formatter" strategy (spec §4.5 allows either
//! a second LLM call or a deterministic formatter for the markdown view).

use super::DocRendererPort;
use crate::domain::DeploymentDocument;
use std::fmt::Write as _;

pub struct MarkdownRenderer;

impl DocRendererPort for MarkdownRenderer {
    fn render_markdown(&self, document: &DeploymentDocument) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}", document.project_overview.title);
        let _ = writeln!(out, "\n{}\n", document.project_overview.description);
        let _ = writeln!(
            out,
            "- **Issue**: {}\n- **Version**: {}\n- **Type**: {}\n- **Architecture**: {}\n",
            document.metadata.issue_key,
            document.metadata.version,
            document.project_overview.project_type,
            document.project_overview.architecture
        );

        if !document.implementation_plan.is_empty() {
            let _ = writeln!(out, "## Implementation Plan\n");
            for phase in &document.implementation_plan {
                let _ = writeln!(out, "### {}", phase.name);
                for task in &phase.tasks {
                    let _ = writeln!(out, "- {task}");
                }
                out.push('\n');
            }
        }

        let _ = writeln!(out, "## File Structure\n");
        for file in &document.file_structure.files {
            let _ = writeln!(
                out,
                "- `{}` ({}): {}",
                file.filename, file.file_type, file.description
            );
        }

        if !document.technical_specifications.is_empty() {
            let _ = writeln!(out, "\n## Technical Specifications\n");
            for (file, spec) in &document.technical_specifications {
                let _ = writeln!(out, "### {file}\n\n{spec}\n");
            }
        }

        if !document.deployment_instructions.is_empty() {
            let _ = writeln!(out, "## Deployment Instructions\n");
            for (i, step) in document.deployment_instructions.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", i + 1, step);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FileEntry, FileStructure, Metadata, ProjectOverview};

    #[test]
    fn renders_title_and_files() {
        let doc = DeploymentDocument {
            metadata: Metadata {
                issue_key: "DEMO-1".into(),
                version: "1".into(),
                timestamp: chrono::Utc::now(),
            },
            project_overview: ProjectOverview {
                title: "Add CLI flag".into(),
                description: "Print the version".into(),
                project_type: "cli".into(),
                architecture: "single binary".into(),
            },
            file_structure: FileStructure {
                files: vec![FileEntry {
                    filename: "cli.py".into(),
                    file_type: "python".into(),
                    description: "entry point".into(),
                }],
                file_types: vec!["python".into()],
            },
            ..Default::default()
        };
        let rendered = MarkdownRenderer.render_markdown(&doc);
        assert!(rendered.starts_with("# Add CLI flag"));
        assert!(rendered.contains("`cli.py`"));
    }
}
