//! The default prompt templates registered at startup. Separated from
//! `main.rs` so an operator can see the whole prompt surface in one place.

use pipeline_core::prompt::PromptRegistry;

pub fn default_registry() -> PromptRegistry {
    let mut registry = PromptRegistry::new();

    registry.register(
        "planner.method_choice",
        "Issue {{issue_key}}: \"{{issue_title}}\"\n{{issue_description}}\n\n\
         Decide whether this issue is simple enough for a single linear plan or \
         needs a graph-of-thought decomposition. Respond with JSON: \
         {\"method\": \"linear\"|\"graph\"}.",
    );
    registry.register(
        "planner.linear",
        "Issue {{issue_key}}: \"{{issue_title}}\"\n{{issue_description}}\n\n\
         Produce a short ordered list of subtasks as a JSON array of \
         {\"id\": int, \"description\": string} objects.",
    );
    registry.register(
        "planner.graph_generate",
        "Issue {{issue_key}}: \"{{issue_title}}\"\n{{issue_description}}\n\n\
         Decompose this issue into subtasks with explicit dependency edges. \
         Respond with a JSON array of {\"id\": int, \"description\": string, \
         \"depends_on\": [int]} objects.",
    );
    registry.register(
        "planner.graph_score",
        "Score each of the following subtasks from 1 to 10 on how well-specified \
         and independently actionable it is.\n\n{{subtasks_json}}\n\n\
         Respond with a JSON array of {\"covered_subtasks\": [int], \"score\": number} objects.",
    );
    registry.register(
        "planner.graph_merge",
        "Merge the following scored subtasks into a single ordered plan, preserving \
         dependency order.\n\n{{subtasks_json}}\n\n\
         Respond with a JSON array of {\"id\": int, \"description\": string, \"score\": number} objects.",
    );

    registry.register(
        "assembler.generate",
        "Issue {{issue_key}}: \"{{issue_title}}\"\n{{issue_description}}\n\n\
         Approved subtasks:\n{{subtasks_json}}\n\n\
         Produce a deployment document as JSON with keys: metadata, project_overview, \
         implementation_plan, file_structure, technical_specifications.",
    );

    registry.register(
        "developer.generate",
        "Issue {{issue_key}}. Write the complete contents of `{{filename}}` ({{file_type}}).\n\
         Purpose: {{description}}\n\nTechnical spec:\n{{technical_spec}}\n\n\
         Related files already written:\n{{related_files_json}}\n\n\
         Respond with only the file contents, optionally fenced in a code block.",
    );
    registry.register(
        "developer.correct",
        "Issue {{issue_key}}. Rewrite `{{filename}}` to fix the following reviewer \
         findings without changing anything else:\n{{mistakes}}\n\n\
         Current contents:\n{{current_content}}\n\n\
         Respond with only the corrected file contents.",
    );

    registry.register(
        "reviewer.completeness",
        "Issue {{issue_key}}. Does the generated file set fully implement the requested \
         behavior? Files:\n{{files_json}}\n\nKnowledge base:\n{{knowledge_base}}\n\n\
         Respond with JSON: {\"score\": 0-100, \"mistakes\": [string], \"reasoning\": string}.",
    );
    registry.register(
        "reviewer.security",
        "Issue {{issue_key}}. Review the following files for security issues. \
         Files:\n{{files_json}}\n\nKnowledge base:\n{{knowledge_base}}\n\n\
         Respond with JSON: {\"score\": 0-100, \"mistakes\": [string], \"reasoning\": string}.",
    );
    registry.register(
        "reviewer.standards",
        "Issue {{issue_key}}. Review the following files against project coding standards. \
         Files:\n{{files_json}}\n\nKnowledge base:\n{{knowledge_base}}\n\n\
         Respond with JSON: {\"score\": 0-100, \"mistakes\": [string], \"reasoning\": string}.",
    );

    registry
}
