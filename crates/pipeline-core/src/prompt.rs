//! Prompt registry: named templates loaded at startup, `{{var}}`
//! substitution via `tera`. An unknown template name fails fast; a missing
//! variable is left as the literal placeholder text instead of erroring, so
//! a stale prompt is detectable in the model's output rather than crashing
//! the node.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use tera::{Context, Tera};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap())
}

/// Read-only at runtime once constructed; `format` takes `&self`.
pub struct PromptRegistry {
    templates: HashMap<String, String>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, template: impl Into<String>) -> &mut Self {
        self.templates.insert(name.into(), template.into());
        self
    }

    /// Substitutes every `{{var}}` placeholder present in `vars`; any
    /// placeholder absent from `vars` is left untouched in the output.
    pub fn format(&self, name: &str, vars: &BTreeMap<String, String>) -> Result<String> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| Error::InternalExecutionError(format!("unknown prompt template '{name}'")))?;

        // Tera errors on a referenced-but-undefined variable, which would
        // turn a stale prompt into a hard failure instead of a detectable
        // artifact in the model's output. Pre-seed every placeholder Tera
        // would otherwise reject with its own literal text, then let the
        // supplied `vars` override.
        let mut context = Context::new();
        for cap in placeholder_re().captures_iter(template) {
            let key = &cap[1];
            context.insert(key, &format!("{{{{{key}}}}}"));
        }
        for (key, value) in vars {
            context.insert(key, value);
        }

        Tera::one_off(template, &context, false)
            .map_err(|e| Error::InternalExecutionError(format!("prompt '{name}' render failed: {e}")))
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variables() {
        let mut registry = PromptRegistry::new();
        registry.register("greet", "Hello {{name}}, issue {{issue_key}}.");
        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), "Ada".to_string());
        vars.insert("issue_key".to_string(), "DEMO-1".to_string());
        let out = registry.format("greet", &vars).unwrap();
        assert_eq!(out, "Hello Ada, issue DEMO-1.");
    }

    #[test]
    fn leaves_missing_variable_as_literal_text() {
        let mut registry = PromptRegistry::new();
        registry.register("greet", "Hello {{name}}, reviewer {{reviewer}}.");
        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), "Ada".to_string());
        let out = registry.format("greet", &vars).unwrap();
        assert_eq!(out, "Hello Ada, reviewer {{reviewer}}.");
    }

    #[test]
    fn unknown_template_fails_fast() {
        let registry = PromptRegistry::new();
        let err = registry.format("missing", &BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), "InternalExecutionError");
    }
}
