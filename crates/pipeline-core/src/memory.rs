//! Owned, mutex-guarded [`ProjectMemory`] per the "cyclic/shared project
//! memory" design note: callers never see a raw reference, only an owned
//! `snapshot()` and an additive `update(delta)`.

use crate::domain::{MemoryFileEntry, ProjectMemory};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// An additive change to apply to [`ProjectMemory`] under one lock
/// acquisition.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub new_files: BTreeMap<String, MemoryFileEntry>,
    pub new_relationships: BTreeMap<String, Vec<String>>,
    pub new_mistakes: Vec<String>,
    pub resolved_mistakes: Vec<String>,
    pub issue_key: Option<String>,
}

pub struct Memory {
    inner: Mutex<ProjectMemory>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ProjectMemory::default()),
        }
    }

    /// An owned copy, safe to read without holding the lock.
    pub fn snapshot(&self) -> ProjectMemory {
        self.inner.lock().clone()
    }

    pub fn update(&self, delta: MemoryUpdate) {
        let mut guard = self.inner.lock();
        guard.all_generated_files.extend(delta.new_files);
        for (file, refs) in delta.new_relationships {
            guard.file_relationships.insert(file, refs);
        }
        for mistake in delta.new_mistakes {
            if !guard.cumulative_mistakes.contains(&mistake) {
                guard.cumulative_mistakes.push(mistake);
            }
        }
        for mistake in delta.resolved_mistakes {
            guard.cumulative_mistakes.retain(|m| m != &mistake);
            if !guard.resolved_mistakes.contains(&mistake) {
                guard.resolved_mistakes.push(mistake);
            }
        }
        if let Some(key) = delta.issue_key {
            guard.issue_history.push(key);
        }
    }

    /// Files whose name shares any whitespace-separated keyword with
    /// `issue_title`, used as read-only context for the developer's
    /// generation-mode prompts.
    pub fn files_related_to_title(&self, issue_title: &str) -> BTreeMap<String, MemoryFileEntry> {
        let keywords: Vec<String> = issue_title
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| w.len() > 2)
            .collect();
        let guard = self.inner.lock();
        guard
            .all_generated_files
            .iter()
            .filter(|(name, _)| {
                let lower = name.to_lowercase();
                keywords.iter().any(|k| lower.contains(k.as_str()))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_is_additive_and_deduplicates_mistakes() {
        let memory = Memory::new();
        memory.update(MemoryUpdate {
            new_mistakes: vec!["missing tests".into(), "missing tests".into()],
            ..Default::default()
        });
        let snap = memory.snapshot();
        assert_eq!(snap.cumulative_mistakes, vec!["missing tests".to_string()]);
    }

    #[test]
    fn resolved_mistakes_move_out_of_cumulative() {
        let memory = Memory::new();
        memory.update(MemoryUpdate {
            new_mistakes: vec!["fix auth".into()],
            ..Default::default()
        });
        memory.update(MemoryUpdate {
            resolved_mistakes: vec!["fix auth".into()],
            ..Default::default()
        });
        let snap = memory.snapshot();
        assert!(snap.cumulative_mistakes.is_empty());
        assert_eq!(snap.resolved_mistakes, vec!["fix auth".to_string()]);
    }

    #[test]
    fn files_related_to_title_matches_keyword() {
        let memory = Memory::new();
        memory.update(MemoryUpdate {
            new_files: BTreeMap::from([(
                "cli_version.rs".into(),
                MemoryFileEntry {
                    content: "..".into(),
                    file_type: "rust".into(),
                    issue_key: "DEMO-0".into(),
                },
            )]),
            ..Default::default()
        });
        let related = memory.files_related_to_title("Add CLI flag");
        assert!(related.contains_key("cli_version.rs"));
    }
}
