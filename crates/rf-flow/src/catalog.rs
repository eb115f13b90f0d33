//! Catalog: `node_name -> {description, tags, side_effects,
//! input_schema, output_schema, aliases?}`, with filtered listing and a
//! compact prompt-friendly rendering for the planner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    Pure,
    Read,
    Write,
    External,
    Stateful,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub side_effects: SideEffect,
    pub input_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
    pub aliases: Vec<String>,
}

/// A filter applied when rendering a catalog for one planner run, reused by
/// `rf-planner`'s tool-visibility policy.
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub whitelist: Option<Vec<String>>,
    pub blacklist: Vec<String>,
    pub required_tags: Vec<String>,
}

impl CatalogFilter {
    /// Whether `entry` is visible under this filter, for callers resolving a
    /// single named tool rather than listing the whole catalog.
    pub fn is_visible(&self, entry: &CatalogEntry) -> bool {
        self.allows(entry)
    }

    fn allows(&self, entry: &CatalogEntry) -> bool {
        if let Some(whitelist) = &self.whitelist {
            if !whitelist.contains(&entry.name) {
                return false;
            }
        }
        if self.blacklist.contains(&entry.name) {
            return false;
        }
        self.required_tags.iter().all(|t| entry.tags.contains(t))
    }
}

#[derive(Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
    alias_to_name: BTreeMap<String, String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: CatalogEntry) {
        for alias in &entry.aliases {
            self.alias_to_name.insert(alias.clone(), entry.name.clone());
        }
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Look up by name or alias.
    pub fn get(&self, name_or_alias: &str) -> Option<&CatalogEntry> {
        self.entries.get(name_or_alias).or_else(|| self.alias_to_name.get(name_or_alias).and_then(|n| self.entries.get(n)))
    }

    /// Name-ascending listing, narrowed by `filter`.
    pub fn list(&self, filter: &CatalogFilter) -> Vec<&CatalogEntry> {
        self.entries.values().filter(|e| filter.allows(e)).collect()
    }

    /// A compact, prompt-friendly rendering: one line per visible entry.
    pub fn render_prompt(&self, filter: &CatalogFilter) -> String {
        self.list(filter)
            .into_iter()
            .map(|e| format!("- {}: {} [{}]", e.name, e.description, tags_str(&e.tags)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn tags_str(tags: &[String]) -> String {
    tags.join(",")
}
