//! Client-side model of the server-reported graph, plus the selection
//! state that survives model replacement.
//!
//! Every successful generate replaces the whole configuration/project/
//! target graph, so object identity is worthless across updates. Selection
//! is therefore held as logical keys (name strings), re-resolved by name
//! lookup after each replacement: the rebuilt lookup maps are the only way
//! from a name back to a live object.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::protocol::{CacheEntry, CodeModel, Configuration, Project, Target};

/// Persisted, logically-keyed selection state for one client instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionContext {
    #[serde(default)]
    pub current_project: String,
    #[serde(default = "default_build_type")]
    pub current_build_type: String,
    /// Last-selected target name per project name.
    #[serde(default)]
    pub project_targets: HashMap<String, String>,
}

fn default_build_type() -> String {
    "Debug".to_string()
}

impl Default for SelectionContext {
    fn default() -> Self {
        Self {
            current_project: String::new(),
            current_build_type: default_build_type(),
            project_targets: HashMap::new(),
        }
    }
}

/// External key-value storage for [`SelectionContext`] records, keyed by
/// client instance name. Read at construction, rewritten on every
/// selection change.
pub trait ContextStore: Send + Sync {
    fn load(&self, key: &str) -> Option<SelectionContext>;
    fn save(&self, key: &str, context: &SelectionContext);
}

/// In-memory store for tests and embedders with their own persistence.
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    entries: Mutex<HashMap<String, SelectionContext>>,
}

impl MemoryContextStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextStore for MemoryContextStore {
    fn load(&self, key: &str) -> Option<SelectionContext> {
        self.entries
            .lock()
            .map(|entries| entries.get(key).cloned())
            .unwrap_or_default()
    }

    fn save(&self, key: &str, context: &SelectionContext) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), context.clone());
        }
    }
}

/// File-backed store writing one JSON file per instance under a directory.
/// Load/save failures degrade to defaults; persistence is advisory.
#[derive(Debug)]
pub struct JsonFileStore {
    directory: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}-context.json"))
    }
}

impl ContextStore for JsonFileStore {
    fn load(&self, key: &str) -> Option<SelectionContext> {
        let bytes = std::fs::read(self.path_for(key)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn save(&self, key: &str, context: &SelectionContext) {
        let path = self.path_for(key);
        let write = std::fs::create_dir_all(&self.directory).and_then(|()| {
            let body = serde_json::to_vec_pretty(context)?;
            std::fs::write(&path, body)
        });
        if let Err(err) = write {
            tracing::debug!(path = %path.display(), error = %err, "failed to persist selection context");
        }
    }
}

/// The reconciled model: active configuration's projects, name-keyed
/// lookup maps, current selection, and the cache map.
#[derive(Debug, Default)]
pub struct ProjectModel {
    configurations: Vec<Configuration>,
    projects: Vec<Project>,
    /// Project name to its target names, rebuilt on every update.
    project_targets: HashMap<String, Vec<String>>,
    /// Target name to its owning project name.
    target_projects: HashMap<String, String>,
    cache: HashMap<String, CacheEntry>,
    context: SelectionContext,
}

impl ProjectModel {
    pub(crate) fn with_context(context: SelectionContext) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    /// Replace the model wholesale and re-resolve the selection by name.
    ///
    /// Steps, in order: pick the active configuration (prior build type if
    /// still present, else the first), replace the project list, rebuild
    /// both lookup maps, re-select project and target by prior name with
    /// first-entry fallback, replace the cache map. The caller fires the
    /// model-changed notification after this returns, never during.
    pub(crate) fn apply(&mut self, model: CodeModel, cache: Vec<CacheEntry>) {
        self.configurations = model.configurations;

        let active = self
            .configurations
            .iter()
            .position(|c| c.name == self.context.current_build_type)
            .unwrap_or(0);

        self.projects = self
            .configurations
            .get(active)
            .map(|c| c.projects.clone())
            .unwrap_or_default();

        // Single-config servers report an unnamed configuration; keep the
        // prior build type in that case rather than erasing it.
        if let Some(config) = self.configurations.get(active) {
            if !config.name.is_empty() {
                self.context.current_build_type = config.name.clone();
            }
        }

        self.project_targets.clear();
        self.target_projects.clear();
        for project in &self.projects {
            let names: Vec<String> = project.targets.iter().map(|t| t.name.clone()).collect();
            for name in &names {
                self.target_projects
                    .insert(name.clone(), project.name.clone());
            }
            self.project_targets.insert(project.name.clone(), names);
        }

        self.reselect_project();

        self.cache = cache
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect();
    }

    /// Re-resolve the current project by name, falling back to the first
    /// project, then re-resolve its target.
    fn reselect_project(&mut self) {
        let chosen = self
            .projects
            .iter()
            .find(|p| p.name == self.context.current_project)
            .or_else(|| self.projects.first())
            .map(|p| p.name.clone());

        match chosen {
            Some(name) => {
                self.context.current_project = name;
                self.reselect_target();
            }
            None => {
                self.context.current_project.clear();
            }
        }
    }

    /// Re-resolve the current project's target: prior name if still among
    /// its buildable targets, else the first buildable one, else none.
    fn reselect_target(&mut self) {
        let project = self.context.current_project.clone();
        let remembered = self.context.project_targets.get(&project).cloned();

        let buildable = self.project_build_targets();
        let chosen = remembered
            .as_deref()
            .and_then(|name| buildable.iter().find(|t| t.name == name).copied())
            .or_else(|| buildable.first().copied())
            .map(|t| t.name.clone());

        match chosen {
            Some(name) => {
                self.context.project_targets.insert(project, name);
            }
            None => {
                self.context.project_targets.remove(&project);
            }
        }
    }

    /// All configurations from the last update.
    #[must_use]
    pub fn configurations(&self) -> &[Configuration] {
        &self.configurations
    }

    /// Projects of the active configuration.
    #[must_use]
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// The currently selected project, resolved by name.
    #[must_use]
    pub fn project(&self) -> Option<&Project> {
        self.projects
            .iter()
            .find(|p| p.name == self.context.current_project)
    }

    /// All targets of the currently selected project.
    #[must_use]
    pub fn project_targets(&self) -> Vec<&Target> {
        self.project()
            .map(|p| p.targets.iter().collect())
            .unwrap_or_default()
    }

    /// Buildable targets of the currently selected project
    /// (interface-only targets excluded).
    #[must_use]
    pub fn project_build_targets(&self) -> Vec<&Target> {
        self.project()
            .map(|p| p.targets.iter().filter(|t| t.is_buildable()).collect())
            .unwrap_or_default()
    }

    /// All targets across the active configuration's projects.
    #[must_use]
    pub fn targets(&self) -> Vec<&Target> {
        self.projects.iter().flat_map(|p| &p.targets).collect()
    }

    /// The currently selected target, resolved by name. `None` when the
    /// selected project has no buildable targets.
    #[must_use]
    pub fn target(&self) -> Option<&Target> {
        let name = self
            .context
            .project_targets
            .get(&self.context.current_project)?;
        self.project()?.targets.iter().find(|t| &t.name == name)
    }

    #[must_use]
    pub fn build_type(&self) -> &str {
        &self.context.current_build_type
    }

    /// Select a project by name. Unknown names are ignored and the prior
    /// selection stands, so stale external references cannot corrupt the
    /// selection state.
    pub fn set_project(&mut self, name: &str) -> bool {
        if !self.project_targets.contains_key(name) {
            return false;
        }
        self.context.current_project = name.to_string();
        self.reselect_target();
        true
    }

    /// Select a target by name; the owning project is selected along with
    /// it. Unknown names are ignored.
    pub fn set_target(&mut self, name: &str) -> bool {
        let Some(project) = self.target_projects.get(name).cloned() else {
            return false;
        };
        self.context.current_project = project.clone();
        self.context.project_targets.insert(project, name.to_string());
        true
    }

    /// Set the active build type. Takes effect on the next configure (for
    /// single-config generators) or build (`--config`, multi-config).
    pub fn set_build_type(&mut self, build_type: &str) {
        self.context.current_build_type = build_type.to_string();
    }

    /// Cache entry by key from the last update.
    #[must_use]
    pub fn cache_value(&self, key: &str) -> Option<&CacheEntry> {
        self.cache.get(key)
    }

    /// All cache entries from the last update.
    #[must_use]
    pub fn cache(&self) -> &HashMap<String, CacheEntry> {
        &self.cache
    }

    pub(crate) fn context(&self) -> &SelectionContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, target_type: &str) -> Target {
        Target {
            name: name.to_string(),
            target_type: target_type.to_string(),
            full_name: None,
            source_directory: None,
            build_directory: None,
            artifacts: Vec::new(),
        }
    }

    fn project(name: &str, targets: Vec<Target>) -> Project {
        Project {
            name: name.to_string(),
            source_directory: None,
            build_directory: None,
            targets,
        }
    }

    fn model(configs: Vec<(&str, Vec<Project>)>) -> CodeModel {
        CodeModel {
            configurations: configs
                .into_iter()
                .map(|(name, projects)| Configuration {
                    name: name.to_string(),
                    projects,
                })
                .collect(),
        }
    }

    fn two_project_model() -> CodeModel {
        model(vec![(
            "Debug",
            vec![
                project(
                    "app",
                    vec![target("app", "EXECUTABLE"), target("applib", "STATIC_LIBRARY")],
                ),
                project(
                    "libs",
                    vec![
                        target("headers", "INTERFACE_LIBRARY"),
                        target("util", "SHARED_LIBRARY"),
                    ],
                ),
            ],
        )])
    }

    #[test]
    fn test_first_project_and_target_selected_by_default() {
        let mut pm = ProjectModel::default();
        pm.apply(two_project_model(), Vec::new());

        assert_eq!(pm.project().unwrap().name, "app");
        assert_eq!(pm.target().unwrap().name, "app");
    }

    #[test]
    fn test_selection_survives_model_replacement_by_name() {
        let mut pm = ProjectModel::default();
        pm.apply(two_project_model(), Vec::new());
        assert!(pm.set_target("util"));
        assert_eq!(pm.project().unwrap().name, "libs");

        // Regenerate: all objects are new, selection must re-resolve.
        pm.apply(two_project_model(), Vec::new());
        assert_eq!(pm.project().unwrap().name, "libs");
        assert_eq!(pm.target().unwrap().name, "util");
    }

    #[test]
    fn test_vanished_project_falls_back_to_first() {
        let mut pm = ProjectModel::default();
        pm.apply(two_project_model(), Vec::new());
        pm.set_project("libs");

        let smaller = model(vec![(
            "Debug",
            vec![project("app", vec![target("app", "EXECUTABLE")])],
        )]);
        pm.apply(smaller, Vec::new());
        assert_eq!(pm.project().unwrap().name, "app");
        assert_eq!(pm.target().unwrap().name, "app");
    }

    #[test]
    fn test_interface_only_target_never_selected() {
        let mut pm = ProjectModel::default();
        let m = model(vec![(
            "Debug",
            vec![project(
                "libs",
                vec![
                    target("headers", "INTERFACE_LIBRARY"),
                    target("util", "SHARED_LIBRARY"),
                ],
            )],
        )]);
        pm.apply(m, Vec::new());
        assert_eq!(pm.target().unwrap().name, "util");

        let names: Vec<&str> = pm
            .project_build_targets()
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, ["util"]);
        assert_eq!(pm.project_targets().len(), 2);
    }

    #[test]
    fn test_project_with_no_buildable_targets_is_legal() {
        let mut pm = ProjectModel::default();
        let m = model(vec![(
            "Debug",
            vec![project(
                "headers-only",
                vec![target("headers", "INTERFACE_LIBRARY")],
            )],
        )]);
        pm.apply(m, Vec::new());
        assert_eq!(pm.project().unwrap().name, "headers-only");
        assert!(pm.target().is_none());
    }

    #[test]
    fn test_prior_build_type_preferred_over_first_configuration() {
        let mut pm = ProjectModel::with_context(SelectionContext {
            current_build_type: "Release".to_string(),
            ..Default::default()
        });
        let m = model(vec![
            ("Debug", vec![project("app", vec![target("dbg", "EXECUTABLE")])]),
            (
                "Release",
                vec![project("app", vec![target("rel", "EXECUTABLE")])],
            ),
        ]);
        pm.apply(m, Vec::new());
        assert_eq!(pm.build_type(), "Release");
        assert_eq!(pm.target().unwrap().name, "rel");
    }

    #[test]
    fn test_unknown_build_type_falls_back_to_first_configuration() {
        let mut pm = ProjectModel::with_context(SelectionContext {
            current_build_type: "Profile".to_string(),
            ..Default::default()
        });
        let m = model(vec![
            ("Debug", vec![project("app", Vec::new())]),
            ("Release", vec![project("app", Vec::new())]),
        ]);
        pm.apply(m, Vec::new());
        assert_eq!(pm.build_type(), "Debug");
    }

    #[test]
    fn test_unnamed_configuration_keeps_prior_build_type() {
        let mut pm = ProjectModel::with_context(SelectionContext {
            current_build_type: "Release".to_string(),
            ..Default::default()
        });
        pm.apply(model(vec![("", vec![project("app", Vec::new())])]), Vec::new());
        assert_eq!(pm.build_type(), "Release");
    }

    #[test]
    fn test_set_project_unknown_name_keeps_selection() {
        let mut pm = ProjectModel::default();
        pm.apply(two_project_model(), Vec::new());

        assert!(!pm.set_project("ghost"));
        assert_eq!(pm.project().unwrap().name, "app");

        assert!(!pm.set_target("phantom"));
        assert_eq!(pm.target().unwrap().name, "app");
    }

    #[test]
    fn test_set_target_selects_owning_project() {
        let mut pm = ProjectModel::default();
        pm.apply(two_project_model(), Vec::new());

        assert!(pm.set_target("util"));
        assert_eq!(pm.project().unwrap().name, "libs");
        assert_eq!(pm.target().unwrap().name, "util");
    }

    #[test]
    fn test_remembered_target_per_project() {
        let mut pm = ProjectModel::default();
        pm.apply(two_project_model(), Vec::new());

        pm.set_project("app");
        pm.set_target("applib");
        pm.set_project("libs");
        assert_eq!(pm.target().unwrap().name, "util");

        // Coming back to "app" restores its last-selected target.
        pm.set_project("app");
        assert_eq!(pm.target().unwrap().name, "applib");
    }

    #[test]
    fn test_cache_replaced_wholesale() {
        let mut pm = ProjectModel::default();
        let entry = |key: &str, value: &str| CacheEntry {
            key: key.to_string(),
            value: value.to_string(),
            entry_type: "STRING".to_string(),
            properties: HashMap::new(),
        };

        pm.apply(two_project_model(), vec![entry("A", "1"), entry("B", "2")]);
        assert_eq!(pm.cache_value("A").unwrap().value, "1");

        pm.apply(two_project_model(), vec![entry("B", "3")]);
        assert!(pm.cache_value("A").is_none());
        assert_eq!(pm.cache_value("B").unwrap().value, "3");
        assert_eq!(pm.cache().len(), 1);
    }

    #[test]
    fn test_selection_context_roundtrip() {
        let mut context = SelectionContext::default();
        context.current_project = "app".to_string();
        context
            .project_targets
            .insert("app".to_string(), "applib".to_string());

        let json = serde_json::to_string(&context).unwrap();
        let back: SelectionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.current_project, "app");
        assert_eq!(back.current_build_type, "Debug");
        assert_eq!(back.project_targets["app"], "applib");
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryContextStore::new();
        assert!(store.load("proj").is_none());

        let mut context = SelectionContext::default();
        context.current_project = "app".to_string();
        store.save("proj", &context);
        assert_eq!(store.load("proj").unwrap().current_project, "app");
    }

    #[test]
    fn test_json_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("proj").is_none());

        let mut context = SelectionContext::default();
        context.current_build_type = "Release".to_string();
        store.save("proj", &context);
        assert_eq!(store.load("proj").unwrap().current_build_type, "Release");
    }
}
