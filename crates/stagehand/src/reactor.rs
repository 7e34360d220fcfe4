//! Reactor queries.
//!
//! A [`BuildReactor`] is the ordered, read-only list of modules
//! participating in one multi-module build, ordered by inter-module
//! dependency order (not declaration order). The sequencer gates its
//! once-per-reactor actions on the pure first/last queries here, so they
//! are unit-testable without any real build-tool session.

use std::path::{Path, PathBuf};

/// Group + artifact identity of a build plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginIdent {
    pub group_id: String,
    pub artifact_id: String,
}

impl PluginIdent {
    pub fn new(group_id: &str, artifact_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
        }
    }
}

/// One execution block of a declared plugin, carrying its bound goals.
#[derive(Debug, Clone, Default)]
pub struct PluginExecution {
    pub goals: Vec<String>,
}

/// A plugin declared in a module's build configuration.
#[derive(Debug, Clone)]
pub struct DeclaredPlugin {
    pub ident: PluginIdent,
    pub executions: Vec<PluginExecution>,
}

/// One module of the reactor.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub base_dir: PathBuf,
    pub plugins: Vec<DeclaredPlugin>,
}

impl Module {
    /// Whether this module declares `ident`, and — when `goal` is given —
    /// whether any of that plugin's executions binds the goal.
    pub fn has_plugin(&self, ident: &PluginIdent, goal: Option<&str>) -> bool {
        self.plugins.iter().any(|p| {
            if p.ident != *ident {
                return false;
            }
            match goal {
                None => true,
                Some(goal) => p
                    .executions
                    .iter()
                    .any(|e| e.goals.iter().any(|g| g == goal)),
            }
        })
    }
}

/// Ordered module list plus the directory the build was invoked from.
#[derive(Debug, Clone)]
pub struct BuildReactor {
    modules: Vec<Module>,
    execution_root: PathBuf,
}

impl BuildReactor {
    pub fn new(modules: Vec<Module>, execution_root: PathBuf) -> Self {
        Self {
            modules,
            execution_root,
        }
    }

    /// A reactor holding just the module the goal was invoked against,
    /// for direct CLI invocations with no phase-bound execution.
    pub fn single(module: Module) -> Self {
        let root = module.base_dir.clone();
        Self::new(vec![module], root)
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Whether `module` is the directory the build was invoked from.
    pub fn is_execution_root(&self, module: &Module) -> bool {
        same_dir(&module.base_dir, &self.execution_root)
    }

    /// First module, in reactor order, declaring `ident` (with `goal` bound
    /// when given). `None` when no module declares it — gated actions must
    /// then not run anywhere, rather than erroring.
    pub fn first_with_plugin(&self, ident: &PluginIdent, goal: Option<&str>) -> Option<&Module> {
        self.modules.iter().find(|m| m.has_plugin(ident, goal))
    }

    /// Last such module, scanning the reactor in reverse.
    pub fn last_with_plugin(&self, ident: &PluginIdent, goal: Option<&str>) -> Option<&Module> {
        self.modules.iter().rev().find(|m| m.has_plugin(ident, goal))
    }

    pub fn is_first_with_plugin(
        &self,
        current: &Module,
        ident: &PluginIdent,
        goal: Option<&str>,
    ) -> bool {
        self.first_with_plugin(ident, goal)
            .is_some_and(|m| same_dir(&m.base_dir, &current.base_dir))
    }

    /// Whether `current` is the last module with the plugin — or, when the
    /// goal was invoked directly from the command line (`direct = true`),
    /// simply the last module of the whole reactor, since there is no
    /// phase-bound execution to search for.
    pub fn is_last_with_plugin(
        &self,
        current: &Module,
        ident: &PluginIdent,
        goal: Option<&str>,
        direct: bool,
    ) -> bool {
        if direct {
            return self
                .modules
                .last()
                .is_some_and(|m| same_dir(&m.base_dir, &current.base_dir));
        }
        self.last_with_plugin(ident, goal)
            .is_some_and(|m| same_dir(&m.base_dir, &current.base_dir))
    }
}

/// Case-insensitive path comparison, as build tools report the execution
/// root with unpredictable casing on some platforms.
fn same_dir(a: &Path, b: &Path) -> bool {
    a.to_string_lossy()
        .eq_ignore_ascii_case(&b.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident() -> PluginIdent {
        PluginIdent::new("org.example", "stagehand-plugin")
    }

    fn module(name: &str, plugins: Vec<DeclaredPlugin>) -> Module {
        Module {
            name: name.to_string(),
            base_dir: PathBuf::from(format!("/build/{name}")),
            plugins,
        }
    }

    fn with_goal(goal: &str) -> Vec<DeclaredPlugin> {
        vec![DeclaredPlugin {
            ident: ident(),
            executions: vec![PluginExecution {
                goals: vec![goal.to_string()],
            }],
        }]
    }

    #[test]
    fn execution_root_comparison_is_case_insensitive() {
        let m = module("root", vec![]);
        let reactor = BuildReactor::new(vec![m.clone()], PathBuf::from("/BUILD/ROOT"));
        assert!(reactor.is_execution_root(&m));
    }

    #[test]
    fn first_and_last_scan_in_reactor_order() {
        let reactor = BuildReactor::new(
            vec![
                module("a", vec![]),
                module("b", with_goal("close")),
                module("c", with_goal("close")),
                module("d", vec![]),
            ],
            PathBuf::from("/build/a"),
        );
        let first = reactor.first_with_plugin(&ident(), None).expect("first");
        assert_eq!(first.name, "b");
        let last = reactor.last_with_plugin(&ident(), None).expect("last");
        assert_eq!(last.name, "c");
    }

    #[test]
    fn goal_filter_requires_a_bound_execution() {
        let reactor = BuildReactor::new(
            vec![
                module("a", with_goal("deploy")),
                module("b", with_goal("close")),
            ],
            PathBuf::from("/build/a"),
        );
        let first = reactor
            .first_with_plugin(&ident(), Some("close"))
            .expect("first");
        assert_eq!(first.name, "b");
        assert!(reactor.first_with_plugin(&ident(), Some("promote")).is_none());
    }

    #[test]
    fn no_module_with_plugin_means_no_gate_fires() {
        let mods = vec![module("a", vec![]), module("b", vec![])];
        let reactor = BuildReactor::new(mods.clone(), PathBuf::from("/build/a"));
        assert!(reactor.first_with_plugin(&ident(), None).is_none());
        assert!(reactor.last_with_plugin(&ident(), None).is_none());
        for m in &mods {
            assert!(!reactor.is_first_with_plugin(m, &ident(), None));
            assert!(!reactor.is_last_with_plugin(m, &ident(), None, false));
        }
    }

    #[test]
    fn only_the_declaring_module_answers_first_and_last() {
        // Two-module reactor where only module 2 binds the close goal.
        let m1 = module("one", vec![]);
        let m2 = module("two", with_goal("close"));
        let reactor = BuildReactor::new(vec![m1.clone(), m2.clone()], PathBuf::from("/build/one"));

        assert!(!reactor.is_first_with_plugin(&m1, &ident(), Some("close")));
        assert!(!reactor.is_last_with_plugin(&m1, &ident(), Some("close"), false));
        assert!(reactor.is_first_with_plugin(&m2, &ident(), Some("close")));
        assert!(reactor.is_last_with_plugin(&m2, &ident(), Some("close"), false));
    }

    #[test]
    fn direct_invocation_degenerates_to_last_reactor_module() {
        let m1 = module("one", with_goal("close"));
        let m2 = module("two", vec![]);
        let reactor = BuildReactor::new(vec![m1.clone(), m2.clone()], PathBuf::from("/build/one"));

        // Phase-bound: m1 is last-with-plugin.
        assert!(reactor.is_last_with_plugin(&m1, &ident(), None, false));
        // Direct CLI: only the reactor's last module qualifies.
        assert!(!reactor.is_last_with_plugin(&m1, &ident(), None, true));
        assert!(reactor.is_last_with_plugin(&m2, &ident(), None, true));
    }

    #[test]
    fn single_module_reactor_is_its_own_root_first_and_last() {
        let m = module("solo", with_goal("close"));
        let reactor = BuildReactor::single(m.clone());
        assert!(reactor.is_execution_root(&m));
        assert!(reactor.is_first_with_plugin(&m, &ident(), None));
        assert!(reactor.is_last_with_plugin(&m, &ident(), None, true));
    }
}
