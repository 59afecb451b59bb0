//! The analyzer action and runner (spec C6): builds the per-package
//! analyzer DAG, exposes the fact and result APIs to each analyzer via
//! [`Pass`], and drives the DAG with the generic scheduler.

use crate::external::{Analyzer, Diagnostic};
use crate::facts::{FactStore, IngestedFacts, ObjectFactKey, Payload, PackageFactKey};
use crate::gate::Gate;
use crate::graph::{Action, ActionCore};
use crate::scheduler::{self, PermitMode};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct AnalyzerAction {
    core: ActionCore<AnalyzerAction>,
    analyzer: Arc<dyn Analyzer>,
    package_path: String,
    facts_only: bool,
    package_data: Arc<dyn Any + Send + Sync>,
    imported: Arc<IngestedFacts>,
    result: Mutex<Option<Payload>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
    own_object_facts: Mutex<HashMap<ObjectFactKey, Payload>>,
    own_package_facts: Mutex<HashMap<PackageFactKey, Payload>>,
    duration: Mutex<Option<Duration>>,
}

impl AnalyzerAction {
    fn new(
        analyzer: Arc<dyn Analyzer>,
        deps: Vec<Arc<AnalyzerAction>>,
        facts_only: bool,
        package_path: String,
        package_data: Arc<dyn Any + Send + Sync>,
        imported: Arc<IngestedFacts>,
    ) -> Self {
        AnalyzerAction {
            core: ActionCore::new(deps),
            analyzer,
            package_path,
            facts_only,
            package_data,
            imported,
            result: Mutex::new(None),
            diagnostics: Mutex::new(Vec::new()),
            own_object_facts: Mutex::new(HashMap::new()),
            own_package_facts: Mutex::new(HashMap::new()),
            duration: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.analyzer.name()
    }

    /// Spec.md §4.5's "one analyzer the core must accommodate by name
    /// until a general mechanism exists" — kept as the single narrow
    /// special case design note §9 asks for.
    pub fn is_unused(&self) -> bool {
        self.analyzer.name() == "unused"
    }

    pub fn result(&self) -> Option<Payload> {
        self.result.lock().unwrap().clone()
    }

    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.lock().unwrap())
    }

    pub fn exported_facts(&self) -> FactStore {
        FactStore {
            object_facts: self.own_object_facts.lock().unwrap().clone(),
            package_facts: self.own_package_facts.lock().unwrap().clone(),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        *self.duration.lock().unwrap()
    }
}

impl Action for AnalyzerAction {
    fn core(&self) -> &ActionCore<AnalyzerAction> {
        &self.core
    }

    fn exec(&self) -> anyhow::Result<()> {
        let pass = Pass { action: self };
        let start = std::time::Instant::now();
        let result = self.analyzer.run(&pass).map_err(|source| crate::error::RunnerError::Analyzer {
            package: self.package_path.clone(),
            analyzer: self.analyzer.name().to_string(),
            source,
        })?;
        let elapsed = start.elapsed();
        log::trace!("analyzer `{}` on `{}` took {:?}", self.analyzer.name(), self.package_path, elapsed);
        *self.duration.lock().unwrap() = Some(elapsed);
        *self.result.lock().unwrap() = Some(result);
        Ok(())
    }
}

/// The per-(package, analyzer) context handed to `Analyzer::run` (spec.md
/// §4.5). Within one analyzer, `report`/`export_*`/`import_*` are
/// serialized by construction — the analyzer runs on a single worker.
pub struct Pass<'a> {
    action: &'a AnalyzerAction,
}

impl<'a> Pass<'a> {
    /// Read-only package shape (syntax, type info, file set — opaque to
    /// the core, interpreted only by the Analyzer and Loader).
    pub fn package_data(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.action.package_data
    }

    pub fn package_path(&self) -> &str {
        &self.action.package_path
    }

    /// Appended only when `!factsOnly`; an uncategorized diagnostic is
    /// stamped with the analyzer's own name.
    pub fn report(&self, mut diag: Diagnostic) {
        if self.action.facts_only {
            return;
        }
        if diag.category.is_empty() {
            diag.category = self.action.analyzer.name().to_string();
        }
        self.action.diagnostics.lock().unwrap().push(diag);
    }

    /// The opaque result of a direct `Requires` dependency analyzer run
    /// earlier in this same package's analyzer DAG.
    pub fn result_of(&self, dep_analyzer: &str) -> Option<Payload> {
        self.action
            .core
            .deps
            .iter()
            .find(|d| d.name() == dep_analyzer)
            .and_then(|d| d.result())
    }

    /// Lookup order: this analyzer's own exports first, then facts
    /// imported from dependency packages.
    pub fn import_object_fact(&self, package_path: &str, object_path: &str, fact_type: &str) -> Option<Payload> {
        let key = ObjectFactKey {
            package_path: package_path.to_string(),
            object_path: object_path.to_string(),
            fact_type: fact_type.to_string(),
        };
        if let Some(v) = self.action.own_object_facts.lock().unwrap().get(&key) {
            return Some(Arc::clone(v));
        }
        self.action.imported.object_facts.get(&key).cloned()
    }

    pub fn import_package_fact(&self, package_path: &str, fact_type: &str) -> Option<Payload> {
        let key = PackageFactKey {
            package_path: package_path.to_string(),
            fact_type: fact_type.to_string(),
        };
        if let Some(v) = self.action.own_package_facts.lock().unwrap().get(&key) {
            return Some(Arc::clone(v));
        }
        self.action.imported.package_facts.get(&key).cloned()
    }

    /// Stored into this analyzer's own object-fact map, about an object in
    /// the current package.
    pub fn export_object_fact(&self, object_path: &str, fact_type: &str, fact: Payload) {
        let key = ObjectFactKey {
            package_path: self.action.package_path.clone(),
            object_path: object_path.to_string(),
            fact_type: fact_type.to_string(),
        };
        self.action.own_object_facts.lock().unwrap().insert(key, fact);
    }

    /// Exporting facts about other packages is disallowed by this
    /// signature: the key is always this Pass's own package.
    pub fn export_package_fact(&self, fact_type: &str, fact: Payload) {
        let key = PackageFactKey {
            package_path: self.action.package_path.clone(),
            fact_type: fact_type.to_string(),
        };
        self.action.own_package_facts.lock().unwrap().insert(key, fact);
    }

    /// Union of imported + own, filtered by this analyzer's declared
    /// fact-types.
    pub fn all_object_facts(&self) -> HashMap<ObjectFactKey, Payload> {
        let allowed: HashSet<&str> = self.action.analyzer.fact_types().iter().copied().collect();
        let mut out: HashMap<ObjectFactKey, Payload> = self
            .action
            .imported
            .object_facts
            .iter()
            .filter(|(k, _)| allowed.contains(k.fact_type.as_str()))
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        for (k, v) in self.action.own_object_facts.lock().unwrap().iter() {
            if allowed.contains(k.fact_type.as_str()) {
                out.insert(k.clone(), Arc::clone(v));
            }
        }
        out
    }

    /// Union of imported + own, unfiltered.
    pub fn all_package_facts(&self) -> HashMap<PackageFactKey, Payload> {
        let mut out = self.action.imported.package_facts.clone();
        for (k, v) in self.action.own_package_facts.lock().unwrap().iter() {
            out.insert(k.clone(), Arc::clone(v));
        }
        out
    }
}

/// Builds the retained analyzer DAG for one package run (spec.md §4.5
/// "Analyzer DAG construction"). `catalog` is the full, Requires-closed
/// analyzer set for the whole run (spec.md §4.6 step 1) — Requires edges
/// may reach analyzers the `factsOnly` filter itself would have dropped,
/// since a dependency may be needed only for its opaque `result`, not its
/// facts.
fn build_dag(
    catalog: &HashMap<&'static str, Arc<dyn Analyzer>>,
    facts_only: bool,
    package_path: &str,
    package_data: &Arc<dyn Any + Send + Sync>,
    imported: &Arc<IngestedFacts>,
) -> Vec<Arc<AnalyzerAction>> {
    let mut built: HashMap<&'static str, Arc<AnalyzerAction>> = HashMap::new();

    fn build_one(
        name: &'static str,
        catalog: &HashMap<&'static str, Arc<dyn Analyzer>>,
        built: &mut HashMap<&'static str, Arc<AnalyzerAction>>,
        facts_only: bool,
        package_path: &str,
        package_data: &Arc<dyn Any + Send + Sync>,
        imported: &Arc<IngestedFacts>,
    ) -> Arc<AnalyzerAction> {
        if let Some(existing) = built.get(name) {
            return Arc::clone(existing);
        }
        let analyzer = Arc::clone(
            catalog
                .get(name)
                .unwrap_or_else(|| panic!("analyzer `{}` named in Requires but not in the run's catalog", name)),
        );
        let deps: Vec<_> = analyzer
            .requires()
            .iter()
            .map(|dep_name| build_one(*dep_name, catalog, built, facts_only, package_path, package_data, imported))
            .collect();
        let node = Arc::new(AnalyzerAction::new(
            analyzer,
            deps,
            facts_only,
            package_path.to_string(),
            Arc::clone(package_data),
            Arc::clone(imported),
        ));
        built.insert(name, Arc::clone(&node));
        node
    }

    // When `factsOnly`, drop analyzers that declare no fact-types — they
    // can only produce diagnostics, which are discarded for dependencies.
    let retained: Vec<&'static str> = catalog
        .values()
        .filter(|a| !facts_only || !a.fact_types().is_empty())
        .map(|a| a.name())
        .collect();

    retained
        .into_iter()
        .map(|name| build_one(name, catalog, &mut built, facts_only, package_path, package_data, imported))
        .collect()
}

pub struct AnalyzerRunResult {
    pub diagnostics: Vec<Diagnostic>,
    pub facts: FactStore,
    pub unused_result: Option<Payload>,
    pub failed: bool,
    pub errors: Vec<String>,
}

/// Runs the analyzer DAG for one package (spec.md §4.5 "Execution"), with
/// the inner, non-blocking permit discipline described in spec.md §5.
pub fn run_dag(
    gate: &Gate,
    catalog: &HashMap<&'static str, Arc<dyn Analyzer>>,
    facts_only: bool,
    package_path: &str,
    package_data: Arc<dyn Any + Send + Sync>,
    imported: Arc<IngestedFacts>,
) -> AnalyzerRunResult {
    let roots = build_dag(catalog, facts_only, package_path, &package_data, &imported);
    let all = scheduler::run(gate, &roots, PermitMode::NonBlockingInline);

    let mut diagnostics = Vec::new();
    let mut facts = FactStore::default();
    let mut unused_result = None;
    let mut failed = false;
    let mut errors = Vec::new();

    for action in &all {
        if action.core().is_failed() {
            failed = true;
            errors.extend(action.core().errors());
            continue;
        }
        diagnostics.extend(action.take_diagnostics());
        facts.merge(action.exported_facts());
        if action.is_unused() {
            unused_result = action.result();
        }
    }

    AnalyzerRunResult {
        diagnostics,
        facts,
        unused_result,
        failed,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactRegistry;

    struct Exporter;
    impl Analyzer for Exporter {
        fn name(&self) -> &'static str {
            "exporter"
        }
        fn requires(&self) -> &'static [&'static str] {
            &[]
        }
        fn fact_types(&self) -> &'static [&'static str] {
            &["demo::fact"]
        }
        fn register_facts(&self, _registry: &FactRegistry) {}
        fn run(&self, pass: &Pass<'_>) -> anyhow::Result<Payload> {
            pass.export_package_fact("demo::fact", Arc::new(42u32));
            Ok(Arc::new(()))
        }
    }

    struct Consumer;
    impl Analyzer for Consumer {
        fn name(&self) -> &'static str {
            "consumer"
        }
        fn requires(&self) -> &'static [&'static str] {
            &["exporter"]
        }
        fn fact_types(&self) -> &'static [&'static str] {
            &[]
        }
        fn register_facts(&self, _registry: &FactRegistry) {}
        fn run(&self, pass: &Pass<'_>) -> anyhow::Result<Payload> {
            let _ = pass.result_of("exporter");
            Ok(Arc::new(()))
        }
    }

    #[test]
    fn facts_only_drops_analyzers_without_fact_types() {
        let mut catalog: HashMap<&'static str, Arc<dyn Analyzer>> = HashMap::new();
        catalog.insert("exporter", Arc::new(Exporter));
        catalog.insert("consumer", Arc::new(Consumer));

        let gate = Gate::new(2);
        let result = run_dag(&gate, &catalog, true, "pkg/a", Arc::new(()), Arc::new(IngestedFacts::default()));
        assert!(!result.failed);
        assert_eq!(result.facts.package_facts.len(), 1, "exporter still runs for its facts");
    }

    #[test]
    fn requires_edge_runs_dependency_first() {
        let mut catalog: HashMap<&'static str, Arc<dyn Analyzer>> = HashMap::new();
        catalog.insert("exporter", Arc::new(Exporter));
        catalog.insert("consumer", Arc::new(Consumer));

        let gate = Gate::new(2);
        let result = run_dag(&gate, &catalog, false, "pkg/a", Arc::new(()), Arc::new(IngestedFacts::default()));
        assert!(!result.failed);
    }
}
