//! The runner façade (spec C8): expands the analyzer closure, builds the
//! package action graph, drives it with the generic scheduler, and
//! assembles [`Result_`] records (spec.md §4.6).

use crate::cache::Cache;
use crate::config::Config;
use crate::error::RunnerError;
use crate::external::{Analyzer, DirectiveParser, Loader, PackageSpec};
use crate::facts::FactRegistry;
use crate::gate::Gate;
use crate::graph::Action;
use crate::package_action::{self, PackageAction, Services, UnusedSerializer};
use crate::result::Result_;
use crate::scheduler::{self, PermitMode};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// The entry point. One `Runner` owns the process-wide concurrency gate
/// (spec.md §5: "the concurrency gate is shared across multiple `run`
/// invocations on the same runner") and can drive many `run` calls
/// concurrently, bounded by the same permit budget.
pub struct Runner {
    gate: Arc<Gate>,
}

impl Runner {
    pub fn new() -> Self {
        Runner { gate: Arc::new(Gate::for_host()) }
    }

    pub fn with_gate(gate: Arc<Gate>) -> Self {
        Runner { gate }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run<L: Loader + 'static>(
        &self,
        loader: Arc<L>,
        loader_config: &Config,
        analyzers: Vec<Arc<dyn Analyzer>>,
        directive_parser: Arc<dyn DirectiveParser>,
        cache_root: impl Into<PathBuf>,
        salt: impl Into<String>,
        language_version: impl Into<String>,
        patterns: &[String],
        unused_serializer: Option<Arc<UnusedSerializer>>,
    ) -> Result<Vec<Result_<L::Package>>, RunnerError> {
        let catalog = close_under_requires(&analyzers).map_err(RunnerError::AnalyzerSetup)?;

        // Register every analyzer's fact-types exactly once per run,
        // before any action executes (design note §9, "Global state").
        let registry = Arc::new(FactRegistry::new());
        for analyzer in catalog.values() {
            analyzer.register_facts(&registry);
        }

        let cache = Arc::new(Cache::new(cache_root).map_err(RunnerError::CacheInit)?);

        let packages = loader
            .graph(loader_config, patterns)
            .map_err(RunnerError::Loader)?;

        let services = Arc::new(Services {
            cache,
            loader,
            directive_parser,
            catalog: Arc::new(catalog),
            registry,
            gate: Arc::clone(&self.gate),
            salt: salt.into(),
            language_version: language_version.into(),
            unused_serializer,
        });

        let roots = package_action::build_graph(&services, &packages);
        let all = scheduler::run(&self.gate, &roots, PermitMode::Blocking);

        Ok(all.iter().map(to_result).collect())
    }
}

impl Default for Runner {
    fn default() -> Self {
        Runner::new()
    }
}

fn to_result<L: Loader + 'static>(action: &Arc<PackageAction<L>>) -> Result_<L::Package> {
    Result_::new(
        Arc::clone(action.package()),
        action.config().clone(),
        action.core().is_failed(),
        action.core().errors(),
        action.directives_path(),
        action.diagnostics_path(),
        action.unused_path(),
    )
}

/// Closes the supplied analyzer set under the `Requires` relation
/// (spec.md §4.6 step 1) and validates it against cycles (design note
/// §9: "Implementations may detect and refuse cycles defensively").
fn close_under_requires(analyzers: &[Arc<dyn Analyzer>]) -> anyhow::Result<HashMap<&'static str, Arc<dyn Analyzer>>> {
    let by_name: HashMap<&'static str, Arc<dyn Analyzer>> = analyzers.iter().map(|a| (a.name(), Arc::clone(a))).collect();

    for analyzer in by_name.values() {
        for required in analyzer.requires() {
            if !by_name.contains_key(required) {
                anyhow::bail!("analyzer `{}` requires unknown analyzer `{}`", analyzer.name(), required);
            }
        }
    }

    for name in by_name.keys() {
        let mut visiting = HashSet::new();
        check_acyclic(*name, &by_name, &mut visiting)?;
    }

    Ok(by_name)
}

fn check_acyclic(
    name: &'static str,
    by_name: &HashMap<&'static str, Arc<dyn Analyzer>>,
    visiting: &mut HashSet<&'static str>,
) -> anyhow::Result<()> {
    if !visiting.insert(name) {
        anyhow::bail!("cyclic Requires relation through analyzer `{}`", name);
    }
    if let Some(analyzer) = by_name.get(name) {
        for required in analyzer.requires() {
            check_acyclic(*required, by_name, visiting)?;
        }
    }
    visiting.remove(name);
    Ok(())
}
