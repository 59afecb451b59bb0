//! The package action (spec C5): computes the cache key for one package,
//! hits the cache or runs the uncached path (Loader → DirectiveParser →
//! analyzer DAG → serialize), and records the resulting artifact paths.

use crate::analyzer::{self, AnalyzerRunResult};
use crate::cache::{Cache, Kind};
use crate::config::Config;
use crate::external::{Analyzer, Diagnostic, Directive, DirectiveParser, Loader, PackageSpec};
use crate::facts::{self, FactRegistry, FactStore, Payload};
use crate::gate::Gate;
use crate::graph::{Action, ActionCore};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Serializes the one analyzer the core knows by name (spec.md §4.5
/// "Special case" and design note §9): kept as a single narrow hook
/// rather than a general post-processing mechanism.
pub struct UnusedSerializer(pub Box<dyn Fn(&Payload) -> anyhow::Result<Vec<u8>> + Send + Sync>);

/// Shared, run-wide collaborators every `PackageAction` needs. One
/// `Services<L>` is built per `Runner::run` invocation and held by every
/// node built under it.
pub struct Services<L: Loader> {
    pub cache: Arc<Cache>,
    pub loader: Arc<L>,
    pub directive_parser: Arc<dyn DirectiveParser>,
    pub catalog: Arc<HashMap<&'static str, Arc<dyn Analyzer>>>,
    pub registry: Arc<FactRegistry>,
    pub gate: Arc<Gate>,
    pub salt: String,
    pub language_version: String,
    pub unused_serializer: Option<Arc<UnusedSerializer>>,
}

pub struct PackageAction<L: Loader> {
    core: ActionCore<PackageAction<L>>,
    services: Arc<Services<L>>,
    package: Arc<L::Package>,
    facts_only: bool,
    cfg: Config,
    vetx: Mutex<Option<PathBuf>>,
    directives: Mutex<Option<PathBuf>>,
    diagnostics: Mutex<Option<PathBuf>>,
    unused: Mutex<Option<PathBuf>>,
}

impl<L: Loader + 'static> PackageAction<L> {
    fn new(services: Arc<Services<L>>, package: Arc<L::Package>, facts_only: bool, cfg: Config, deps: Vec<Arc<PackageAction<L>>>) -> Self {
        PackageAction {
            core: ActionCore::new(deps),
            services,
            package,
            facts_only,
            cfg,
            vetx: Mutex::new(None),
            directives: Mutex::new(None),
            diagnostics: Mutex::new(None),
            unused: Mutex::new(None),
        }
    }

    pub fn package(&self) -> &Arc<L::Package> {
        &self.package
    }

    pub fn facts_only(&self) -> bool {
        self.facts_only
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn vetx_path(&self) -> Option<PathBuf> {
        self.vetx.lock().unwrap().clone()
    }

    pub fn directives_path(&self) -> Option<PathBuf> {
        self.directives.lock().unwrap().clone()
    }

    pub fn diagnostics_path(&self) -> Option<PathBuf> {
        self.diagnostics.lock().unwrap().clone()
    }

    pub fn unused_path(&self) -> Option<PathBuf> {
        self.unused.lock().unwrap().clone()
    }

    /// Cache-key composition (spec.md §4.4): tool salt, config (minus
    /// Checks), package content hash, sorted analyzer names, language
    /// version, then each pre-sorted dep's `vetx` **file hash** (not its
    /// own ActionID — so a dep's cache hit still folds in its real bytes).
    fn compute_hash(&self) -> anyhow::Result<crate::cache::ActionId> {
        let mut analyzer_names: Vec<&str> = self.services.catalog.keys().copied().collect();
        analyzer_names.sort_unstable();

        let mut hasher = self.services.cache.new_hash(&self.services.salt);
        hasher.update(&format!("cfg {}", self.cfg.stable_pretty_print()));
        hasher.update(&format!("pkg {}", self.package.content_hash().to_hex()));
        hasher.update(&format!("analyzers {}", analyzer_names.join(",")));
        hasher.update(&format!("version {}", self.services.language_version));

        for dep in &self.core.deps {
            let dep_vetx = dep
                .vetx_path()
                .expect("a completed, non-failed dependency always has a vetx path");
            let digest = self.services.cache.file_hash(&dep_vetx)?;
            hasher.update(&format!("vetout \"{}\" {}", dep.package.path(), digest.to_hex()));
        }

        Ok(hasher.finish())
    }

    fn transitive_import_closure(&self) -> HashSet<String> {
        fn walk<P: PackageSpec>(pkg: &Arc<P>, closure: &mut HashSet<String>) {
            if !closure.insert(pkg.path().to_string()) {
                return;
            }
            for imp in pkg.imports() {
                walk(imp, closure);
            }
        }
        let mut closure = HashSet::new();
        walk(&self.package, &mut closure);
        closure
    }

    /// Every package transitively reachable through `deps`, not only the
    /// direct ones: spec.md §4.7's ingestion closure is over the whole
    /// transitive import graph, so a grandchild's facts must be read from
    /// its own `vetx` directly rather than relayed through an intermediate
    /// package's artifact.
    fn transitive_dep_actions(&self) -> Vec<Arc<PackageAction<L>>> {
        fn walk<L: Loader + 'static>(node: &PackageAction<L>, seen: &mut HashSet<String>, out: &mut Vec<Arc<PackageAction<L>>>) {
            for dep in &node.core.deps {
                if seen.insert(dep.package.id().to_string()) {
                    out.push(Arc::clone(dep));
                    walk(dep, seen, out);
                }
            }
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        walk(self, &mut seen, &mut out);
        out
    }

    fn ingest_dependency_facts(&self) -> anyhow::Result<facts::IngestedFacts> {
        let closure = self.transitive_import_closure();
        let mut merged = facts::IngestedFacts::default();
        for dep in self.transitive_dep_actions() {
            let dep_vetx = dep
                .vetx_path()
                .expect("a completed, non-failed dependency always has a vetx path");
            let bytes = std::fs::read(&dep_vetx)?;
            // The real implementation resolves a serialized object path
            // against the dependency package's live type information via
            // the Loader; the core has no such resolver of its own, so it
            // treats every serialized object path as already resolved.
            let ingested = facts::ingest(&self.services.registry, &bytes, &closure, |_pkg, obj| Some(obj.to_string()))?;
            merged.object_facts.extend(ingested.object_facts);
            merged.package_facts.extend(ingested.package_facts);
        }
        Ok(merged)
    }

    fn run_uncached(&self) -> anyhow::Result<()> {
        let loaded = self.services.loader.load(&self.package)?;
        if !loaded.errors.is_empty() {
            self.core.mark_failed(Some(format!("package load errors: {}", loaded.errors.join("; "))));
            return Ok(());
        }

        let directives = self.services.directive_parser.parse(&loaded)?;
        let imported = Arc::new(self.ingest_dependency_facts()?);

        let analyzer::AnalyzerRunResult {
            diagnostics,
            facts: exported,
            unused_result,
            failed,
            errors,
        }: AnalyzerRunResult = analyzer::run_dag(
            &self.services.gate,
            &self.services.catalog,
            self.facts_only,
            self.package.path(),
            Arc::clone(&loaded.data),
            imported,
        );

        if failed {
            self.core.mark_failed(errors.into_iter().next());
            return Ok(());
        }

        self.write_artifacts(&exported, &diagnostics, &directives, unused_result.as_ref())?;
        Ok(())
    }

    fn write_artifacts(
        &self,
        exported: &FactStore,
        diagnostics: &[Diagnostic],
        directives: &[Directive],
        unused_result: Option<&Payload>,
    ) -> anyhow::Result<()> {
        let hash = self.compute_hash()?;
        let cache = &self.services.cache;

        let vetx_key = cache.subkey(hash, Kind::Vetx);
        let vetx_bytes = facts::encode(&self.services.registry, exported)?;
        cache.put_bytes(vetx_key, &vetx_bytes)?;
        *self.vetx.lock().unwrap() = cache.get_file(vetx_key).map(|(p, _)| p);

        if !self.facts_only {
            let directives_key = cache.subkey(hash, Kind::Directives);
            let directives_bytes = bincode::serialize(directives).map_err(|e| crate::error::RunnerError::Codec(e.into()))?;
            cache.put_bytes(directives_key, &directives_bytes)?;
            *self.directives.lock().unwrap() = cache.get_file(directives_key).map(|(p, _)| p);

            let diagnostics_key = cache.subkey(hash, Kind::Diagnostics);
            let diagnostics_bytes = bincode::serialize(diagnostics).map_err(|e| crate::error::RunnerError::Codec(e.into()))?;
            cache.put_bytes(diagnostics_key, &diagnostics_bytes)?;
            *self.diagnostics.lock().unwrap() = cache.get_file(diagnostics_key).map(|(p, _)| p);

            let unused_bytes = match (unused_result, &self.services.unused_serializer) {
                (Some(result), Some(serializer)) => (serializer.0)(result)?,
                (Some(_), None) => {
                    log::warn!("`unused` analyzer ran but no UnusedSerializer was configured; writing an empty result");
                    Vec::new()
                }
                (None, _) => Vec::new(),
            };
            let unused_key = cache.subkey(hash, Kind::Unused);
            cache.put_bytes(unused_key, &unused_bytes)?;
            *self.unused.lock().unwrap() = cache.get_file(unused_key).map(|(p, _)| p);
        }

        Ok(())
    }
}

impl<L: Loader + 'static> Action for PackageAction<L> {
    fn core(&self) -> &ActionCore<PackageAction<L>> {
        &self.core
    }

    fn exec(&self) -> anyhow::Result<()> {
        let hash = self.compute_hash()?;
        let cache = &self.services.cache;

        let vetx_key = cache.subkey(hash, Kind::Vetx);
        let mut artifacts = vec![(Kind::Vetx, vetx_key)];
        if !self.facts_only {
            artifacts.push((Kind::Directives, cache.subkey(hash, Kind::Directives)));
            artifacts.push((Kind::Diagnostics, cache.subkey(hash, Kind::Diagnostics)));
            artifacts.push((Kind::Unused, cache.subkey(hash, Kind::Unused)));
        }

        let hits: Vec<_> = artifacts.iter().map(|(_, key)| cache.get_file(*key)).collect();
        if hits.iter().all(Option::is_some) {
            log::debug!("package_action: cache hit for `{}`", self.package.path());
            for ((kind, _), hit) in artifacts.iter().zip(hits.into_iter()) {
                let path = hit.unwrap().0;
                match kind {
                    Kind::Vetx => *self.vetx.lock().unwrap() = Some(path),
                    Kind::Directives => *self.directives.lock().unwrap() = Some(path),
                    Kind::Diagnostics => *self.diagnostics.lock().unwrap() = Some(path),
                    Kind::Unused => *self.unused.lock().unwrap() = Some(path),
                }
            }
            return Ok(());
        }

        log::info!("package_action: cache miss, running uncached path for `{}`", self.package.path());
        self.run_uncached()
    }
}

/// Memoizing factory (spec.md §3 "created once per PackageSpec"). Roots
/// are non-`factsOnly`; anything reached only transitively is `factsOnly`,
/// regardless of discovery order.
pub fn build_graph<L: Loader + 'static>(services: &Arc<Services<L>>, roots: &[Arc<L::Package>]) -> Vec<Arc<PackageAction<L>>> {
    let root_ids: HashSet<String> = roots.iter().map(|p| p.id().to_string()).collect();
    let mut built: HashMap<String, Arc<PackageAction<L>>> = HashMap::new();
    roots.iter().map(|p| build_one(services, p, &root_ids, &mut built)).collect()
}

fn build_one<L: Loader + 'static>(
    services: &Arc<Services<L>>,
    package: &Arc<L::Package>,
    root_ids: &HashSet<String>,
    built: &mut HashMap<String, Arc<PackageAction<L>>>,
) -> Arc<PackageAction<L>> {
    if let Some(existing) = built.get(package.id()) {
        return Arc::clone(existing);
    }

    let facts_only = !root_ids.contains(package.id());
    let cfg = package.config_fragment();

    if !package.load_errors().is_empty() {
        let node = Arc::new(PackageAction::new(Arc::clone(services), Arc::clone(package), facts_only, cfg, vec![]));
        node.core().mark_failed(Some(format!("package load errors: {}", package.load_errors().join("; "))));
        built.insert(package.id().to_string(), Arc::clone(&node));
        return node;
    }

    let mut imports: Vec<Arc<L::Package>> = package.imports().to_vec();
    imports.sort_by(|a, b| a.id().cmp(b.id()));
    let deps: Vec<_> = imports.iter().map(|imp| build_one(services, imp, root_ids, built)).collect();

    let node = Arc::new(PackageAction::new(Arc::clone(services), Arc::clone(package), facts_only, cfg, deps));
    built.insert(package.id().to_string(), Arc::clone(&node));
    node
}
