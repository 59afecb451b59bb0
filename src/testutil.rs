//! In-tree mock collaborators standing in for the Loader, Analyzer, and
//! DirectiveParser boundaries spec.md §6 treats as external, so the
//! scenario seeds in spec.md §8 can run as ordinary tests without an
//! actual type-checker. `#[cfg(test)]`-only, per this crate's test
//! tooling conventions.

use crate::analyzer::Pass;
use crate::config::Config;
use crate::external::{Analyzer, Diagnostic, Directive, DirectiveParser, LoadedPackage, Loader, PackageSpec};
use crate::facts::{Fact, FactRegistry};
use serde_derive::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

pub struct MockPackage {
    pub path: String,
    pub imports: Vec<Arc<MockPackage>>,
    pub content: String,
    pub load_errors: Vec<String>,
}

impl MockPackage {
    pub fn new(path: &str, imports: Vec<Arc<MockPackage>>) -> Arc<Self> {
        Arc::new(MockPackage {
            path: path.to_string(),
            imports,
            content: path.to_string(),
            load_errors: Vec::new(),
        })
    }
}

impl PackageSpec for MockPackage {
    fn path(&self) -> &str {
        &self.path
    }
    fn id(&self) -> &str {
        &self.path
    }
    fn imports(&self) -> &[Arc<Self>] {
        &self.imports
    }
    fn content_hash(&self) -> blake3::Hash {
        blake3::hash(self.content.as_bytes())
    }
    fn config_fragment(&self) -> Config {
        Config::default()
    }
    fn load_errors(&self) -> &[String] {
        &self.load_errors
    }
}

#[derive(Default)]
pub struct MockLoader {
    pub packages: HashMap<String, Arc<MockPackage>>,
    pub fail_load: HashMap<String, Vec<String>>,
}

impl MockLoader {
    pub fn register(&mut self, pkg: &Arc<MockPackage>) {
        self.packages.insert(pkg.path.clone(), Arc::clone(pkg));
        for imp in &pkg.imports {
            self.register(imp);
        }
    }
}

impl Loader for MockLoader {
    type Package = MockPackage;

    fn graph(&self, _config: &Config, patterns: &[String]) -> anyhow::Result<Vec<Arc<MockPackage>>> {
        patterns
            .iter()
            .map(|p| self.packages.get(p).cloned().ok_or_else(|| anyhow::anyhow!("unknown package `{}`", p)))
            .collect()
    }

    fn load(&self, spec: &Arc<MockPackage>) -> anyhow::Result<LoadedPackage> {
        let errors = self.fail_load.get(&spec.path).cloned().unwrap_or_default();
        Ok(LoadedPackage {
            errors,
            data: Arc::new(()),
        })
    }
}

pub struct NoopDirectiveParser;

impl DirectiveParser for NoopDirectiveParser {
    fn parse(&self, _loaded: &LoadedPackage) -> anyhow::Result<Vec<Directive>> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeenFact(pub bool);

impl Fact for SeenFact {
    const TYPE_NAME: &'static str = "mock::seen";
}

/// Exports a package-fact on every package it analyzes — scenario 2/3's
/// "one analyzer that exports a package-fact on every package".
pub struct PackageFactExporter;

impl Analyzer for PackageFactExporter {
    fn name(&self) -> &'static str {
        "fact_exporter"
    }
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }
    fn fact_types(&self) -> &'static [&'static str] {
        &["mock::seen"]
    }
    fn register_facts(&self, registry: &FactRegistry) {
        registry.register::<SeenFact>();
    }
    fn run(&self, pass: &Pass<'_>) -> anyhow::Result<Arc<dyn Any + Send + Sync>> {
        pass.export_package_fact("mock::seen", Arc::new(SeenFact(true)));
        Ok(Arc::new(()))
    }
}

/// Always fails — scenario 4's "analyzer that returns an error on
/// package P".
pub struct ErroringAnalyzer;

impl Analyzer for ErroringAnalyzer {
    fn name(&self) -> &'static str {
        "erroring"
    }
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }
    fn fact_types(&self) -> &'static [&'static str] {
        &[]
    }
    fn register_facts(&self, _registry: &FactRegistry) {}
    fn run(&self, _pass: &Pass<'_>) -> anyhow::Result<Arc<dyn Any + Send + Sync>> {
        anyhow::bail!("erroring analyzer always fails")
    }
}

/// Reports one uncategorized diagnostic per package it runs on.
pub struct DiagnosticReporter;

impl Analyzer for DiagnosticReporter {
    fn name(&self) -> &'static str {
        "diagnostic_reporter"
    }
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }
    fn fact_types(&self) -> &'static [&'static str] {
        &[]
    }
    fn register_facts(&self, _registry: &FactRegistry) {}
    fn run(&self, pass: &Pass<'_>) -> anyhow::Result<Arc<dyn Any + Send + Sync>> {
        pass.report(Diagnostic {
            file: pass.package_path().to_string(),
            line: 1,
            column: 1,
            message: "mock diagnostic".to_string(),
            category: String::new(),
        });
        Ok(Arc::new(()))
    }
}
