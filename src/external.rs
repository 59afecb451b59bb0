//! External collaborator interfaces (spec §6): the Loader, Analyzer,
//! DirectiveParser, and ObjectPath-resolution boundaries. Their internals
//! are explicitly out of scope; only the contracts this crate calls
//! against live here, mirroring how `rls` declares `rls_analysis`'s
//! `AnalysisLoader` trait at its own loader boundary.

use crate::config::Config;
use serde_derive::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

/// A source package as reported by the Loader. Identified by a stable path
/// and ID; exposes import edges, a precomputed content hash, an embedded
/// config fragment, and any load-time errors.
pub trait PackageSpec: Send + Sync {
    fn path(&self) -> &str;
    fn id(&self) -> &str;
    fn imports(&self) -> &[Arc<Self>]
    where
        Self: Sized;
    fn content_hash(&self) -> blake3::Hash;
    fn config_fragment(&self) -> Config;
    fn load_errors(&self) -> &[String];
}

/// Syntax trees, type information, and errors produced by loading one
/// package. The payload is opaque to the runner core; only analyzers and
/// the DirectiveParser interpret it.
pub struct LoadedPackage {
    pub errors: Vec<String>,
    pub data: Arc<dyn Any + Send + Sync>,
}

/// Consumed from the Loader (spec §6): builds the package graph from CLI
/// patterns, and loads one package's syntax/type information on demand.
pub trait Loader: Send + Sync {
    type Package: PackageSpec;

    fn graph(&self, config: &Config, patterns: &[String]) -> anyhow::Result<Vec<Arc<Self::Package>>>;
    fn load(&self, spec: &Arc<Self::Package>) -> anyhow::Result<LoadedPackage>;
}

/// One in-source directive (e.g. a suppression comment), as reported by
/// the DirectiveParser.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Directive {
    pub file: String,
    pub line: u32,
    pub text: String,
}

/// Consumed from the DirectiveParser (spec §6).
pub trait DirectiveParser: Send + Sync {
    fn parse(&self, loaded: &LoadedPackage) -> anyhow::Result<Vec<Directive>>;
}

/// One diagnostic, in resolved file/line/column form — the shape that
/// crosses the cache boundary (spec.md §4.4.e forbids unresolved
/// positions from ever being serialized).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
    pub category: String,
}

/// Consumed from the Analyzer ecosystem (spec §6). `run` receives the
/// per-(package, analyzer) [`crate::analyzer::Pass`] context.
///
/// `register_facts` is this crate's answer to design note §9's "the codec
/// registers [fact-types] by canonical name": the generic core never knows
/// the concrete Rust type behind a fact, so each analyzer registers its own
/// fact payload types directly with the [`crate::facts::FactRegistry`]
/// (typically one `registry.register::<MyFact>()` call per entry in
/// `fact_types()`). The runner façade calls this once per analyzer, before
/// any action executes (spec.md §4.6 step 2).
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;
    fn requires(&self) -> &'static [&'static str];
    fn fact_types(&self) -> &'static [&'static str];
    fn register_facts(&self, registry: &crate::facts::FactRegistry);
    fn run(&self, pass: &crate::analyzer::Pass<'_>) -> anyhow::Result<Arc<dyn Any + Send + Sync>>;
}
