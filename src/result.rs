//! The `Result` type returned to callers (spec §3, §6): references to a
//! package, its merged config, a failure flag/errors, and three lazy
//! cache-file loaders. Readers reopen the underlying files on demand —
//! the runner deliberately does not keep decoded facts or diagnostics in
//! memory past a single package's analyzer run (design note §9, "Memory
//! policy").

use crate::config::Config;
use crate::external::{Diagnostic, Directive, PackageSpec};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Result_<P: PackageSpec> {
    package: Arc<P>,
    config: Config,
    failed: bool,
    errors: Vec<String>,
    directives_path: Option<PathBuf>,
    diagnostics_path: Option<PathBuf>,
    unused_path: Option<PathBuf>,
}

impl<P: PackageSpec> Result_<P> {
    pub(crate) fn new(
        package: Arc<P>,
        config: Config,
        failed: bool,
        errors: Vec<String>,
        directives_path: Option<PathBuf>,
        diagnostics_path: Option<PathBuf>,
        unused_path: Option<PathBuf>,
    ) -> Self {
        Result_ {
            package,
            config,
            failed,
            errors,
            directives_path,
            diagnostics_path,
            unused_path,
        }
    }

    pub fn package(&self) -> &Arc<P> {
        &self.package
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Empty when the path slot is unset (a dependency-only package never
    /// wrote this artifact). Calling this on a failed result is a
    /// programming error, per spec.md §6.
    pub fn diagnostics(&self) -> anyhow::Result<Vec<Diagnostic>> {
        assert!(!self.failed, "diagnostics() called on a failed Result");
        load_records(&self.diagnostics_path)
    }

    pub fn directives(&self) -> anyhow::Result<Vec<Directive>> {
        assert!(!self.failed, "directives() called on a failed Result");
        load_records(&self.directives_path)
    }

    /// Raw bytes from the analyzer-supplied serializer (spec.md §4.5's
    /// named special case); empty when unset.
    pub fn unused(&self) -> anyhow::Result<Vec<u8>> {
        assert!(!self.failed, "unused() called on a failed Result");
        match &self.unused_path {
            Some(path) => Ok(std::fs::read(path)?),
            None => Ok(Vec::new()),
        }
    }
}

fn load_records<T: serde::de::DeserializeOwned>(path: &Option<PathBuf>) -> anyhow::Result<Vec<T>> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path)?;
            Ok(bincode::deserialize(&bytes)?)
        }
        None => Ok(Vec::new()),
    }
}
