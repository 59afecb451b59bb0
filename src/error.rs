//! Error taxonomy for the runner's library boundary.
//!
//! Only the variants that spec the taxonomy marks "fatal"/"surfaced" become
//! `RunnerError` cases. `PackageLoadError`, `CacheReadMiss` and
//! `DependencyFailed` are deliberately not here: they are recorded state
//! (`Result_.errors`, the failed bit) or an `Option` at the call site, never
//! thrown across a component boundary.
//!
//! `AnalyzerSetup` and `CacheInit` are pre-flight checks that run before
//! `loader.graph()` is ever called (see `runner.rs`'s grounding entry in
//! `DESIGN.md`); they are kept distinct from `Loader` rather than folded
//! into it, since neither has anything to do with the `Loader` collaborator.

use crate::cache::ActionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid analyzer set")]
    AnalyzerSetup(#[source] anyhow::Error),

    #[error("failed to initialize cache root")]
    CacheInit(#[source] std::io::Error),

    #[error("loader failed to build package graph")]
    Loader(#[source] anyhow::Error),

    #[error("cache I/O failure for entry {id}")]
    CacheIo {
        id: ActionId,
        #[source]
        source: std::io::Error,
    },

    #[error("analyzer `{analyzer}` failed on package `{package}`")]
    Analyzer {
        package: String,
        analyzer: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("fact/diagnostic codec failure")]
    Codec(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
