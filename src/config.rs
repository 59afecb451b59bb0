//! Runner-wide configuration (spec §3, §4.4), modeled on `rls`'s own
//! `Inferrable<T>` merge pattern: a field is either user-`Specified` or
//! `Inferred` by the runner, and a specified value always wins on merge.

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inferrable<T> {
    Specified(T),
    Inferred(T),
}

impl<T: Clone> Inferrable<T> {
    pub fn get(&self) -> T {
        match self {
            Inferrable::Specified(v) | Inferrable::Inferred(v) => v.clone(),
        }
    }

    /// A `Specified` value always wins; otherwise `other` (typically a
    /// freshly-inferred default) takes over.
    pub fn combine(self, other: Inferrable<T>) -> Inferrable<T> {
        match self {
            Inferrable::Specified(_) => self,
            Inferrable::Inferred(_) => other,
        }
    }
}

impl<T> Default for Inferrable<T>
where
    T: Default,
{
    fn default() -> Self {
        Inferrable::Inferred(T::default())
    }
}

/// Merged per-package configuration: the cache-key input of spec.md §4.4.
///
/// `checks` is deliberately excluded from [`Config::stable_pretty_print`]:
/// diagnostics are always produced for every enabled analyzer and filtered
/// downstream, so a Checks-only change must not perturb the cache key.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub jobs: Inferrable<Option<usize>>,
    #[serde(default)]
    pub build_tags: Vec<String>,
    #[serde(default)]
    pub strict: bool,
}

impl Config {
    /// Merges a per-package fragment (`self`) with runner-wide defaults.
    /// Only fields that are legitimately `Inferrable` participate; plain
    /// fields (`build_tags`, `strict`) are taken verbatim from `self`, since
    /// they come from the per-package fragment, not from inference.
    pub fn update(&mut self, defaults: &Config) {
        self.jobs = self.jobs.clone().combine(defaults.jobs.clone());
    }

    /// Deterministic, field-order-stable string used as cache-key input.
    /// Never `Debug`-formats the struct, whose field order is not a
    /// stability guarantee; `checks` is excluded by contract.
    pub fn stable_pretty_print(&self) -> String {
        let mut fields: BTreeMap<&'static str, String> = BTreeMap::new();
        fields.insert("build_tags", format!("{:?}", self.build_tags));
        fields.insert("jobs", format!("{:?}", self.jobs.get()));
        fields.insert("strict", self.strict.to_string());

        let mut out = String::new();
        for (k, v) in &fields {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push(';');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checks_excluded_from_pretty_print() {
        let mut a = Config::default();
        a.checks = vec!["unused".into()];
        let mut b = Config::default();
        b.checks = vec!["shadow".into(), "printf".into()];
        assert_eq!(a.stable_pretty_print(), b.stable_pretty_print());
    }

    #[test]
    fn specified_wins_over_inferred() {
        let specified = Inferrable::Specified(Some(4usize));
        let inferred = Inferrable::Inferred(Some(8usize));
        assert_eq!(specified.clone().combine(inferred.clone()).get(), Some(4));
        assert_eq!(inferred.combine(specified).get(), Some(4));
    }

    #[test]
    fn differing_non_checks_fields_differ() {
        let mut a = Config::default();
        a.strict = true;
        let b = Config::default();
        assert_ne!(a.stable_pretty_print(), b.stable_pretty_print());
    }

    #[quickcheck_macros::quickcheck]
    fn checks_never_perturb_pretty_print(checks_a: Vec<String>, checks_b: Vec<String>, strict: bool, build_tags: Vec<String>) -> bool {
        let mut a = Config { checks: checks_a, strict, build_tags: build_tags.clone(), ..Config::default() };
        let b = Config { checks: checks_b, strict, build_tags, ..Config::default() };
        a.stable_pretty_print() == b.stable_pretty_print()
    }
}
