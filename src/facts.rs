//! The fact codec (spec C7): serializes and deserializes object-facts and
//! package-facts to the portable `vetx` byte stream, keyed by import path
//! and object path, and keyed by a process-global nominal fact-type
//! registry (spec.md §4.7, design note §9's "Global state").
//!
//! Neither `erased_serde` nor `typetag` is part of this codebase's
//! lineage, so dynamic dispatch over an analyzer-defined fact shape is
//! hand-rolled: [`FactRegistry`] stores one encode/decode closure pair per
//! registered type name, each closure monomorphized against a concrete
//! `F: Fact` at the `register::<F>()` call site.

use crate::error::RunnerError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_derive::{Deserialize, Serialize as SerializeDerive};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// A value an analyzer can export about an object or a package. `TYPE_NAME`
/// is the stable nominal tag spec.md requires be "registered with the
/// codec before any serialization occurs".
pub trait Fact: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
}

pub type Payload = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectFactKey {
    pub package_path: String,
    pub object_path: String,
    pub fact_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PackageFactKey {
    pub package_path: String,
    pub fact_type: String,
}

/// Facts exported during one package run, before the cross-analyzer merge
/// described in spec.md §4.5 ("Cross-analyzer fact flow").
#[derive(Default)]
pub struct FactStore {
    pub object_facts: HashMap<ObjectFactKey, Payload>,
    pub package_facts: HashMap<PackageFactKey, Payload>,
}

impl FactStore {
    pub fn merge(&mut self, other: FactStore) {
        self.object_facts.extend(other.object_facts);
        self.package_facts.extend(other.package_facts);
    }
}

struct TypeOps {
    encode: fn(&Payload) -> bincode::Result<Vec<u8>>,
    decode: fn(&[u8]) -> bincode::Result<Payload>,
}

/// Process-global-in-spirit registry: one instance per `Runner`, shared
/// across concurrent `run` invocations, matching spec.md §5's "the
/// concurrency gate is shared across multiple `run` invocations" for the
/// analogous global resource.
#[derive(Default)]
pub struct FactRegistry {
    by_name: RwLock<HashMap<String, TypeOps>>,
}

impl FactRegistry {
    pub fn new() -> Self {
        FactRegistry::default()
    }

    /// Idempotent: registering the same type twice (design note §9) is a
    /// no-op on the second call.
    pub fn register<F: Fact>(&self) {
        let mut map = self.by_name.write().unwrap();
        map.entry(F::TYPE_NAME.to_string()).or_insert_with(|| TypeOps {
            encode: |payload: &Payload| {
                let val = payload
                    .downcast_ref::<F>()
                    .expect("fact payload does not match its own registered type");
                bincode::serialize(val)
            },
            decode: |bytes: &[u8]| {
                let val: F = bincode::deserialize(bytes)?;
                Ok(Arc::new(val) as Payload)
            },
        });
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.by_name.read().unwrap().contains_key(name)
    }

    fn encode_one(&self, type_name: &str, value: &Payload) -> bincode::Result<Vec<u8>> {
        let map = self.by_name.read().unwrap();
        let ops = map
            .get(type_name)
            .unwrap_or_else(|| panic!("encoding unregistered fact type `{}`", type_name));
        (ops.encode)(value)
    }

    /// `None` if `type_name` was never registered (a stale cache entry, or
    /// an analyzer that disappeared between runs); the caller treats that
    /// as a silent skip, not a `CodecError`.
    fn decode_one(&self, type_name: &str, bytes: &[u8]) -> Option<bincode::Result<Payload>> {
        let map = self.by_name.read().unwrap();
        map.get(type_name).map(|ops| (ops.decode)(bytes))
    }
}

/// One record in the `vetx` stream. Empty `object_path` denotes a
/// package-fact (spec.md §4.7).
#[derive(SerializeDerive, Deserialize)]
struct RawRecord {
    package_path: String,
    object_path: String,
    fact_type: String,
    payload: Vec<u8>,
}

/// Serializes a package's own exported facts to the `vetx` byte stream.
pub fn encode(registry: &FactRegistry, store: &FactStore) -> Result<Vec<u8>, RunnerError> {
    let mut records = Vec::with_capacity(store.object_facts.len() + store.package_facts.len());

    for (key, value) in &store.object_facts {
        let payload = registry
            .encode_one(&key.fact_type, value)
            .map_err(|e| RunnerError::Codec(e.into()))?;
        records.push(RawRecord {
            package_path: key.package_path.clone(),
            object_path: key.object_path.clone(),
            fact_type: key.fact_type.clone(),
            payload,
        });
    }
    for (key, value) in &store.package_facts {
        let payload = registry
            .encode_one(&key.fact_type, value)
            .map_err(|e| RunnerError::Codec(e.into()))?;
        records.push(RawRecord {
            package_path: key.package_path.clone(),
            object_path: String::new(),
            fact_type: key.fact_type.clone(),
            payload,
        });
    }

    bincode::serialize(&records).map_err(|e| RunnerError::Codec(e.into()))
}

#[derive(Default)]
pub struct IngestedFacts {
    pub object_facts: HashMap<ObjectFactKey, Payload>,
    pub package_facts: HashMap<PackageFactKey, Payload>,
}

/// Decodes a dependency's `vetx` stream and filters it down to the facts
/// visible to the current package (spec.md §4.7 "Ingestion").
///
/// `package_closure` is the transitive imported-packages set of the
/// current root; records whose package path falls outside it are dropped.
/// `resolve_object` re-resolves a serialized `(package_path, object_path)`
/// pair against live objects; `None` means the entity no longer resolves
/// and the fact is silently dropped, per the rationale in spec.md §4.7
/// ("stale cached facts ... must not fail the run").
///
/// A malformed envelope (the outer `bincode` decode) is a [`RunnerError::Codec`];
/// failure to resolve or decode an individual record is never one.
pub fn ingest(
    registry: &FactRegistry,
    bytes: &[u8],
    package_closure: &HashSet<String>,
    resolve_object: impl Fn(&str, &str) -> Option<String>,
) -> Result<IngestedFacts, RunnerError> {
    let records: Vec<RawRecord> = bincode::deserialize(bytes).map_err(|e| RunnerError::Codec(e.into()))?;
    let mut out = IngestedFacts::default();

    for record in records {
        if !package_closure.contains(&record.package_path) {
            continue;
        }
        let decoded = match registry.decode_one(&record.fact_type, &record.payload) {
            Some(Ok(value)) => value,
            Some(Err(_)) | None => continue,
        };
        if record.object_path.is_empty() {
            out.package_facts.insert(
                PackageFactKey {
                    package_path: record.package_path,
                    fact_type: record.fact_type,
                },
                decoded,
            );
        } else if let Some(resolved) = resolve_object(&record.package_path, &record.object_path) {
            out.object_facts.insert(
                ObjectFactKey {
                    package_path: record.package_path,
                    object_path: resolved,
                    fact_type: record.fact_type,
                },
                decoded,
            );
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_derive::{Deserialize as D, Serialize as S};

    #[derive(Clone, Debug, PartialEq, S, D)]
    struct Exported(u32);
    impl Fact for Exported {
        const TYPE_NAME: &'static str = "test::exported";
    }

    #[test]
    fn round_trips_object_and_package_facts() {
        let registry = FactRegistry::new();
        registry.register::<Exported>();

        let mut store = FactStore::default();
        store.object_facts.insert(
            ObjectFactKey {
                package_path: "pkg/a".into(),
                object_path: "Foo".into(),
                fact_type: Exported::TYPE_NAME.into(),
            },
            Arc::new(Exported(7)),
        );
        store.package_facts.insert(
            PackageFactKey {
                package_path: "pkg/a".into(),
                fact_type: Exported::TYPE_NAME.into(),
            },
            Arc::new(Exported(9)),
        );

        let bytes = encode(&registry, &store).unwrap();
        let mut closure = HashSet::new();
        closure.insert("pkg/a".to_string());
        let ingested = ingest(&registry, &bytes, &closure, |_pkg, obj| Some(obj.to_string())).unwrap();

        let obj_val = ingested
            .object_facts
            .values()
            .next()
            .unwrap()
            .downcast_ref::<Exported>()
            .unwrap();
        assert_eq!(*obj_val, Exported(7));
        let pkg_val = ingested
            .package_facts
            .values()
            .next()
            .unwrap()
            .downcast_ref::<Exported>()
            .unwrap();
        assert_eq!(*pkg_val, Exported(9));
    }

    #[test]
    fn records_outside_closure_are_dropped() {
        let registry = FactRegistry::new();
        registry.register::<Exported>();
        let mut store = FactStore::default();
        store.package_facts.insert(
            PackageFactKey {
                package_path: "pkg/outside".into(),
                fact_type: Exported::TYPE_NAME.into(),
            },
            Arc::new(Exported(1)),
        );
        let bytes = encode(&registry, &store).unwrap();
        let closure = HashSet::new();
        let ingested = ingest(&registry, &bytes, &closure, |_, o| Some(o.to_string())).unwrap();
        assert!(ingested.package_facts.is_empty());
    }

    #[test]
    fn unresolvable_object_is_silently_skipped() {
        let registry = FactRegistry::new();
        registry.register::<Exported>();
        let mut store = FactStore::default();
        store.object_facts.insert(
            ObjectFactKey {
                package_path: "pkg/a".into(),
                object_path: "Stale".into(),
                fact_type: Exported::TYPE_NAME.into(),
            },
            Arc::new(Exported(1)),
        );
        let bytes = encode(&registry, &store).unwrap();
        let mut closure = HashSet::new();
        closure.insert("pkg/a".to_string());
        let ingested = ingest(&registry, &bytes, &closure, |_, _| None).unwrap();
        assert!(ingested.object_facts.is_empty());
    }

    #[test]
    fn unregistered_fact_type_is_silently_skipped_on_decode() {
        let write_registry = FactRegistry::new();
        write_registry.register::<Exported>();
        let mut store = FactStore::default();
        store.package_facts.insert(
            PackageFactKey {
                package_path: "pkg/a".into(),
                fact_type: Exported::TYPE_NAME.into(),
            },
            Arc::new(Exported(1)),
        );
        let bytes = encode(&write_registry, &store).unwrap();

        let read_registry = FactRegistry::new(); // never registers Exported
        let mut closure = HashSet::new();
        closure.insert("pkg/a".to_string());
        let ingested = ingest(&read_registry, &bytes, &closure, |_, o| Some(o.to_string())).unwrap();
        assert!(ingested.package_facts.is_empty());
    }

    #[test]
    fn registering_twice_is_idempotent() {
        let registry = FactRegistry::new();
        registry.register::<Exported>();
        registry.register::<Exported>();
        assert!(registry.is_registered(Exported::TYPE_NAME));
    }
}
