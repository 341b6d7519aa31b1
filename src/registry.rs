//! Definition registry: the catalog of declared units of work.
//!
//! [`DefinitionRegistry`] maps a deterministic [`DefinitionId`] to a
//! [`DefinitionRecord`]. Writes happen at startup, reads come from any
//! number of monitoring requests; the catalog sits behind a
//! `parking_lot::RwLock` and keeps insertion order so iteration is stable.
//!
//! # Examples
//!
//! ```
//! use taskboard::callable::Callable;
//! use taskboard::params::ParamType;
//! use taskboard::registry::DefinitionRegistry;
//!
//! let registry = DefinitionRegistry::new();
//! let ping = Callable::function(module_path!(), "ping")
//!     .param("id", ParamType::Str)
//!     .coroutine(|_| async { Ok(()) });
//!
//! let id = registry.register(ping, "id").unwrap();
//! let record = registry.lookup(&id).unwrap();
//! assert_eq!(record.target_param(), "id");
//! assert!(registry.validate_all().is_ok());
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::callable::{BoundArguments, Callable};
use crate::classify::{classify, CallableShape, Classification};
use crate::error::RegistryError;
use crate::host::{Invocation, TaskHandle, TaskHost};
use crate::params::{ParamDescriptor, ReturnType};
use crate::value::ArgValue;

/// Stable identifier of a definition.
///
/// Derived from the declaring module and qualified name, so registering the
/// same declaration twice yields the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionId(String);

impl DefinitionId {
    /// Computes the identifier for a module path and qualified name.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskboard::registry::DefinitionId;
    ///
    /// let a = DefinitionId::derive("app", "Process::ping");
    /// let b = DefinitionId::derive("app", "Process::ping");
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 16);
    /// assert_ne!(a, DefinitionId::derive("other", "Process::ping"));
    /// ```
    pub fn derive(module: &str, qualified_name: &str) -> Self {
        let digest = Sha256::digest(format!("{module}::{qualified_name}").as_bytes());
        let hex = digest
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        Self(hex)
    }

    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DefinitionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DefinitionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Catalog entry for one declared unit of work.
#[derive(Debug, Clone)]
pub struct DefinitionRecord {
    id: DefinitionId,
    callable: Arc<Callable>,
    target_param: String,
    classification: Classification,
}

impl DefinitionRecord {
    /// Identifier of this definition.
    pub fn id(&self) -> &DefinitionId {
        &self.id
    }

    /// The underlying callable.
    pub fn callable(&self) -> &Arc<Callable> {
        &self.callable
    }

    /// Name of the parameter carrying the target.
    pub fn target_param(&self) -> &str {
        &self.target_param
    }

    /// Classification computed at registration.
    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    /// Shape of the callable.
    pub fn shape(&self) -> CallableShape {
        self.classification.shape
    }

    /// `Owner::name` or `name`.
    pub fn qualified_name(&self) -> String {
        self.callable.qualified_name()
    }

    /// Declaring module path.
    pub fn module(&self) -> &str {
        self.callable.module()
    }

    /// All parameters, implicit receiver included.
    pub fn params(&self) -> &[ParamDescriptor] {
        &self.classification.params
    }

    /// Parameters a caller supplies (implicit receiver excluded).
    pub fn declared_params(&self) -> impl Iterator<Item = &ParamDescriptor> {
        self.classification.declared_params()
    }

    /// Looks up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamDescriptor> {
        self.classification.param(name)
    }

    /// Declared return type.
    pub fn return_type(&self) -> &ReturnType {
        &self.classification.return_type
    }

    /// Description such as `method of class Process`, `None` for functions.
    pub fn type_info(&self) -> Option<String> {
        self.classification.shape.type_info()
    }
}

/// Read-only snapshot of the catalog, in registration order.
pub type Catalog = IndexMap<DefinitionId, Arc<DefinitionRecord>>;

/// Process-wide catalog of definitions.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    records: RwLock<Catalog>,
}

impl DefinitionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an asynchronous callable with its target parameter.
    ///
    /// Re-registering the same declaration overwrites the previous record.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Classify`] if the callable cannot be classified.
    /// - [`RegistryError::NotACoroutine`] if its body is synchronous.
    /// - [`RegistryError::InvalidTargetParameter`] if `target_param` is not a
    ///   declared, non-implicit parameter.
    pub fn register(
        &self,
        callable: Callable,
        target_param: &str,
    ) -> Result<DefinitionId, RegistryError> {
        let classification = classify(&callable)?;
        let name = callable.qualified_name();

        if !callable.is_coroutine() {
            return Err(RegistryError::NotACoroutine { name });
        }

        if !classification
            .declared_params()
            .any(|p| p.name == target_param)
        {
            return Err(RegistryError::InvalidTargetParameter {
                callable: name,
                param: target_param.to_string(),
            });
        }

        let id = DefinitionId::derive(callable.module(), &callable.full_name());
        let record = DefinitionRecord {
            id: id.clone(),
            callable: Arc::new(callable),
            target_param: target_param.to_string(),
            classification,
        };

        tracing::debug!(
            definition_id = %id,
            callable = %name,
            shape = record.shape().label(),
            target_param,
            "registered definition"
        );
        self.records.write().insert(id.clone(), Arc::new(record));
        Ok(id)
    }

    /// Looks up a definition; `None` when the identifier is unknown.
    pub fn lookup<Q>(&self, id: &Q) -> Option<Arc<DefinitionRecord>>
    where
        DefinitionId: Borrow<Q>,
        Q: std::hash::Hash + Eq + ?Sized,
    {
        self.records.read().get(id).cloned()
    }

    /// Snapshot of the whole catalog.
    pub fn all(&self) -> Catalog {
        self.records.read().clone()
    }

    /// Registered identifiers in registration order.
    pub fn ids(&self) -> Vec<DefinitionId> {
        self.records.read().keys().cloned().collect()
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Checks that every caller-supplied parameter has a declared type.
    ///
    /// The implicit receiver and the target parameter are exempt: the first
    /// is supplied by the process, the second always comes from the target
    /// list and is never converted from a string.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingTypeAnnotation`] for the first
    /// offending parameter found.
    pub fn validate_all(&self) -> Result<(), RegistryError> {
        for record in self.records.read().values() {
            for param in record.declared_params() {
                if param.name != record.target_param && !param.ty.is_annotated() {
                    return Err(RegistryError::MissingTypeAnnotation {
                        callable: record.qualified_name(),
                        param: param.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Clears the catalog.
    pub fn reset(&self) {
        self.records.write().clear();
    }

    /// Creates a task running a definition.
    ///
    /// This is the entry-point wrapper: the arguments are bound (defaults
    /// filled in) and the resulting snapshot is recorded on the host before
    /// the body is first polled, so the tracker can later recover them.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownDefinition`] if `id` is not registered.
    /// - [`RegistryError::Bind`] if the arguments do not fit the parameters.
    /// - [`RegistryError::NotACoroutine`] if the record has no async body.
    pub fn invoke(
        &self,
        host: &TaskHost,
        id: &DefinitionId,
        receiver: Option<ArgValue>,
        positional: Vec<ArgValue>,
        keyword: IndexMap<String, ArgValue>,
    ) -> Result<TaskHandle, RegistryError> {
        let record = self
            .lookup(id)
            .ok_or_else(|| RegistryError::UnknownDefinition { id: id.to_string() })?;
        spawn_record(host, &record, receiver, positional, keyword)
    }
}

fn spawn_record(
    host: &TaskHost,
    record: &DefinitionRecord,
    receiver: Option<ArgValue>,
    positional: Vec<ArgValue>,
    keyword: IndexMap<String, ArgValue>,
) -> Result<TaskHandle, RegistryError> {
    let bound: BoundArguments = record.callable.bind(receiver, positional, keyword)?;
    let invocation = Invocation {
        definition_id: record.id.clone(),
        qualified_name: record.qualified_name(),
        module: record.module().to_string(),
        bound: bound.clone(),
    };
    let work = record
        .callable
        .call_async(bound)
        .ok_or_else(|| RegistryError::NotACoroutine {
            name: record.qualified_name(),
        })?;
    Ok(host.spawn_invocation(invocation, work))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifyError;
    use crate::params::ParamType;
    use pretty_assertions::assert_eq;

    struct Process;

    fn ping() -> Callable {
        Callable::method::<Process>("app", "ping")
            .param("id", ParamType::Str)
            .param_with_default("msg", ParamType::Str, "PING")
            .param_with_default("sleep", ParamType::Int, 10)
            .coroutine(|_| async { Ok(()) })
    }

    #[test]
    fn register_and_lookup() {
        let registry = DefinitionRegistry::new();
        let id = registry.register(ping(), "id").unwrap();

        let record = registry.lookup(&id).unwrap();
        assert_eq!(record.target_param(), "id");
        assert_eq!(record.shape(), classify(&ping()).unwrap().shape);
        assert_eq!(record.qualified_name(), "Process::ping");
        assert_eq!(record.declared_params().count(), 3);
        assert_eq!(id, DefinitionId::derive("app", &ping().full_name()));
        assert!(registry.lookup("unknown").is_none());
    }

    #[test]
    fn same_named_owners_get_distinct_ids() {
        mod sensors {
            pub struct Worker;
        }
        mod actuators {
            pub struct Worker;
        }

        let registry = DefinitionRegistry::new();
        let declare = |c: Callable| c.param("id", ParamType::Str).coroutine(|_| async { Ok(()) });
        let first = registry
            .register(declare(Callable::static_method::<sensors::Worker>("app", "run")), "id")
            .unwrap();
        let second = registry
            .register(declare(Callable::static_method::<actuators::Worker>("app", "run")), "id")
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup(&first).unwrap().qualified_name(), "Worker::run");
        assert_eq!(registry.lookup(&second).unwrap().qualified_name(), "Worker::run");
    }

    #[test]
    fn spawning_a_sync_body_is_refused() {
        let callable = Callable::function("app", "blocking")
            .param("id", ParamType::Str)
            .sync(|_| Ok(ArgValue::Null));
        let record = DefinitionRecord {
            id: DefinitionId::derive("app", "blocking"),
            classification: classify(&callable).unwrap(),
            callable: Arc::new(callable),
            target_param: "id".to_string(),
        };
        let mut keyword = IndexMap::new();
        keyword.insert("id".to_string(), ArgValue::from("ABC"));

        let host = TaskHost::new();
        let err = spawn_record(&host, &record, None, Vec::new(), keyword).unwrap_err();
        assert!(matches!(err, RegistryError::NotACoroutine { ref name } if name == "blocking"));
        assert!(host.is_empty());
    }

    #[test]
    fn re_registration_overwrites() {
        let registry = DefinitionRegistry::new();
        let first = registry.register(ping(), "id").unwrap();
        let second = registry.register(ping(), "msg").unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(&first).unwrap().target_param(), "msg");
    }

    #[test]
    fn rejects_synchronous_callables() {
        let registry = DefinitionRegistry::new();
        let f = Callable::function("app", "f")
            .param("id", ParamType::Str)
            .sync(|_| Ok(ArgValue::Null));
        assert_eq!(
            registry.register(f, "id"),
            Err(RegistryError::NotACoroutine {
                name: "f".to_string()
            })
        );
    }

    #[test]
    fn rejects_unclassifiable_callables() {
        let registry = DefinitionRegistry::new();
        assert!(matches!(
            registry.register(Callable::function("app", "f"), "id"),
            Err(RegistryError::Classify(ClassifyError::NotCallable { .. }))
        ));
    }

    #[test]
    fn rejects_receiver_or_unknown_target_param() {
        let registry = DefinitionRegistry::new();
        assert!(matches!(
            registry.register(ping(), "self"),
            Err(RegistryError::InvalidTargetParameter { .. })
        ));
        assert!(matches!(
            registry.register(ping(), "nope"),
            Err(RegistryError::InvalidTargetParameter { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn validate_all_reports_unannotated_parameters() {
        let registry = DefinitionRegistry::new();
        registry.register(ping(), "id").unwrap();
        assert!(registry.validate_all().is_ok());

        let loose = Callable::function("app", "loose")
            .param("id", ParamType::Unannotated)
            .param("count", ParamType::Unannotated)
            .coroutine(|_| async { Ok(()) });
        registry.register(loose, "id").unwrap();
        assert_eq!(
            registry.validate_all(),
            Err(RegistryError::MissingTypeAnnotation {
                callable: "loose".to_string(),
                param: "count".to_string(),
            })
        );

        registry.reset();
        assert!(registry.is_empty());
        assert!(registry.validate_all().is_ok());
    }

    #[test]
    fn unannotated_target_is_exempt() {
        let registry = DefinitionRegistry::new();
        let f = Callable::function("app", "f")
            .param("id", ParamType::Unannotated)
            .coroutine(|_| async { Ok(()) });
        registry.register(f, "id").unwrap();
        assert!(registry.validate_all().is_ok());
    }

    #[test]
    fn catalog_keeps_registration_order() {
        let registry = DefinitionRegistry::new();
        let names = ["b", "a", "c"];
        for name in names {
            let f = Callable::function("app", name)
                .param("id", ParamType::Str)
                .coroutine(|_| async { Ok(()) });
            registry.register(f, "id").unwrap();
        }
        let order: Vec<String> = registry
            .all()
            .values()
            .map(|r| r.qualified_name())
            .collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert_eq!(registry.ids().len(), 3);
    }
}
