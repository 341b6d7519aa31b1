//! Target enumeration.
//!
//! A target is the entity a task operates on (a device, an account, ...).
//! The process declares at most one synchronous enumerator producing the
//! ordered list of valid targets; registering another one replaces it with
//! a warning.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::callable::Callable;
use crate::classify::{classify, CallableShape, Classification};
use crate::error::TargetError;
use crate::params::ReturnType;
use crate::value::{ArgValue, Receiver};

#[derive(Debug, Clone)]
struct Registered {
    callable: Arc<Callable>,
    classification: Classification,
}

/// Holder of the process-wide target enumerator.
#[derive(Debug, Default)]
pub struct TargetEnumerator {
    current: RwLock<Option<Registered>>,
}

impl TargetEnumerator {
    /// Creates an empty holder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a free function, static method or class method.
    ///
    /// # Errors
    ///
    /// - [`TargetError::Classify`] if the callable cannot be classified.
    /// - [`TargetError::NotAFunction`] for instance methods and asynchronous
    ///   bodies.
    pub fn register(&self, callable: Callable) -> Result<(), TargetError> {
        let classification = classify(&callable)?;
        if classification.shape.needs_receiver() {
            return Err(TargetError::NotAFunction {
                name: callable.qualified_name(),
                shape: classification.shape.to_string(),
            });
        }
        self.store(callable, classification)
    }

    /// Registers an enumerator of any synchronous shape, instance methods
    /// included.
    ///
    /// An instance-method enumerator is called with the receiver passed to
    /// [`TargetEnumerator::list`].
    ///
    /// # Errors
    ///
    /// Same as [`TargetEnumerator::register`], minus the instance-method
    /// rejection.
    pub fn register_method(&self, callable: Callable) -> Result<(), TargetError> {
        let classification = classify(&callable)?;
        self.store(callable, classification)
    }

    fn store(&self, callable: Callable, classification: Classification) -> Result<(), TargetError> {
        let name = callable.qualified_name();
        if callable.is_coroutine() {
            return Err(TargetError::NotAFunction {
                name,
                shape: "coroutine".to_string(),
            });
        }

        let mut current = self.current.write();
        if let Some(previous) = current.as_ref() {
            tracing::warn!(
                previous = %previous.callable.qualified_name(),
                replacement = %name,
                "task target function is overwritten"
            );
        }
        tracing::debug!(callable = %name, shape = classification.shape.label(), "registered target function");
        *current = Some(Registered {
            callable: Arc::new(callable),
            classification,
        });
        Ok(())
    }

    /// Returns `true` if an enumerator is registered.
    pub fn is_registered(&self) -> bool {
        self.current.read().is_some()
    }

    /// Classification of the registered enumerator.
    pub fn context(&self) -> Option<Classification> {
        self.current
            .read()
            .as_ref()
            .map(|registered| registered.classification.clone())
    }

    /// Validates the registered enumerator.
    ///
    /// # Errors
    ///
    /// - [`TargetError::NotRegistered`] if none is registered.
    /// - [`TargetError::InvalidSignature`] if it declares parameters.
    /// - [`TargetError::MissingReturnAnnotation`] if no return type is
    ///   declared.
    /// - [`TargetError::WrongReturnType`] if the return type is not a list.
    pub fn check(&self) -> Result<(), TargetError> {
        let current = self.current.read();
        let registered = current.as_ref().ok_or(TargetError::NotRegistered)?;
        let name = registered.callable.qualified_name();
        let class = &registered.classification;

        if class.declared_count() > 0 {
            let params = class
                .declared_params()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(TargetError::InvalidSignature { name, params });
        }
        match &class.return_type {
            ReturnType::Unannotated => Err(TargetError::MissingReturnAnnotation { name }),
            ReturnType::List => Ok(()),
            other => Err(TargetError::WrongReturnType {
                name,
                found: other.to_string(),
            }),
        }
    }

    /// Calls the enumerator and returns its targets in the order produced.
    ///
    /// The receiver is supplied to instance methods only; class methods are
    /// bound to their owner type.
    ///
    /// # Errors
    ///
    /// - [`TargetError::NotRegistered`] if none is registered.
    /// - [`TargetError::ReceiverRequired`] for an instance method called
    ///   without (or with a mistyped) receiver.
    /// - [`TargetError::UnexpectedReceiver`] if a receiver is given to any
    ///   other shape.
    /// - [`TargetError::InvalidSignature`] if the enumerator needs arguments.
    /// - [`TargetError::Invocation`] if the body fails.
    /// - [`TargetError::WrongReturnType`] if the body returns a non-list.
    pub fn list(&self, receiver: Option<&Receiver>) -> Result<Vec<ArgValue>, TargetError> {
        let registered = self
            .current
            .read()
            .clone()
            .ok_or(TargetError::NotRegistered)?;
        let callable = &registered.callable;
        let name = callable.qualified_name();

        let bound_receiver = match (registered.classification.shape, receiver) {
            (CallableShape::InstanceMethod { owner }, Some(r)) if r.is_instance_of(&owner) => {
                Some(ArgValue::Receiver(r.clone()))
            },
            (CallableShape::InstanceMethod { .. }, _) => {
                return Err(TargetError::ReceiverRequired { name });
            },
            (_, Some(_)) => return Err(TargetError::UnexpectedReceiver { name }),
            (_, None) => None,
        };

        let args = callable
            .bind(bound_receiver, Vec::new(), IndexMap::new())
            .map_err(|e| TargetError::InvalidSignature {
                name: name.clone(),
                params: e.to_string(),
            })?;

        let produced = match callable.call_sync(&args) {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                return Err(TargetError::Invocation {
                    name,
                    message: format!("{e:#}"),
                })
            },
            None => {
                return Err(TargetError::NotAFunction {
                    name,
                    shape: "coroutine".to_string(),
                })
            },
        };

        match produced {
            ArgValue::List(items) => Ok(items),
            other => Err(TargetError::WrongReturnType {
                name,
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Forgets the registered enumerator.
    pub fn reset(&self) {
        self.current.write().take();
    }
}

/// Sorted, de-duplicated target list.
///
/// Positions into this list are the stable handles operators use to refer
/// to targets between requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetList(Vec<ArgValue>);

impl TargetList {
    /// Returns the number of targets.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no targets.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Target at `pos`.
    pub fn get(&self, pos: usize) -> Option<&ArgValue> {
        self.0.get(pos)
    }

    /// Position of `target`, if present.
    pub fn position_of(&self, target: &ArgValue) -> Option<usize> {
        self.0.binary_search(target).ok()
    }

    /// The targets in order.
    pub fn as_slice(&self) -> &[ArgValue] {
        &self.0
    }

    /// Iterates in order.
    pub fn iter(&self) -> std::slice::Iter<'_, ArgValue> {
        self.0.iter()
    }

    /// A forward-only cursor for locating targets in ascending order.
    pub fn cursor(&self) -> TargetCursor<'_> {
        TargetCursor { list: self, pos: 0 }
    }
}

impl From<Vec<ArgValue>> for TargetList {
    fn from(mut targets: Vec<ArgValue>) -> Self {
        targets.sort();
        targets.dedup();
        Self(targets)
    }
}

impl FromIterator<ArgValue> for TargetList {
    fn from_iter<I: IntoIterator<Item = ArgValue>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

/// Monotonic search over a [`TargetList`].
///
/// Each lookup starts from the previous hit, so resolving a batch of
/// targets sorted ascending costs a single pass.
#[derive(Debug)]
pub struct TargetCursor<'a> {
    list: &'a TargetList,
    pos: usize,
}

impl TargetCursor<'_> {
    /// Position of `target` at or after the previous hit.
    ///
    /// A miss leaves the cursor where it was.
    pub fn seek(&mut self, target: &ArgValue) -> Option<usize> {
        let rest = &self.list.0[self.pos..];
        let offset = rest.binary_search(target).ok()?;
        self.pos += offset;
        Some(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::Callable;
    use crate::params::ParamType;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    struct Process {
        names: Vec<&'static str>,
    }

    fn abc_def() -> Callable {
        Callable::function("app", "targets")
            .returns(ReturnType::List)
            .sync(|_| Ok(vec!["DEF", "ABC"].into()))
    }

    #[test]
    fn lists_function_targets_in_produced_order() {
        let targets = TargetEnumerator::new();
        targets.register(abc_def()).unwrap();
        targets.check().unwrap();
        assert_eq!(
            targets.list(None).unwrap(),
            vec![ArgValue::from("DEF"), ArgValue::from("ABC")]
        );
        assert!(matches!(
            targets.list(Some(&Receiver::new(Arc::new(0u8)))),
            Err(TargetError::UnexpectedReceiver { .. })
        ));
    }

    #[test]
    fn instance_method_enumerators_need_register_method() {
        let targets = TargetEnumerator::new();
        let method = Callable::method::<Process>("app", "targets")
            .returns(ReturnType::List)
            .sync(|args| {
                let process = args.receiver::<Process>().ok_or_else(|| anyhow::anyhow!("no receiver"))?;
                Ok(process.names.clone().into())
            });

        assert!(matches!(
            targets.register(method.clone()),
            Err(TargetError::NotAFunction { .. })
        ));
        assert!(!targets.is_registered());

        targets.register_method(method).unwrap();
        targets.check().unwrap();
        assert!(matches!(targets.list(None), Err(TargetError::ReceiverRequired { .. })));
        assert!(matches!(
            targets.list(Some(&Receiver::new(Arc::new(1u32)))),
            Err(TargetError::ReceiverRequired { .. })
        ));

        let process = Receiver::new(Arc::new(Process {
            names: vec!["UVW", "XYZ"],
        }));
        assert_eq!(
            targets.list(Some(&process)).unwrap(),
            vec![ArgValue::from("UVW"), ArgValue::from("XYZ")]
        );
    }

    #[test]
    fn class_method_enumerators_get_their_owner() {
        let targets = TargetEnumerator::new();
        let c = Callable::class_method::<Process>("app", "targets")
            .returns(ReturnType::List)
            .sync(|args| {
                assert!(args.contains("cls"));
                Ok(vec!["A"].into())
            });
        targets.register(c).unwrap();
        assert_eq!(targets.context().unwrap().declared_count(), 0);
        assert_eq!(targets.list(None).unwrap(), vec![ArgValue::from("A")]);
    }

    #[test]
    fn check_validates_signature_and_return_type() {
        let targets = TargetEnumerator::new();
        assert_eq!(targets.check(), Err(TargetError::NotRegistered));
        assert_eq!(targets.list(None), Err(TargetError::NotRegistered));

        targets
            .register(
                Callable::function("app", "targets")
                    .param("region", ParamType::Str)
                    .returns(ReturnType::List)
                    .sync(|_| Ok(ArgValue::List(vec![]))),
            )
            .unwrap();
        assert!(matches!(
            targets.check(),
            Err(TargetError::InvalidSignature { params, .. }) if params == "region"
        ));

        targets
            .register(Callable::function("app", "targets").sync(|_| Ok(ArgValue::List(vec![]))))
            .unwrap();
        assert!(matches!(targets.check(), Err(TargetError::MissingReturnAnnotation { .. })));

        targets
            .register(
                Callable::function("app", "targets")
                    .returns(ReturnType::Value(ParamType::Str))
                    .sync(|_| Ok(ArgValue::from("A"))),
            )
            .unwrap();
        assert!(matches!(targets.check(), Err(TargetError::WrongReturnType { .. })));
        assert!(matches!(targets.list(None), Err(TargetError::WrongReturnType { .. })));

        targets.reset();
        assert!(!targets.is_registered());
    }

    #[test]
    fn rejects_coroutines_and_failing_bodies() {
        let targets = TargetEnumerator::new();
        let coroutine = Callable::function("app", "targets")
            .returns(ReturnType::List)
            .coroutine(|_| async { Ok(()) });
        assert!(matches!(
            targets.register(coroutine),
            Err(TargetError::NotAFunction { shape, .. }) if shape == "coroutine"
        ));

        targets
            .register(
                Callable::function("app", "targets")
                    .returns(ReturnType::List)
                    .sync(|_| Err(anyhow::anyhow!("backend down"))),
            )
            .unwrap();
        assert!(matches!(
            targets.list(None),
            Err(TargetError::Invocation { message, .. }) if message == "backend down"
        ));
    }

    #[test]
    fn target_list_sorts_and_deduplicates() {
        let list: TargetList = vec!["DEF", "ABC", "DEF"].into_iter().map(ArgValue::from).collect();
        assert_eq!(list.as_slice(), &[ArgValue::from("ABC"), ArgValue::from("DEF")]);
        assert_eq!(list.position_of(&ArgValue::from("DEF")), Some(1));
        assert_eq!(list.position_of(&ArgValue::from("XYZ")), None);
    }

    #[test]
    fn cursor_only_moves_forward() {
        let list: TargetList = ["A", "B", "C"].into_iter().map(ArgValue::from).collect();
        let mut cursor = list.cursor();
        assert_eq!(cursor.seek(&ArgValue::from("B")), Some(1));
        assert_eq!(cursor.seek(&ArgValue::from("B")), Some(1));
        assert_eq!(cursor.seek(&ArgValue::from("A")), None);
        assert_eq!(cursor.seek(&ArgValue::from("C")), Some(2));
    }

    proptest! {
        #[test]
        fn target_list_is_strictly_ascending(raw in proptest::collection::vec(-50i64..50, 0..40)) {
            let list: TargetList = raw.iter().copied().map(ArgValue::from).collect();
            prop_assert!(list.as_slice().windows(2).all(|w| w[0] < w[1]));
            for value in &raw {
                let pos = list.position_of(&ArgValue::from(*value));
                prop_assert!(pos.is_some());
            }
        }

        #[test]
        fn cursor_positions_are_monotonic(mut raw in proptest::collection::vec(0i64..20, 1..30)) {
            let list: TargetList = raw.iter().copied().map(ArgValue::from).collect();
            raw.sort();
            let mut cursor = list.cursor();
            let mut last = 0;
            for value in raw {
                let pos = cursor.seek(&ArgValue::from(value));
                prop_assert!(pos.is_some());
                let pos = pos.unwrap_or_default();
                prop_assert!(pos >= last);
                prop_assert_eq!(list.get(pos), Some(&ArgValue::from(value)));
                last = pos;
            }
        }
    }
}
