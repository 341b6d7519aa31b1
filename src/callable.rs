//! Callable declarations, bodies and argument binding.
//!
//! A [`Callable`] pairs an explicit declaration (owner type, binding marker,
//! parameters, return type) with the body that runs it. Nothing is derived
//! by reflection: the owner is stated at construction time.
//!
//! # Examples
//!
//! ```
//! use taskboard::callable::Callable;
//! use taskboard::params::{ParamType, ReturnType};
//!
//! struct Process;
//!
//! let ping = Callable::method::<Process>(module_path!(), "ping")
//!     .param("id", ParamType::Str)
//!     .param_with_default("msg", ParamType::Str, "PING")
//!     .param_with_default("sleep", ParamType::Int, 10)
//!     .returns(ReturnType::Unit)
//!     .coroutine(|args| async move {
//!         let _id = args.get_str("id").unwrap_or_default().to_string();
//!         Ok(())
//!     });
//!
//! assert_eq!(ping.qualified_name(), "Process::ping");
//! assert_eq!(ping.params().len(), 4);
//! assert!(ping.is_coroutine());
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;

use crate::error::BindError;
use crate::params::{ParamDescriptor, ParamType, ReturnType};
use crate::value::{ArgValue, Receiver, TypeToken};

/// Future produced by an asynchronous body.
pub type WorkFuture = BoxFuture<'static, anyhow::Result<()>>;

type AsyncBody = Arc<dyn Fn(BoundArguments) -> WorkFuture + Send + Sync>;
type SyncBody = Arc<dyn Fn(&BoundArguments) -> anyhow::Result<ArgValue> + Send + Sync>;

/// Name of the implicit instance receiver parameter.
pub const RECEIVER_PARAM: &str = "self";
/// Name of the implicit class receiver parameter.
pub const CLASS_PARAM: &str = "cls";

/// Explicit binding marker carried by an owned callable's declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Marker {
    /// No marker: classified from its first parameter.
    #[default]
    None,
    /// Bound to the owner type itself.
    Class,
    /// No implicit receiver.
    Static,
}

#[derive(Clone)]
enum Body {
    Async(AsyncBody),
    Sync(SyncBody),
}

/// A declared callable together with its body.
#[derive(Clone)]
pub struct Callable {
    module: String,
    name: String,
    owner: Option<TypeToken>,
    marker: Marker,
    params: Vec<ParamDescriptor>,
    return_type: ReturnType,
    body: Option<Body>,
}

impl Callable {
    fn declare(module: &str, name: &str, owner: Option<TypeToken>, marker: Marker) -> Self {
        Self {
            module: module.to_string(),
            name: name.to_string(),
            owner,
            marker,
            params: Vec::new(),
            return_type: ReturnType::Unannotated,
            body: None,
        }
    }

    /// Declares a free function.
    pub fn function(module: &str, name: &str) -> Self {
        Self::declare(module, name, None, Marker::None)
    }

    /// Declares an instance method of `T` (implicit `self` parameter).
    pub fn method<T: 'static>(module: &str, name: &str) -> Self {
        Self::associated::<T>(module, name).param(RECEIVER_PARAM, ParamType::Unannotated)
    }

    /// Declares a class method of `T` (implicit `cls` parameter).
    pub fn class_method<T: 'static>(module: &str, name: &str) -> Self {
        Self::declare(module, name, Some(TypeToken::of::<T>()), Marker::Class)
            .param(CLASS_PARAM, ParamType::Unannotated)
    }

    /// Declares a static method of `T` (no implicit receiver).
    pub fn static_method<T: 'static>(module: &str, name: &str) -> Self {
        Self::declare(module, name, Some(TypeToken::of::<T>()), Marker::Static)
    }

    /// Declares an unmarked callable scoped to `T`.
    ///
    /// It is an instance method if its first parameter is `self`, a static
    /// method otherwise.
    pub fn associated<T: 'static>(module: &str, name: &str) -> Self {
        Self::declare(module, name, Some(TypeToken::of::<T>()), Marker::None)
    }

    /// Appends a required parameter.
    ///
    /// On an owned callable, a first parameter named `self` (unmarked) or
    /// `cls` (class-marked) is the implicit receiver binding.
    pub fn param(self, name: &str, ty: ParamType) -> Self {
        self.push_param(name, ty, None)
    }

    /// Appends a parameter with a default value.
    pub fn param_with_default(self, name: &str, ty: ParamType, default: impl Into<ArgValue>) -> Self {
        self.push_param(name, ty, Some(default.into()))
    }

    fn push_param(mut self, name: &str, ty: ParamType, default: Option<ArgValue>) -> Self {
        let position = self.params.len();
        let implicit = position == 0
            && self.owner.is_some()
            && match self.marker {
                Marker::None => name == RECEIVER_PARAM,
                Marker::Class => name == CLASS_PARAM,
                Marker::Static => false,
            };
        self.params.push(ParamDescriptor {
            name: name.to_string(),
            ty,
            default,
            position,
            implicit,
        });
        self
    }

    /// Sets the declared return type.
    pub fn returns(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    /// Attaches an asynchronous body.
    pub fn coroutine<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(BoundArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: AsyncBody = Arc::new(move |args: BoundArguments| -> WorkFuture { Box::pin(f(args)) });
        self.body = Some(Body::Async(body));
        self
    }

    /// Attaches a synchronous body.
    pub fn sync<F>(mut self, f: F) -> Self
    where
        F: Fn(&BoundArguments) -> anyhow::Result<ArgValue> + Send + Sync + 'static,
    {
        self.body = Some(Body::Sync(Arc::new(f)));
        self
    }

    /// Wraps the asynchronous body, keeping the declaration untouched.
    ///
    /// Synchronous bodies are left as they are.
    pub fn wrap<W>(mut self, wrapper: W) -> Self
    where
        W: Fn(WorkFuture) -> WorkFuture + Send + Sync + 'static,
    {
        if let Some(Body::Async(inner)) = &self.body {
            let inner = Arc::clone(inner);
            let body: AsyncBody =
                Arc::new(move |args: BoundArguments| -> WorkFuture { wrapper(inner(args)) });
            self.body = Some(Body::Async(body));
        }
        self
    }

    /// Declaring module path.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Own name, without the owner prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Owner::name` for owned callables, `name` otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}::{}", owner.short_name(), self.name),
            None => self.name.clone(),
        }
    }

    /// Like [`Callable::qualified_name`], with the owner's full type path.
    pub fn full_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}::{}", owner.name(), self.name),
            None => self.name.clone(),
        }
    }

    /// Owner type, if any.
    pub fn owner(&self) -> Option<TypeToken> {
        self.owner
    }

    /// Binding marker.
    pub fn marker(&self) -> Marker {
        self.marker
    }

    /// All parameters in declaration order, implicit receiver included.
    pub fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }

    /// Declared return type.
    pub fn return_type(&self) -> &ReturnType {
        &self.return_type
    }

    /// Returns `true` if a body is attached.
    pub fn is_callable(&self) -> bool {
        self.body.is_some()
    }

    /// Returns `true` if the body is asynchronous.
    pub fn is_coroutine(&self) -> bool {
        matches!(self.body, Some(Body::Async(_)))
    }

    fn implicit_param(&self) -> Option<&ParamDescriptor> {
        self.params.first().filter(|p| p.implicit)
    }

    /// Binds call arguments to the full parameter list.
    ///
    /// The receiver (instance for methods, owner type for class methods) is
    /// bound to the implicit parameter; class methods get their owner type
    /// when no receiver is given. Positional arguments fill explicit
    /// parameters in order, keywords fill by name, and defaults fill the
    /// rest.
    ///
    /// # Errors
    ///
    /// Returns a [`BindError`] for surplus positional arguments, unknown or
    /// duplicate keywords, missing required values, or a receiver mismatch.
    pub fn bind(
        &self,
        receiver: Option<ArgValue>,
        positional: Vec<ArgValue>,
        keyword: IndexMap<String, ArgValue>,
    ) -> Result<BoundArguments, BindError> {
        let callable = self.qualified_name();
        let mut bound = IndexMap::with_capacity(self.params.len());

        match (self.implicit_param(), receiver) {
            (Some(param), Some(value)) => {
                bound.insert(param.name.clone(), value);
            },
            (Some(param), None) if self.marker == Marker::Class => {
                if let Some(owner) = self.owner {
                    bound.insert(param.name.clone(), ArgValue::Type(owner));
                }
            },
            (Some(_), None) => return Err(BindError::MissingReceiver { callable }),
            (None, Some(_)) => return Err(BindError::UnexpectedReceiver { callable }),
            (None, None) => {},
        }

        let explicit: Vec<&ParamDescriptor> = self.params.iter().filter(|p| !p.implicit).collect();
        if positional.len() > explicit.len() {
            return Err(BindError::TooManyPositional {
                callable,
                expected: explicit.len(),
                given: positional.len(),
            });
        }

        let mut values: IndexMap<String, ArgValue> = IndexMap::with_capacity(explicit.len());
        for (param, value) in explicit.iter().zip(positional) {
            values.insert(param.name.clone(), value);
        }
        for (name, value) in keyword {
            if !explicit.iter().any(|p| p.name == name) {
                return Err(BindError::UnknownArgument { callable, name });
            }
            if values.contains_key(&name) {
                return Err(BindError::DuplicateArgument { callable, name });
            }
            values.insert(name, value);
        }

        for param in explicit {
            let value = match values.swap_remove(&param.name) {
                Some(value) => value,
                None => match &param.default {
                    Some(default) => default.clone(),
                    None => {
                        return Err(BindError::MissingArgument {
                            callable,
                            name: param.name.clone(),
                        })
                    },
                },
            };
            bound.insert(param.name.clone(), value);
        }

        Ok(BoundArguments(bound))
    }

    /// Starts the asynchronous body, or `None` for synchronous callables.
    pub fn call_async(&self, args: BoundArguments) -> Option<WorkFuture> {
        match &self.body {
            Some(Body::Async(body)) => Some(body(args)),
            _ => None,
        }
    }

    /// Runs the synchronous body, or `None` for asynchronous callables.
    pub fn call_sync(&self, args: &BoundArguments) -> Option<anyhow::Result<ArgValue>> {
        match &self.body {
            Some(Body::Sync(body)) => Some(body(args)),
            _ => None,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match self.body {
            Some(Body::Async(_)) => "async",
            Some(Body::Sync(_)) => "sync",
            None => "none",
        };
        f.debug_struct("Callable")
            .field("module", &self.module)
            .field("name", &self.qualified_name())
            .field("marker", &self.marker)
            .field("params", &self.params)
            .field("return_type", &self.return_type)
            .field("body", &body)
            .finish()
    }
}

/// Ordered mapping from parameter name to the value a task was created with.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct BoundArguments(IndexMap<String, ArgValue>);

impl BoundArguments {
    /// Value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    /// String bound to `name`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ArgValue::as_str)
    }

    /// Integer bound to `name`.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ArgValue::as_i64)
    }

    /// Number bound to `name`.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ArgValue::as_f64)
    }

    /// Boolean bound to `name`.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ArgValue::as_bool)
    }

    /// Date bound to `name`.
    pub fn get_date(&self, name: &str) -> Option<NaiveDate> {
        self.get(name).and_then(ArgValue::as_date)
    }

    /// Date-time bound to `name`.
    pub fn get_datetime(&self, name: &str) -> Option<NaiveDateTime> {
        self.get(name).and_then(ArgValue::as_datetime)
    }

    /// The instance bound to `self`, downcast to `T`.
    pub fn receiver<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.get(RECEIVER_PARAM)
            .and_then(ArgValue::as_receiver)
            .and_then(Receiver::downcast::<T>)
    }

    /// Returns `true` if `name` is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of bound parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates in declaration order.
    pub fn iter(&self) -> indexmap::map::Iter<'_, String, ArgValue> {
        self.0.iter()
    }

    /// Parameter names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Copy without the given parameters.
    pub fn without<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut copy = self.0.clone();
        for name in names {
            copy.shift_remove(name);
        }
        Self(copy)
    }

    /// Consumes the wrapper.
    pub fn into_inner(self) -> IndexMap<String, ArgValue> {
        self.0
    }
}

impl From<IndexMap<String, ArgValue>> for BoundArguments {
    fn from(map: IndexMap<String, ArgValue>) -> Self {
        Self(map)
    }
}

impl<'a> IntoIterator for &'a BoundArguments {
    type Item = (&'a String, &'a ArgValue);
    type IntoIter = indexmap::map::Iter<'a, String, ArgValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
