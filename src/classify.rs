//! Callable classification.
//!
//! [`classify`] decides which of the four supported shapes a [`Callable`]
//! has. The owner type is part of the declaration, so classification is a
//! pure function of the declared markers and parameters:
//!
//! 1. no owner type: [`CallableShape::Function`]
//! 2. class-marked: [`CallableShape::ClassMethod`]
//! 3. static-marked: [`CallableShape::StaticMethod`]
//! 4. first parameter is not the `self` receiver: [`CallableShape::StaticMethod`]
//! 5. otherwise: [`CallableShape::InstanceMethod`]
//!
//! Bodies replaced through [`Callable::wrap`] keep their declaration, so a
//! wrapped callable classifies exactly like the original.

use std::collections::HashSet;
use std::fmt;

use crate::callable::{Callable, Marker};
use crate::error::ClassifyError;
use crate::params::{ParamDescriptor, ReturnType};
use crate::value::TypeToken;

/// Shape of a callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallableShape {
    /// Free function.
    Function,
    /// Method taking an instance receiver.
    InstanceMethod {
        /// Owning type.
        owner: TypeToken,
    },
    /// Method without receiver.
    StaticMethod {
        /// Owning type.
        owner: TypeToken,
    },
    /// Method bound to the owning type itself.
    ClassMethod {
        /// Owning type.
        owner: TypeToken,
    },
}

impl CallableShape {
    /// Owning type, `None` for free functions.
    pub fn owner(&self) -> Option<TypeToken> {
        match self {
            Self::Function => None,
            Self::InstanceMethod { owner }
            | Self::StaticMethod { owner }
            | Self::ClassMethod { owner } => Some(*owner),
        }
    }

    /// Returns `true` for instance methods.
    pub fn needs_receiver(&self) -> bool {
        matches!(self, Self::InstanceMethod { .. })
    }

    /// Lowercase label: `function`, `method`, `static method`, `class method`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::InstanceMethod { .. } => "method",
            Self::StaticMethod { .. } => "static method",
            Self::ClassMethod { .. } => "class method",
        }
    }

    /// Description of a method and its owner, `None` for free functions.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskboard::classify::CallableShape;
    /// use taskboard::value::TypeToken;
    ///
    /// struct Process;
    ///
    /// let shape = CallableShape::StaticMethod { owner: TypeToken::of::<Process>() };
    /// assert_eq!(shape.type_info().as_deref(), Some("static method of class Process"));
    /// assert_eq!(CallableShape::Function.type_info(), None);
    /// ```
    pub fn type_info(&self) -> Option<String> {
        self.owner()
            .map(|owner| format!("{} of class {}", self.label(), owner))
    }
}

impl fmt::Display for CallableShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_info() {
            Some(info) => f.write_str(&info),
            None => f.write_str(self.label()),
        }
    }
}

/// Result of classifying a callable.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// The shape.
    pub shape: CallableShape,
    /// All parameters, implicit receiver included.
    pub params: Vec<ParamDescriptor>,
    /// Declared return type.
    pub return_type: ReturnType,
}

impl Classification {
    /// Parameters a caller supplies (implicit receiver excluded).
    pub fn declared_params(&self) -> impl Iterator<Item = &ParamDescriptor> {
        self.params.iter().filter(|p| !p.implicit)
    }

    /// Number of parameters a caller supplies.
    pub fn declared_count(&self) -> usize {
        self.declared_params().count()
    }

    /// The implicit receiver parameter, if any.
    pub fn implicit_param(&self) -> Option<&ParamDescriptor> {
        self.params.first().filter(|p| p.implicit)
    }

    /// Looks up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamDescriptor> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Classifies a callable.
///
/// # Errors
///
/// - [`ClassifyError::NotCallable`] if no body is attached.
/// - [`ClassifyError::UnsupportedCallable`] if the module path or name does
///   not resolve to a module-level item (nested local scopes included), or if
///   parameter names repeat.
///
/// # Examples
///
/// ```
/// use taskboard::callable::Callable;
/// use taskboard::classify::{classify, CallableShape};
/// use taskboard::params::ParamType;
/// use taskboard::value::TypeToken;
///
/// struct Process;
///
/// let c = Callable::class_method::<Process>("app", "targets").sync(|_| Ok(vec!["A"].into()));
/// let class = classify(&c).unwrap();
/// assert_eq!(class.shape, CallableShape::ClassMethod { owner: TypeToken::of::<Process>() });
/// assert_eq!(class.declared_count(), 0);
/// assert_eq!(class.params.len(), 1);
/// ```
pub fn classify(callable: &Callable) -> Result<Classification, ClassifyError> {
    let name = callable.qualified_name();
    if !callable.is_callable() {
        return Err(ClassifyError::NotCallable { name });
    }

    resolve_path(callable.module(), callable.name()).map_err(|reason| {
        ClassifyError::UnsupportedCallable {
            name: name.clone(),
            reason,
        }
    })?;

    let mut seen = HashSet::new();
    if let Some(dup) = callable.params().iter().find(|p| !seen.insert(p.name.as_str())) {
        return Err(ClassifyError::UnsupportedCallable {
            name,
            reason: format!("duplicate parameter \"{}\"", dup.name),
        });
    }

    let shape = match callable.owner() {
        None => CallableShape::Function,
        Some(owner) => match callable.marker() {
            Marker::Class => CallableShape::ClassMethod { owner },
            Marker::Static => CallableShape::StaticMethod { owner },
            Marker::None if !callable.params().first().is_some_and(|p| p.implicit) => {
                CallableShape::StaticMethod { owner }
            },
            Marker::None => CallableShape::InstanceMethod { owner },
        },
    };

    Ok(Classification {
        shape,
        params: callable.params().to_vec(),
        return_type: callable.return_type().clone(),
    })
}

fn resolve_path(module: &str, name: &str) -> Result<(), String> {
    if module.is_empty() {
        return Err("no declaring module".to_string());
    }
    for segment in module.split("::").chain(name.split("::")) {
        if segment == "<locals>" || segment == "{{closure}}" {
            return Err("classes / functions nested inside functions are not supported".to_string());
        }
        if !is_identifier(segment) {
            return Err(format!("\"{segment}\" is not a valid path segment"));
        }
    }
    if name.contains("::") {
        return Err("declare the owner type instead of a qualified name".to_string());
    }
    Ok(())
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}
