//! Parameter descriptors, declared types and string conversion.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::error::ConversionError;
use crate::value::ArgValue;

type ParseFn = Arc<dyn Fn(&str) -> Result<ArgValue, String> + Send + Sync>;

/// Declared type of a parameter.
///
/// [`ParamType::Unannotated`] is the distinguished "no declared type" value:
/// a descriptor always has a type, it may just be this one.
#[derive(Clone)]
pub enum ParamType {
    /// No type was declared.
    Unannotated,
    /// `bool`.
    Bool,
    /// `i64`.
    Int,
    /// `f64`.
    Float,
    /// `String`.
    Str,
    /// ISO-8601 calendar date.
    Date,
    /// ISO-8601 date and time.
    DateTime,
    /// Any other type, converted with its own single-string constructor.
    Custom {
        /// Type name shown to operators.
        name: String,
        /// Conversion from the string form.
        parse: ParseFn,
    },
}

impl ParamType {
    /// Declares a custom type converted through [`FromStr`].
    ///
    /// # Examples
    ///
    /// ```
    /// use taskboard::params::ParamType;
    /// use taskboard::value::ArgValue;
    ///
    /// let ty = ParamType::parsed::<u32>("u32");
    /// assert_eq!(ty.parse_str("port", "8080").unwrap(), ArgValue::from(8080u32));
    /// assert!(ty.parse_str("port", "-1").is_err());
    /// ```
    pub fn parsed<T>(name: impl Into<String>) -> Self
    where
        T: FromStr + Into<ArgValue> + 'static,
        T::Err: fmt::Display,
    {
        Self::Custom {
            name: name.into(),
            parse: Arc::new(|raw: &str| raw.parse::<T>().map(Into::into).map_err(|e| e.to_string())),
        }
    }

    /// Declares a custom type with an explicit conversion function.
    pub fn custom<F>(name: impl Into<String>, parse: F) -> Self
    where
        F: Fn(&str) -> Result<ArgValue, String> + Send + Sync + 'static,
    {
        Self::Custom {
            name: name.into(),
            parse: Arc::new(parse),
        }
    }

    /// Returns `false` only for [`ParamType::Unannotated`].
    pub fn is_annotated(&self) -> bool {
        !matches!(self, Self::Unannotated)
    }

    /// Name of the declared type.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Unannotated => "<unannotated>",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Custom { name, .. } => name,
        }
    }

    /// Form-field hint for this type.
    pub fn input_kind(&self) -> InputKind {
        match self {
            Self::Int | Self::Float => InputKind::Number,
            Self::Date => InputKind::Date,
            Self::DateTime => InputKind::DateTimeLocal,
            _ => InputKind::Text,
        }
    }

    /// Converts a string-encoded value to this type.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] when the string does not parse, or when
    /// the parameter has no declared type.
    pub fn parse_str(&self, param: &str, raw: &str) -> Result<ArgValue, ConversionError> {
        let fail = |reason: String| ConversionError {
            param: param.to_string(),
            type_name: self.type_name().to_string(),
            value: raw.to_string(),
            reason,
        };
        let trimmed = raw.trim();
        match self {
            Self::Unannotated => Err(fail("parameter has no declared type".to_string())),
            Self::Bool => trimmed
                .parse::<bool>()
                .map(ArgValue::Bool)
                .map_err(|e| fail(e.to_string())),
            Self::Int => trimmed
                .parse::<i64>()
                .map(ArgValue::Int)
                .map_err(|e| fail(e.to_string())),
            Self::Float => trimmed
                .parse::<f64>()
                .map(ArgValue::Float)
                .map_err(|e| fail(e.to_string())),
            Self::Str => Ok(ArgValue::Str(raw.to_string())),
            Self::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(ArgValue::Date)
                .map_err(|e| fail(e.to_string())),
            Self::DateTime => parse_datetime(trimmed)
                .map(ArgValue::DateTime)
                .ok_or_else(|| fail("expected an ISO-8601 date-time".to_string())),
            Self::Custom { parse, .. } => parse(raw).map_err(fail),
        }
    }
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

impl PartialEq for ParamType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Custom { name: a, .. }, Self::Custom { name: b, .. }) => a == b,
            (Self::Custom { .. }, _) | (_, Self::Custom { .. }) => false,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
            other => f.write_str(other.type_name()),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// HTML input type hint for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputKind {
    /// `<input type="number">`
    Number,
    /// `<input type="date">`
    Date,
    /// `<input type="datetime-local">`
    #[serde(rename = "datetime-local")]
    DateTimeLocal,
    /// `<input type="text">`
    Text,
}

impl InputKind {
    /// The HTML `type` attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Date => "date",
            Self::DateTimeLocal => "datetime-local",
            Self::Text => "text",
        }
    }
}

/// Declared return type of a callable.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ReturnType {
    /// No return type was declared.
    #[default]
    Unannotated,
    /// Returns nothing.
    Unit,
    /// Returns an ordered sequence.
    List,
    /// Returns a single value of the given type.
    Value(ParamType),
}

impl ReturnType {
    /// Returns `true` for an ordered-sequence return type.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::List)
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unannotated => f.write_str("<unannotated>"),
            Self::Unit => f.write_str("()"),
            Self::List => f.write_str("list"),
            Self::Value(ty) => write!(f, "{ty}"),
        }
    }
}

/// One declared parameter of a callable.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescriptor {
    /// Parameter name, unique within its callable.
    pub name: String,
    /// Declared type.
    pub ty: ParamType,
    /// Value used when the caller omits the parameter.
    pub default: Option<ArgValue>,
    /// Zero-based position in the declaration, receiver included.
    pub position: usize,
    /// `true` for the implicit `self` / `cls` binding parameter.
    pub implicit: bool,
}

impl ParamDescriptor {
    /// Returns `true` if the caller must supply a value.
    pub fn is_required(&self) -> bool {
        !self.implicit && self.default.is_none()
    }

    /// Form-field hint for this parameter.
    pub fn input_kind(&self) -> InputKind {
        self.ty.input_kind()
    }
}
