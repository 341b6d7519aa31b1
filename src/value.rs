//! Dynamic argument values, owner type tokens and receivers.
//!
//! [`ArgValue`] is what flows through bound arguments, parameter defaults
//! and target lists. It carries a total order so that any list of targets
//! can be sorted, whatever the mix of variants.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Identity of a Rust type acting as the owner of a method.
///
/// # Examples
///
/// ```
/// use taskboard::value::TypeToken;
///
/// struct Process;
///
/// let token = TypeToken::of::<Process>();
/// assert_eq!(token.short_name(), "Process");
/// assert!(token.is::<Process>());
/// ```
#[derive(Clone, Copy)]
pub struct TypeToken {
    id: TypeId,
    name: &'static str,
}

impl TypeToken {
    /// Token for `T`.
    pub fn of<T: Any + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name (generics stripped).
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// Returns `true` if this token stands for `T`.
    pub fn is<T: Any + ?Sized>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// The underlying [`TypeId`].
    pub fn type_id(&self) -> TypeId {
        self.id
    }
}

impl PartialEq for TypeToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeToken {}

impl Hash for TypeToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A process-held instance handed to instance methods as their receiver.
///
/// Two receivers are equal when they point at the same instance.
#[derive(Clone)]
pub struct Receiver {
    instance: Arc<dyn Any + Send + Sync>,
    token: TypeToken,
}

impl Receiver {
    /// Wraps a shared instance.
    pub fn new<T: Any + Send + Sync>(instance: Arc<T>) -> Self {
        Self {
            instance,
            token: TypeToken::of::<T>(),
        }
    }

    /// Type of the wrapped instance.
    pub fn type_token(&self) -> TypeToken {
        self.token
    }

    /// Returns the concrete instance if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.instance).downcast::<T>().ok()
    }

    /// Returns `true` if the instance is of the given owner type.
    pub fn is_instance_of(&self, owner: &TypeToken) -> bool {
        self.token == *owner
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.instance) as *const () as usize
    }
}

impl PartialEq for Receiver {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Receiver {}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} instance at {:#x}>", self.token.short_name(), self.addr())
    }
}

/// A dynamically typed argument, default or target value.
///
/// # Ordering
///
/// Values of different variants order by variant rank
/// (`Null < Bool < Int/Float < Str < Date < DateTime < List < Json <
/// Receiver < Type`); integers and floats compare numerically with each
/// other.
///
/// # Examples
///
/// ```
/// use taskboard::value::ArgValue;
///
/// let mut targets = vec![ArgValue::from("XYZ"), ArgValue::from("ABC")];
/// targets.sort();
/// assert_eq!(targets, vec![ArgValue::from("ABC"), ArgValue::from("XYZ")]);
/// assert!(ArgValue::from(2) < ArgValue::from(2.5));
/// ```
#[derive(Clone, Debug)]
pub enum ArgValue {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time without zone.
    DateTime(NaiveDateTime),
    /// Ordered sequence.
    List(Vec<ArgValue>),
    /// Arbitrary structured value.
    Json(Value),
    /// Instance bound to an instance method.
    Receiver(Receiver),
    /// Owner type bound to a class method.
    Type(TypeToken),
}

impl ArgValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Str(_) => 3,
            Self::Date(_) => 4,
            Self::DateTime(_) => 5,
            Self::List(_) => 6,
            Self::Json(_) => 7,
            Self::Receiver(_) => 8,
            Self::Type(_) => 9,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
            Self::List(_) => "list",
            Self::Json(_) => "json",
            Self::Receiver(_) => "receiver",
            Self::Type(_) => "type",
        }
    }

    /// Borrows the string, if this is a [`ArgValue::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is an [`ArgValue::Int`].
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a float for both numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the boolean, if this is a [`ArgValue::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the date, if this is a [`ArgValue::Date`].
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the date-time, if this is a [`ArgValue::DateTime`].
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrows the elements, if this is a [`ArgValue::List`].
    pub fn as_list(&self) -> Option<&[ArgValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrows the receiver, if this is a [`ArgValue::Receiver`].
    pub fn as_receiver(&self) -> Option<&Receiver> {
        match self {
            Self::Receiver(r) => Some(r),
            _ => None,
        }
    }

    /// Renders the value as JSON for presentation layers.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(v) => Value::Bool(*v),
            Self::Int(v) => Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Str(s) => Value::String(s.clone()),
            Self::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Self::DateTime(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Json(v) => v.clone(),
            Self::Receiver(r) => Value::String(format!("{r:?}")),
            Self::Type(t) => Value::String(format!("<class {t}>")),
        }
    }
}

impl PartialEq for ArgValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ArgValue {}

impl PartialOrd for ArgValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArgValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => cmp_floats(*a, *b),
            (Self::Int(a), Self::Float(b)) => cmp_int_float(i128::from(*a), *b),
            (Self::Float(a), Self::Int(b)) => cmp_int_float(i128::from(*b), *a).reverse(),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Json(a), Self::Json(b)) => cmp_json(a, b),
            (Self::Receiver(a), Self::Receiver(b)) => a.addr().cmp(&b.addr()),
            (Self::Type(a), Self::Type(b)) => a.name().cmp(b.name()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Floats order by `total_cmp`, except that both zeros are equal.
fn cmp_floats(a: f64, b: f64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Exact comparison of an integer with a float.
///
/// Positive NaNs sort above every number, negative NaNs below.
fn cmp_int_float(i: i128, f: f64) -> Ordering {
    // 2^127: every float of smaller magnitude truncates to an exact i128.
    const LIMIT: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

    if f.is_nan() {
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i128)) {
        Ordering::Equal => cmp_floats(0.0, f - whole),
        unequal => unequal,
    }
}

#[derive(Clone, Copy)]
enum JsonNumber {
    Int(i128),
    Float(f64),
}

impl From<&serde_json::Number> for JsonNumber {
    fn from(n: &serde_json::Number) -> Self {
        if let Some(i) = n.as_i64() {
            Self::Int(i128::from(i))
        } else if let Some(u) = n.as_u64() {
            Self::Int(i128::from(u))
        } else {
            Self::Float(n.as_f64().unwrap_or(f64::NAN))
        }
    }
}

fn json_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Structural order over JSON values.
///
/// Objects compare entry by entry in stored order, so an object behaves
/// like a record ordered field by field.
fn cmp_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (JsonNumber::from(x), JsonNumber::from(y)) {
            (JsonNumber::Int(x), JsonNumber::Int(y)) => x.cmp(&y),
            (JsonNumber::Int(x), JsonNumber::Float(y)) => cmp_int_float(x, y),
            (JsonNumber::Float(x), JsonNumber::Int(y)) => cmp_int_float(y, x).reverse(),
            (JsonNumber::Float(x), JsonNumber::Float(y)) => cmp_floats(x, y),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => cmp_sequences(x.iter(), y.iter(), cmp_json),
        (Value::Object(x), Value::Object(y)) => cmp_sequences(x.iter(), y.iter(), |(ka, va), (kb, vb)| {
            ka.cmp(kb).then_with(|| cmp_json(va, vb))
        }),
        _ => json_rank(a).cmp(&json_rank(b)),
    }
}

fn cmp_sequences<T, I, F>(mut a: I, mut b: I, mut cmp: F) -> Ordering
where
    I: Iterator<Item = T>,
    F: FnMut(T, T) -> Ordering,
{
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match cmp(x, y) {
                Ordering::Equal => {},
                unequal => return unequal,
            },
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("None"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            },
            Self::Json(v) => write!(f, "{v}"),
            Self::Receiver(r) => write!(f, "{r:?}"),
            Self::Type(t) => write!(f, "<class {t}>"),
        }
    }
}

impl Serialize for ArgValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<NaiveDate> for ArgValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for ArgValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<Value> for ArgValue {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

impl From<Receiver> for ArgValue {
    fn from(v: Receiver) -> Self {
        Self::Receiver(v)
    }
}

impl From<TypeToken> for ArgValue {
    fn from(v: TypeToken) -> Self {
        Self::Type(v)
    }
}

impl<T: Into<ArgValue>> From<Vec<T>> for ArgValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
