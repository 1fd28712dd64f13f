//! In-memory model of a structured value.
//!
//! [`Value`] covers everything the wire format can carry plus the two
//! constructs it refuses (`Function`, `Symbol`), so callers can build any
//! message shape and let the codec decide what is cloneable.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A non-structural object owned by the host (for example a crypto key).
///
/// Host objects are never encoded structurally; a registered
/// [`HostObjectHook`](crate::HostObjectHook) must claim them.
pub trait HostObject: fmt::Debug + Send + Sync + 'static {
    /// Name used in clone error messages, e.g. `CryptoKey`.
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// Structural equality against another host object of any type.
    fn host_eq(&self, other: &dyn HostObject) -> bool;
}

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int32(i32),
    Uint32(u32),
    Double(f64),
    BigInt(i128),
    String(String),
    /// Milliseconds since the Unix epoch
    Date(f64),
    Array(Vec<Value>),
    /// Own enumerable properties in insertion order
    Object(Vec<(String, Value)>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    ArrayBuffer(ArrayBuffer),
    SharedArrayBuffer(SharedArrayBuffer),
    Host(Arc<dyn HostObject>),
    /// Not cloneable; carries the function name for error messages
    Function(String),
    /// Not cloneable; carries the symbol description
    Symbol(String),
}

impl Value {
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn host<T: HostObject>(object: T) -> Self {
        Value::Host(Arc::new(object))
    }

    /// Composite values are the ones host-object hooks get a chance to claim.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Value::Array(_) | Value::Object(_) | Value::Map(_) | Value::Set(_) | Value::Host(_)
        )
    }

    /// Look up an own property of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Downcast a host object value to its concrete type.
    pub fn as_host<T: HostObject>(&self) -> Option<&T> {
        match self {
            Value::Host(object) => object.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Short description of the value as used in clone error messages.
    pub fn describe(&self) -> String {
        match self {
            Value::Function(name) if name.is_empty() => "function () {}".to_string(),
            Value::Function(name) => format!("function {name}() {{}}"),
            Value::Symbol(desc) => format!("Symbol({desc})"),
            Value::Host(object) => format!("#<{}>", object.type_name()),
            Value::Array(_) => "#<Array>".to_string(),
            Value::Map(_) => "#<Map>".to_string(),
            Value::Set(_) => "#<Set>".to_string(),
            Value::ArrayBuffer(_) => "#<ArrayBuffer>".to_string(),
            Value::SharedArrayBuffer(_) => "#<SharedArrayBuffer>".to_string(),
            _ => "#<Object>".to_string(),
        }
    }

    /// String conversion used for error messages: `Error`-shaped objects
    /// render as `name: message`, strings render verbatim.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int32(n) => n.to_string(),
            Value::Uint32(n) => n.to_string(),
            Value::Double(n) => n.to_string(),
            Value::BigInt(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Object(_) => match (self.get("name"), self.get("message")) {
                (Some(Value::String(name)), Some(Value::String(message))) => {
                    format!("{name}: {message}")
                }
                (None, Some(Value::String(message))) => format!("Error: {message}"),
                _ => "[object Object]".to_string(),
            },
            other => other.describe(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Uint32(a), Value::Uint32(b)) => a == b,
            (Value::Double(a), Value::Double(b)) | (Value::Date(a), Value::Date(b)) => {
                a == b || (a.is_nan() && b.is_nan())
            }
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) | (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::ArrayBuffer(a), Value::ArrayBuffer(b)) => a == b,
            (Value::SharedArrayBuffer(a), Value::SharedArrayBuffer(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => a.host_eq(b.as_ref()),
            (Value::Function(a), Value::Function(b)) | (Value::Symbol(a), Value::Symbol(b)) => {
                a == b
            }
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int32(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A transferable byte buffer. Transferring it detaches every handle that
/// shares the same backing store.
#[derive(Clone, Default)]
pub struct ArrayBuffer {
    // None once detached
    inner: Arc<Mutex<Option<Vec<u8>>>>,
}

impl ArrayBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(bytes))),
        }
    }

    /// Zero once detached.
    pub fn byte_length(&self) -> usize {
        lock(&self.inner).as_ref().map_or(0, Vec::len)
    }

    pub fn is_detached(&self) -> bool {
        lock(&self.inner).is_none()
    }

    pub fn to_vec(&self) -> Option<Vec<u8>> {
        lock(&self.inner).clone()
    }

    /// Take the backing store, leaving this buffer (and all its clones) detached.
    pub fn detach(&self) -> Option<Vec<u8>> {
        lock(&self.inner).take()
    }

    /// True if both handles refer to the same backing store.
    pub fn same_buffer(&self, other: &ArrayBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ArrayBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.same_buffer(other) || self.to_vec() == other.to_vec()
    }
}

impl fmt::Debug for ArrayBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match lock(&self.inner).as_ref() {
            Some(bytes) => write!(f, "ArrayBuffer({} bytes)", bytes.len()),
            None => write!(f, "ArrayBuffer(detached)"),
        }
    }
}

/// A byte buffer whose backing memory is shared by every handle, including
/// handles produced by decoding within the same process.
#[derive(Clone, Default)]
pub struct SharedArrayBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedArrayBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bytes)),
        }
    }

    pub fn byte_length(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        lock(&self.inner).clone()
    }

    /// Mutate the shared bytes in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut lock(&self.inner))
    }

    pub fn same_buffer(&self, other: &SharedArrayBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for SharedArrayBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.same_buffer(other) || self.to_vec() == other.to_vec()
    }
}

impl fmt::Debug for SharedArrayBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedArrayBuffer({} bytes)", self.byte_length())
    }
}
