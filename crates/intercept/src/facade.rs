//! The generic interception primitive.
//!
//! SDK surfaces are modeled as dynamic objects: named members that are plain
//! values, nested objects, or callables. A [`Facade`] wraps one such object
//! and exposes the identical surface, resolving each member access through an
//! ordered rule table — exact-key rewrite first, then the wildcard rewrite,
//! then passthrough to the wrapped object. Calls resolve the same way: a
//! call-time rewrite wins, otherwise the call is forwarded unchanged.
//!
//! ```
//! use serde_json::{Value, json};
//! use stratus_intercept::facade::{DynObject, Facade, Member, Namespace};
//!
//! let base = Namespace::new().with_value("value", json!(1)).build();
//! let wrapped = Facade::wrap(base)
//!     .when("incremented", |target, _key| {
//!         let value = match target.get("value") {
//!             Some(Member::Value(Value::Number(n))) => n.as_u64().unwrap_or(0),
//!             _ => 0,
//!         };
//!         Member::Value(json!(value + 1))
//!     })
//!     .finalize();
//!
//! assert_eq!(wrapped.get("value").unwrap().as_value(), Some(&json!(1)));
//! assert_eq!(wrapped.get("incremented").unwrap().as_value(), Some(&json!(2)));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// A call through an intercepted surface failed.
#[derive(Debug, Error)]
pub enum CallError {
    /// The member cannot be invoked as a plain function.
    #[error("member is not callable")]
    NotCallable,

    /// The member cannot be invoked as a constructor.
    #[error("member is not constructible")]
    NotConstructible,

    /// The underlying implementation reported a failure.
    #[error("call failed: {0}")]
    Failed(String),
}

/// One member of a dynamic capability surface.
#[derive(Clone)]
pub enum Member {
    /// A plain data value.
    Value(Value),
    /// A nested object.
    Object(Arc<dyn DynObject>),
    /// A callable entry point.
    Callable(Arc<dyn DynCallable>),
}

impl Member {
    /// The member as a plain value, if it is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The member as an object, if it is one.
    #[must_use]
    pub fn as_object(&self) -> Option<Arc<dyn DynObject>> {
        match self {
            Self::Object(o) => Some(Arc::clone(o)),
            _ => None,
        }
    }

    /// Invoke the member as a plain function.
    ///
    /// Objects that expose a callable side (see [`DynObject::as_callable`])
    /// are invoked through it, mirroring surfaces where an accessor is both
    /// an object and a function.
    pub fn invoke(&self, args: &[Value]) -> Result<Member, CallError> {
        match self {
            Self::Callable(c) => c.call(args),
            Self::Object(o) => o
                .as_callable()
                .ok_or(CallError::NotCallable)
                .and_then(|c| c.call(args)),
            Self::Value(_) => Err(CallError::NotCallable),
        }
    }

    /// Invoke the member as a constructor.
    pub fn construct(&self, args: &[Value]) -> Result<Member, CallError> {
        match self {
            Self::Callable(c) => c.construct(args),
            Self::Object(o) => o
                .as_callable()
                .ok_or(CallError::NotConstructible)
                .and_then(|c| c.construct(args)),
            Self::Value(_) => Err(CallError::NotConstructible),
        }
    }
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
            Self::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

/// A dynamic object: named members resolved at access time.
///
/// Implementations own their state; callables handed out through [`get`]
/// (methods) are expected to capture their receiver, so a callable keeps
/// operating on the object it came from no matter how it was reached. The
/// facade's passthrough path relies on this and never re-binds.
///
/// [`get`]: Self::get
pub trait DynObject: Send + Sync {
    /// Look up a member. `None` means the member does not exist.
    fn get(&self, key: &str) -> Option<Member>;

    /// The object's callable side, for surfaces that are invoked directly.
    fn as_callable(&self) -> Option<&dyn DynCallable> {
        None
    }
}

/// A callable entry point of a dynamic surface.
pub trait DynCallable: Send + Sync {
    /// Invoke as a plain function.
    fn call(&self, args: &[Value]) -> Result<Member, CallError>;

    /// Invoke as a constructor.
    ///
    /// Entry points that must be `new`-ed override this; the default refuses.
    fn construct(&self, _args: &[Value]) -> Result<Member, CallError> {
        Err(CallError::NotConstructible)
    }
}

type CallFn = Box<dyn Fn(&[Value]) -> Result<Member, CallError> + Send + Sync>;

/// Closure-backed [`DynCallable`].
pub struct HostFn {
    on_call: Option<CallFn>,
    on_construct: Option<CallFn>,
}

impl HostFn {
    /// A callable invocable only as a plain function.
    pub fn function<F>(f: F) -> Arc<dyn DynCallable>
    where
        F: Fn(&[Value]) -> Result<Member, CallError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            on_call: Some(Box::new(f)),
            on_construct: None,
        })
    }

    /// A callable invocable only as a constructor.
    pub fn constructor<F>(f: F) -> Arc<dyn DynCallable>
    where
        F: Fn(&[Value]) -> Result<Member, CallError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            on_call: None,
            on_construct: Some(Box::new(f)),
        })
    }

    /// A callable supporting both invocation forms.
    pub fn hybrid<F, G>(call: F, construct: G) -> Arc<dyn DynCallable>
    where
        F: Fn(&[Value]) -> Result<Member, CallError> + Send + Sync + 'static,
        G: Fn(&[Value]) -> Result<Member, CallError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            on_call: Some(Box::new(call)),
            on_construct: Some(Box::new(construct)),
        })
    }
}

impl DynCallable for HostFn {
    fn call(&self, args: &[Value]) -> Result<Member, CallError> {
        match &self.on_call {
            Some(f) => f(args),
            None => Err(CallError::NotCallable),
        }
    }

    fn construct(&self, args: &[Value]) -> Result<Member, CallError> {
        match &self.on_construct {
            Some(f) => f(args),
            None => Err(CallError::NotConstructible),
        }
    }
}

/// Map-backed [`DynObject`] for assembling SDK namespaces.
///
/// A namespace may also carry a callable side, for accessor surfaces that
/// are both an object and a function.
#[derive(Default)]
pub struct Namespace {
    members: HashMap<String, Member>,
    call_target: Option<Arc<dyn DynCallable>>,
}

impl Namespace {
    /// Start an empty namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, member: Member) -> Self {
        self.members.insert(key.into(), member);
        self
    }

    /// Add a plain value member.
    #[must_use]
    pub fn with_value(self, key: impl Into<String>, value: Value) -> Self {
        self.with(key, Member::Value(value))
    }

    /// Add a nested object member.
    #[must_use]
    pub fn with_object(self, key: impl Into<String>, object: Arc<dyn DynObject>) -> Self {
        self.with(key, Member::Object(object))
    }

    /// Add a callable member.
    #[must_use]
    pub fn with_fn(self, key: impl Into<String>, callable: Arc<dyn DynCallable>) -> Self {
        self.with(key, Member::Callable(callable))
    }

    /// Make the namespace itself invocable.
    #[must_use]
    pub fn callable(mut self, target: Arc<dyn DynCallable>) -> Self {
        self.call_target = Some(target);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Arc<dyn DynObject> {
        Arc::new(self)
    }
}

impl DynObject for Namespace {
    fn get(&self, key: &str) -> Option<Member> {
        self.members.get(key).cloned()
    }

    fn as_callable(&self) -> Option<&dyn DynCallable> {
        self.call_target.as_deref()
    }
}

/// Read-only [`DynObject`] view over a JSON value.
///
/// Nested objects come back as nested `JsonObject`s, so a JSON document can
/// stand in for a whole configuration surface.
pub struct JsonObject {
    value: Value,
}

impl JsonObject {
    /// Wrap a JSON value. Non-object values expose no members.
    #[must_use]
    pub fn new(value: Value) -> Arc<dyn DynObject> {
        Arc::new(Self { value })
    }
}

impl DynObject for JsonObject {
    fn get(&self, key: &str) -> Option<Member> {
        match self.value.get(key) {
            Some(Value::Object(_)) => Some(Member::Object(Self::new(
                self.value.get(key).cloned().unwrap_or(Value::Null),
            ))),
            Some(value) => Some(Member::Value(value.clone())),
            None => None,
        }
    }
}

type MemberHook = Arc<dyn Fn(&Arc<dyn DynObject>, &str) -> Member + Send + Sync>;
type CallHook = Arc<dyn Fn(&[Value]) -> Result<Member, CallError> + Send + Sync>;

/// Wrapper exposing a wrapped object's surface with targeted rewrites.
///
/// Resolution order on member access: exact-key rewrite, wildcard rewrite,
/// passthrough. Calls: call rewrite, else forwarded to the wrapped object.
pub struct Facade {
    target: Arc<dyn DynObject>,
    rewrites: HashMap<String, MemberHook>,
    wildcard: Option<MemberHook>,
    applied: Option<CallHook>,
}

impl Facade {
    /// Start wrapping an object.
    #[must_use]
    pub fn wrap(target: Arc<dyn DynObject>) -> Self {
        Self {
            target,
            rewrites: HashMap::new(),
            wildcard: None,
            applied: None,
        }
    }

    /// Rewrite one member. The hook receives the wrapped object and the key.
    #[must_use]
    pub fn when<F>(mut self, key: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&Arc<dyn DynObject>, &str) -> Member + Send + Sync + 'static,
    {
        self.rewrites.insert(key.into(), Arc::new(hook));
        self
    }

    /// Rewrite every member not covered by an exact-key rewrite.
    #[must_use]
    pub fn any<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<dyn DynObject>, &str) -> Member + Send + Sync + 'static,
    {
        self.wildcard = Some(Arc::new(hook));
        self
    }

    /// Rewrite direct invocation of the wrapped object itself.
    #[must_use]
    pub fn applied<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Member, CallError> + Send + Sync + 'static,
    {
        self.applied = Some(Arc::new(hook));
        self
    }

    /// Finish building and return the wrapped surface.
    #[must_use]
    pub fn finalize(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Passthrough lookup, exactly as an untouched member would resolve.
    ///
    /// Hooks use this to read the wrapped object without re-entering the
    /// rule table. Callables come back still bound to the wrapped object.
    #[must_use]
    pub fn get_original(target: &Arc<dyn DynObject>, key: &str) -> Option<Member> {
        target.get(key)
    }
}

impl DynObject for Facade {
    fn get(&self, key: &str) -> Option<Member> {
        if let Some(hook) = self.rewrites.get(key) {
            return Some(hook(&self.target, key));
        }
        if let Some(hook) = &self.wildcard {
            return Some(hook(&self.target, key));
        }
        self.target.get(key)
    }

    fn as_callable(&self) -> Option<&dyn DynCallable> {
        Some(self)
    }
}

impl DynCallable for Facade {
    fn call(&self, args: &[Value]) -> Result<Member, CallError> {
        if let Some(hook) = &self.applied {
            return hook(args);
        }
        match self.target.as_callable() {
            Some(original) => original.call(args),
            None => Err(CallError::NotCallable),
        }
    }

    fn construct(&self, args: &[Value]) -> Result<Member, CallError> {
        match self.target.as_callable() {
            Some(original) => original.construct(args),
            None => Err(CallError::NotConstructible),
        }
    }
}
