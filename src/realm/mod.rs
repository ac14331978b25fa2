//! Object-model operations the interceptors are written against.
//!
//! The interceptors never touch JavaScript directly: they read and replace
//! named members, swap accessor descriptors, create forwarding functions and
//! observe deferred values through a [`Realm`]. [`JsRealm`] is the browser
//! implementation; `Sandbox` (behind the `sandbox` feature) is an in-memory
//! one used to exercise the interceptors natively.

use std::fmt::Debug;
use std::rc::Rc;

pub mod js;
#[cfg(any(test, feature = "sandbox"))]
pub mod sandbox;

pub use js::JsRealm;
#[cfg(any(test, feature = "sandbox"))]
pub use sandbox::{Resolver, Sandbox, Value};

/// Body of a function created by the realm. Receives `this` and the
/// arguments; `Err` is thrown to the caller.
pub type MethodFn<V> = Rc<dyn Fn(V, Vec<V>) -> Result<V, V>>;

/// Body of a constructor created by the realm. Returns the new instance.
pub type ConstructFn<V> = Rc<dyn Fn(Vec<V>) -> Result<V, V>>;

/// Continuation run once a deferred value settles.
pub type Settle<V> = Box<dyn FnOnce(Result<V, V>)>;

/// A host object model. Every fallible operation fails with the value the
/// host threw.
pub trait Realm: Clone + 'static {
    type Value: Clone + Debug + 'static;
    /// Snapshot of one own property, sufficient to put it back verbatim.
    type Descriptor: Clone + 'static;

    /// The global scope constructors are bound in.
    fn global(&self) -> Self::Value;

    fn undefined(&self) -> Self::Value;

    fn is_nullish(&self, value: &Self::Value) -> bool;

    fn is_callable(&self, value: &Self::Value) -> bool;

    /// Read `target[name]`, running inherited getters against `target`.
    fn get(&self, target: &Self::Value, name: &str) -> Result<Self::Value, Self::Value>;

    /// Assign `target[name] = value`.
    fn set(&self, target: &Self::Value, name: &str, value: &Self::Value)
        -> Result<(), Self::Value>;

    fn own_descriptor(
        &self,
        target: &Self::Value,
        name: &str,
    ) -> Result<Option<Self::Descriptor>, Self::Value>;

    fn descriptor_getter(&self, descriptor: &Self::Descriptor) -> Option<Self::Value>;

    fn descriptor_setter(&self, descriptor: &Self::Descriptor) -> Option<Self::Value>;

    /// Replace `target[name]` with an accessor property.
    fn define_accessor(
        &self,
        target: &Self::Value,
        name: &str,
        getter: Option<&Self::Value>,
        setter: Option<&Self::Value>,
    ) -> Result<(), Self::Value>;

    /// Remove an own property.
    fn delete(&self, target: &Self::Value, name: &str) -> Result<(), Self::Value>;

    /// Put back a property exactly as captured by [`Realm::own_descriptor`].
    fn define_descriptor(
        &self,
        target: &Self::Value,
        name: &str,
        descriptor: &Self::Descriptor,
    ) -> Result<(), Self::Value>;

    /// Create a callable whose invocations run `body` with the caller's `this`.
    fn function(&self, body: MethodFn<Self::Value>) -> Result<Self::Value, Self::Value>;

    /// Create a constructor whose `prototype` is `prototype` and whose
    /// instantiations return what `body` returns.
    fn constructor(
        &self,
        body: ConstructFn<Self::Value>,
        prototype: &Self::Value,
    ) -> Result<Self::Value, Self::Value>;

    fn call(
        &self,
        function: &Self::Value,
        this: &Self::Value,
        args: &[Self::Value],
    ) -> Result<Self::Value, Self::Value>;

    fn construct(
        &self,
        constructor: &Self::Value,
        args: &[Self::Value],
    ) -> Result<Self::Value, Self::Value>;

    /// A function calling `function` with `this` fixed to `this`.
    fn bind(&self, function: &Self::Value, this: &Self::Value)
        -> Result<Self::Value, Self::Value>;

    /// If `value` is deferred, schedule `then` to run once it settles and
    /// return `true`. The continuation never runs synchronously and never
    /// changes `value` itself.
    fn when_settled(&self, value: &Self::Value, then: Settle<Self::Value>) -> bool;
}
