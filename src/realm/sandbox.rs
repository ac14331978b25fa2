//! In-memory realm.
//!
//! A deliberately small object model: objects with own properties (data or
//! accessor), an optional prototype, optional call/construct behavior and an
//! optional deferred state. Deferred values are shared futures; their
//! continuations run on the sandbox's `LocalPool`, so nothing observes a
//! settlement until [`Sandbox::run_until_stalled`] drives the pool, the same
//! way a browser only runs promise reactions on a later turn.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use futures::task::LocalSpawnExt;

use super::{ConstructFn, MethodFn, Realm, Settle};

type Deferred = Shared<LocalBoxFuture<'static, Result<Value, Value>>>;

/// A sandbox value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Object(Obj),
}

/// Handle to a sandbox object. Equality is identity.
#[derive(Clone)]
pub struct Obj(Rc<RefCell<ObjectData>>);

#[derive(Default)]
struct ObjectData {
    class: String,
    props: BTreeMap<String, Property>,
    proto: Option<Obj>,
    call: Option<MethodFn<Value>>,
    construct: Option<ConstructFn<Value>>,
    deferred: Option<Deferred>,
}

/// An own property; also the sandbox's descriptor type.
#[derive(Clone, Debug)]
pub enum Property {
    Data(Value),
    Accessor {
        get: Option<Value>,
        set: Option<Value>,
    },
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[object {}]", self.0.borrow().class)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(o) => o.fmt(f),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Obj> for Value {
    fn from(o: Obj) -> Self {
        Value::Object(o)
    }
}

impl Value {
    pub fn as_object(&self) -> Option<&Obj> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is a deferred value.
    pub fn is_deferred(&self) -> bool {
        self.as_object()
            .is_some_and(|o| o.0.borrow().deferred.is_some())
    }
}

impl Obj {
    fn new(data: ObjectData) -> Self {
        Obj(Rc::new(RefCell::new(data)))
    }

    pub fn class(&self) -> String {
        self.0.borrow().class.clone()
    }

    pub fn prototype_of(&self) -> Option<Obj> {
        self.0.borrow().proto.clone()
    }

    fn own(&self, name: &str) -> Option<Property> {
        self.0.borrow().props.get(name).cloned()
    }

    /// Look `name` up along the prototype chain.
    fn lookup(&self, name: &str) -> Option<Property> {
        let mut current = Some(self.clone());
        while let Some(obj) = current {
            if let Some(prop) = obj.own(name) {
                return Some(prop);
            }
            current = obj.prototype_of();
        }
        None
    }

    fn put(&self, name: &str, prop: Property) {
        self.0.borrow_mut().props.insert(name.to_string(), prop);
    }
}

/// Settles the deferred value created alongside it.
pub struct Resolver {
    sender: oneshot::Sender<Result<Value, Value>>,
}

impl Resolver {
    pub fn resolve(self, value: impl Into<Value>) {
        // The receiver only disappears with the deferred value itself.
        let _ = self.sender.send(Ok(value.into()));
    }

    pub fn reject(self, reason: impl Into<Value>) {
        let _ = self.sender.send(Err(reason.into()));
    }
}

struct Inner {
    global: Obj,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

/// In-memory realm with its own global object and event loop.
#[derive(Clone)]
pub struct Sandbox {
    inner: Rc<Inner>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox").finish_non_exhaustive()
    }
}

fn type_error(message: String) -> Value {
    Value::Str(format!("TypeError: {}", message))
}

impl Sandbox {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            inner: Rc::new(Inner {
                global: Obj::new(ObjectData {
                    class: "Window".into(),
                    ..Default::default()
                }),
                pool: RefCell::new(pool),
                spawner,
            }),
        }
    }

    /// Run every continuation that can make progress.
    pub fn run_until_stalled(&self) {
        self.inner.pool.borrow_mut().run_until_stalled();
    }

    /// A plain object inheriting from `proto`.
    pub fn object(&self, class: &str, proto: Option<&Value>) -> Value {
        Value::Object(Obj::new(ObjectData {
            class: class.to_string(),
            proto: proto.and_then(Value::as_object).cloned(),
            ..Default::default()
        }))
    }

    /// A native function.
    pub fn native_fn(
        &self,
        body: impl Fn(&Value, &[Value]) -> Result<Value, Value> + 'static,
    ) -> Value {
        let body: MethodFn<Value> = Rc::new(move |this, args| body(&this, &args));
        Value::Object(Obj::new(ObjectData {
            class: "Function".into(),
            call: Some(body),
            ..Default::default()
        }))
    }

    /// A native class: a constructor with a fresh `prototype` object whose
    /// instances are initialized by `init`. Not bound anywhere.
    pub fn native_class(
        &self,
        name: &str,
        init: impl Fn(&Value, &[Value]) -> Result<(), Value> + 'static,
    ) -> Value {
        let prototype = self.object(name, None);
        let class = name.to_string();
        let proto = prototype.clone();
        let sandbox = self.clone();
        let construct: ConstructFn<Value> = Rc::new(move |args| {
            let instance = sandbox.object(&class, Some(&proto));
            init(&instance, &args)?;
            Ok(instance)
        });
        let ctor = Obj::new(ObjectData {
            class: "Function".into(),
            construct: Some(construct),
            ..Default::default()
        });
        ctor.put("prototype", Property::Data(prototype));
        Value::Object(ctor)
    }

    /// Define a native accessor on `target`.
    pub fn native_accessor(
        &self,
        target: &Value,
        name: &str,
        get: impl Fn(&Value) -> Result<Value, Value> + 'static,
        set: Option<Box<dyn Fn(&Value, Value) -> Result<(), Value>>>,
    ) {
        let getter = self.native_fn(move |this, _| get(this));
        let setter = set.map(|set| {
            self.native_fn(move |this, args| {
                set(this, args.first().cloned().unwrap_or_default())?;
                Ok(Value::Undefined)
            })
        });
        if let Some(obj) = target.as_object() {
            obj.put(
                name,
                Property::Accessor {
                    get: Some(getter),
                    set: setter,
                },
            );
        }
    }

    /// A pending deferred value and the resolver that settles it.
    pub fn deferred(&self) -> (Value, Resolver) {
        let (sender, receiver) = oneshot::channel();
        // A dropped resolver rejects with `undefined`.
        let future = receiver
            .map(|settled| settled.unwrap_or(Err(Value::Undefined)))
            .boxed_local()
            .shared();
        let value = Value::Object(Obj::new(ObjectData {
            class: "Promise".into(),
            deferred: Some(future),
            ..Default::default()
        }));
        (value, Resolver { sender })
    }

    /// A deferred value that is already resolved.
    pub fn resolved(&self, value: impl Into<Value>) -> Value {
        let (deferred, resolver) = self.deferred();
        resolver.resolve(value);
        deferred
    }

    /// A deferred value that is already rejected.
    pub fn rejected(&self, reason: impl Into<Value>) -> Value {
        let (deferred, resolver) = self.deferred();
        resolver.reject(reason);
        deferred
    }

    /// Await a deferred value by driving the pool; `None` if still pending.
    pub fn settled(&self, value: &Value) -> Option<Result<Value, Value>> {
        let outcome = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&outcome);
        if !self.when_settled(value, Box::new(move |settled| *slot.borrow_mut() = Some(settled))) {
            return Some(Ok(value.clone()));
        }
        self.run_until_stalled();
        let settled = outcome.borrow_mut().take();
        settled
    }
}

impl Realm for Sandbox {
    type Value = Value;
    type Descriptor = Property;

    fn global(&self) -> Value {
        Value::Object(self.inner.global.clone())
    }

    fn undefined(&self) -> Value {
        Value::Undefined
    }

    fn is_nullish(&self, value: &Value) -> bool {
        matches!(value, Value::Undefined | Value::Null)
    }

    fn is_callable(&self, value: &Value) -> bool {
        value.as_object().is_some_and(|o| {
            let data = o.0.borrow();
            data.call.is_some() || data.construct.is_some()
        })
    }

    fn get(&self, target: &Value, name: &str) -> Result<Value, Value> {
        let obj = match target {
            Value::Object(obj) => obj,
            Value::Undefined | Value::Null => {
                return Err(type_error(format!("cannot read property {} of {:?}", name, target)))
            }
            _ => return Ok(Value::Undefined),
        };
        match obj.lookup(name) {
            Some(Property::Data(value)) => Ok(value),
            Some(Property::Accessor { get: Some(getter), .. }) => self.call(&getter, target, &[]),
            Some(Property::Accessor { get: None, .. }) | None => Ok(Value::Undefined),
        }
    }

    fn set(&self, target: &Value, name: &str, value: &Value) -> Result<(), Value> {
        let obj = target
            .as_object()
            .ok_or_else(|| type_error(format!("cannot set property {} of {:?}", name, target)))?;
        match obj.lookup(name) {
            Some(Property::Accessor { set: Some(setter), .. }) => {
                self.call(&setter, target, std::slice::from_ref(value))?;
                Ok(())
            }
            Some(Property::Accessor { set: None, .. }) => Err(type_error(format!(
                "cannot set property {} which has only a getter",
                name
            ))),
            Some(Property::Data(_)) | None => {
                obj.put(name, Property::Data(value.clone()));
                Ok(())
            }
        }
    }

    fn own_descriptor(&self, target: &Value, name: &str) -> Result<Option<Property>, Value> {
        let obj = target
            .as_object()
            .ok_or_else(|| type_error(format!("{:?} is not an object", target)))?;
        Ok(obj.own(name))
    }

    fn descriptor_getter(&self, descriptor: &Property) -> Option<Value> {
        match descriptor {
            Property::Accessor { get, .. } => get.clone(),
            Property::Data(_) => None,
        }
    }

    fn descriptor_setter(&self, descriptor: &Property) -> Option<Value> {
        match descriptor {
            Property::Accessor { set, .. } => set.clone(),
            Property::Data(_) => None,
        }
    }

    fn define_accessor(
        &self,
        target: &Value,
        name: &str,
        getter: Option<&Value>,
        setter: Option<&Value>,
    ) -> Result<(), Value> {
        self.define_descriptor(
            target,
            name,
            &Property::Accessor {
                get: getter.cloned(),
                set: setter.cloned(),
            },
        )
    }

    fn delete(&self, target: &Value, name: &str) -> Result<(), Value> {
        let obj = target
            .as_object()
            .ok_or_else(|| type_error(format!("{:?} is not an object", target)))?;
        obj.0.borrow_mut().props.remove(name);
        Ok(())
    }

    fn define_descriptor(&self, target: &Value, name: &str, descriptor: &Property) -> Result<(), Value> {
        let obj = target
            .as_object()
            .ok_or_else(|| type_error(format!("{:?} is not an object", target)))?;
        obj.put(name, descriptor.clone());
        Ok(())
    }

    fn function(&self, body: MethodFn<Value>) -> Result<Value, Value> {
        Ok(Value::Object(Obj::new(ObjectData {
            class: "Function".into(),
            call: Some(body),
            ..Default::default()
        })))
    }

    fn constructor(&self, body: ConstructFn<Value>, prototype: &Value) -> Result<Value, Value> {
        let as_call = Rc::clone(&body);
        let ctor = Obj::new(ObjectData {
            class: "Function".into(),
            call: Some(Rc::new(move |_, args| as_call(args))),
            construct: Some(body),
            ..Default::default()
        });
        ctor.put("prototype", Property::Data(prototype.clone()));
        Ok(Value::Object(ctor))
    }

    fn call(&self, function: &Value, this: &Value, args: &[Value]) -> Result<Value, Value> {
        let body = function
            .as_object()
            .and_then(|o| o.0.borrow().call.clone())
            .ok_or_else(|| type_error(format!("{:?} is not a function", function)))?;
        body(this.clone(), args.to_vec())
    }

    fn construct(&self, constructor: &Value, args: &[Value]) -> Result<Value, Value> {
        let body = constructor
            .as_object()
            .and_then(|o| o.0.borrow().construct.clone())
            .ok_or_else(|| type_error(format!("{:?} is not a constructor", constructor)))?;
        body(args.to_vec())
    }

    fn bind(&self, function: &Value, this: &Value) -> Result<Value, Value> {
        if !self.is_callable(function) {
            return Err(type_error(format!("{:?} is not a function", function)));
        }
        let sandbox = self.clone();
        let target = function.clone();
        let bound_this = this.clone();
        self.function(Rc::new(move |_, args| sandbox.call(&target, &bound_this, &args)))
    }

    fn when_settled(&self, value: &Value, then: Settle<Value>) -> bool {
        let Some(deferred) = value
            .as_object()
            .and_then(|o| o.0.borrow().deferred.clone())
        else {
            return false;
        };
        self.inner
            .spawner
            .spawn_local(async move { then(deferred.await) })
            .is_ok()
    }
}
