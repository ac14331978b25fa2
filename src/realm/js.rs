//! Browser realm backed by `Reflect`, `Object.defineProperty` and `Promise`.
//!
//! Forwarding functions are tiny strict-mode JS shims that hand `this`
//! (unboxed, possibly `undefined`) and the argument list to a Rust closure.
//! The closure is owned by the JS garbage collector (`Closure::into_js_value`),
//! so a shim captured by page code stays valid after the spy is restored.

use js_sys::{Array, Function, Object, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use super::{ConstructFn, MethodFn, Realm, Settle};

thread_local! {
    static METHOD_SHIM: Function = Function::new_with_args(
        "hook",
        "'use strict'; return function(...args) { return hook(this, args); };",
    );
    static CONSTRUCTOR_SHIM: Function = Function::new_with_args(
        "hook, proto",
        "'use strict'; \
         function Spied(...args) { return hook(args); } \
         Spied.prototype = proto; \
         return Spied;",
    );
}

/// The page's own JavaScript realm.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsRealm;

fn key(name: &str) -> JsValue {
    JsValue::from_str(name)
}

fn as_function(value: &JsValue) -> Result<&Function, JsValue> {
    value
        .dyn_ref::<Function>()
        .ok_or_else(|| js_sys::TypeError::new("not a function").into())
}

impl Realm for JsRealm {
    type Value = JsValue;
    type Descriptor = Object;

    fn global(&self) -> JsValue {
        js_sys::global().into()
    }

    fn undefined(&self) -> JsValue {
        JsValue::UNDEFINED
    }

    fn is_nullish(&self, value: &JsValue) -> bool {
        value.is_null() || value.is_undefined()
    }

    fn is_callable(&self, value: &JsValue) -> bool {
        value.is_function()
    }

    fn get(&self, target: &JsValue, name: &str) -> Result<JsValue, JsValue> {
        Reflect::get(target, &key(name))
    }

    fn set(&self, target: &JsValue, name: &str, value: &JsValue) -> Result<(), JsValue> {
        if Reflect::set(target, &key(name), value)? {
            Ok(())
        } else {
            Err(js_sys::TypeError::new(&format!("cannot assign to {}", name)).into())
        }
    }

    fn own_descriptor(&self, target: &JsValue, name: &str) -> Result<Option<Object>, JsValue> {
        let descriptor = Reflect::get_own_property_descriptor(target.unchecked_ref::<Object>(), &key(name))?;
        if descriptor.is_undefined() {
            Ok(None)
        } else {
            Ok(Some(descriptor.unchecked_into()))
        }
    }

    fn descriptor_getter(&self, descriptor: &Object) -> Option<JsValue> {
        Reflect::get(descriptor, &key("get"))
            .ok()
            .filter(JsValue::is_function)
    }

    fn descriptor_setter(&self, descriptor: &Object) -> Option<JsValue> {
        Reflect::get(descriptor, &key("set"))
            .ok()
            .filter(JsValue::is_function)
    }

    fn define_accessor(
        &self,
        target: &JsValue,
        name: &str,
        getter: Option<&JsValue>,
        setter: Option<&JsValue>,
    ) -> Result<(), JsValue> {
        let descriptor = Object::new();
        Reflect::set(&descriptor, &key("get"), getter.unwrap_or(&JsValue::UNDEFINED))?;
        Reflect::set(&descriptor, &key("set"), setter.unwrap_or(&JsValue::UNDEFINED))?;
        Reflect::set(&descriptor, &key("configurable"), &JsValue::TRUE)?;
        self.define_descriptor(target, name, &descriptor)
    }

    fn delete(&self, target: &JsValue, name: &str) -> Result<(), JsValue> {
        if Reflect::delete_property(target.unchecked_ref::<Object>(), &key(name))? {
            Ok(())
        } else {
            Err(js_sys::TypeError::new(&format!("cannot delete property {}", name)).into())
        }
    }

    fn define_descriptor(
        &self,
        target: &JsValue,
        name: &str,
        descriptor: &Object,
    ) -> Result<(), JsValue> {
        // Reflect.defineProperty reports failure instead of throwing.
        if Reflect::define_property(target.unchecked_ref::<Object>(), &key(name), descriptor)? {
            Ok(())
        } else {
            Err(js_sys::TypeError::new(&format!("cannot redefine property {}", name)).into())
        }
    }

    fn function(&self, body: MethodFn<JsValue>) -> Result<JsValue, JsValue> {
        let hook = Closure::wrap(Box::new(move |this: JsValue, args: JsValue| {
            let args: Array = args.unchecked_into();
            body(this, args.to_vec())
        }) as Box<dyn Fn(JsValue, JsValue) -> Result<JsValue, JsValue>>);
        METHOD_SHIM.with(|shim| shim.call1(&JsValue::UNDEFINED, &hook.into_js_value()))
    }

    fn constructor(
        &self,
        body: ConstructFn<JsValue>,
        prototype: &JsValue,
    ) -> Result<JsValue, JsValue> {
        let hook = Closure::wrap(Box::new(move |args: JsValue| {
            let args: Array = args.unchecked_into();
            body(args.to_vec())
        }) as Box<dyn Fn(JsValue) -> Result<JsValue, JsValue>>);
        CONSTRUCTOR_SHIM.with(|shim| {
            shim.call2(&JsValue::UNDEFINED, &hook.into_js_value(), prototype)
        })
    }

    fn call(&self, function: &JsValue, this: &JsValue, args: &[JsValue]) -> Result<JsValue, JsValue> {
        let args: Array = args.iter().collect();
        Reflect::apply(as_function(function)?, this, &args)
    }

    fn construct(&self, constructor: &JsValue, args: &[JsValue]) -> Result<JsValue, JsValue> {
        let args: Array = args.iter().collect();
        Reflect::construct(as_function(constructor)?, &args)
    }

    fn bind(&self, function: &JsValue, this: &JsValue) -> Result<JsValue, JsValue> {
        Ok(as_function(function)?.bind(this).into())
    }

    fn when_settled(&self, value: &JsValue, then: Settle<JsValue>) -> bool {
        let Some(promise) = value.dyn_ref::<Promise>() else {
            return false;
        };
        let settled = JsFuture::from(promise.clone());
        wasm_bindgen_futures::spawn_local(async move {
            then(settled.await);
        });
        true
    }
}
