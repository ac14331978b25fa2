//! Live notifications about intercepted calls.
//!
//! The log store keeps the structured history; a [`Notifier`] is the side
//! channel that reports each event as it happens. The default sinks print
//! one line per event, at debug level for accesses and pending calls, info
//! for successes and error for failures.

use std::fmt::Debug;

use js_sys::{Array, Function, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::console;

/// Receives one callback per intercepted event.
pub trait Notifier<V> {
    /// A spied property was read.
    fn on_property_access(&self, path: &str, value: &V);
    /// A spied property is about to be written.
    fn on_property_set(&self, path: &str, value: &V);
    /// A spied constructor is about to run.
    fn on_object_instantiation(&self, name: &str, args: &[V]);
    fn on_object_instantiation_error(&self, name: &str, error: &V);
    fn on_object_instantiation_success(&self, name: &str, value: &V);
    /// A spied function is about to run.
    fn on_function_call(&self, path: &str, args: &[V]);
    fn on_function_call_error(&self, path: &str, error: &V);
    fn on_function_call_success(&self, path: &str, value: &V);
    /// The deferred value returned by a spied function resolved.
    fn on_function_promise_resolve(&self, path: &str, value: &V);
    /// The deferred value returned by a spied function rejected.
    fn on_function_promise_reject(&self, path: &str, reason: &V);
}

/// Writes every event through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl<V: Debug> Notifier<V> for LogNotifier {
    fn on_property_access(&self, path: &str, value: &V) {
        log::debug!(">>> Getting {}: {:?}", path, value);
    }

    fn on_property_set(&self, path: &str, value: &V) {
        log::debug!(">> Setting {}: {:?}", path, value);
    }

    fn on_object_instantiation(&self, name: &str, args: &[V]) {
        if args.is_empty() {
            log::debug!(">>> Creating {}", name);
        } else {
            log::debug!(">>> Creating {} with arguments: {:?}", name, args);
        }
    }

    fn on_object_instantiation_error(&self, name: &str, error: &V) {
        log::error!(">> {} creation failed: {:?}", name, error);
    }

    fn on_object_instantiation_success(&self, name: &str, value: &V) {
        log::debug!(">>> {} created: {:?}", name, value);
    }

    fn on_function_call(&self, path: &str, args: &[V]) {
        if args.is_empty() {
            log::debug!(">>> {} called", path);
        } else {
            log::debug!(">>> {} called with arguments: {:?}", path, args);
        }
    }

    fn on_function_call_error(&self, path: &str, error: &V) {
        log::error!(">> {} failed: {:?}", path, error);
    }

    fn on_function_call_success(&self, path: &str, value: &V) {
        log::info!(">>> {} succeeded: {:?}", path, value);
    }

    fn on_function_promise_resolve(&self, path: &str, value: &V) {
        log::info!(">>> {} resolved: {:?}", path, value);
    }

    fn on_function_promise_reject(&self, path: &str, reason: &V) {
        log::error!(">>> {} rejected: {:?}", path, reason);
    }
}

/// Writes every event to the browser console, passing the JS value as a
/// separate argument so devtools can inspect it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

fn js_args(args: &[JsValue]) -> JsValue {
    args.iter().collect::<Array>().into()
}

impl Notifier<JsValue> for ConsoleNotifier {
    fn on_property_access(&self, path: &str, value: &JsValue) {
        console::debug_2(&format!(">>> Getting {}:", path).into(), value);
    }

    fn on_property_set(&self, path: &str, value: &JsValue) {
        console::debug_2(&format!(">> Setting {}:", path).into(), value);
    }

    fn on_object_instantiation(&self, name: &str, args: &[JsValue]) {
        if args.is_empty() {
            console::debug_1(&format!(">>> Creating {}", name).into());
        } else {
            console::debug_2(
                &format!(">>> Creating {} with arguments:", name).into(),
                &js_args(args),
            );
        }
    }

    fn on_object_instantiation_error(&self, name: &str, error: &JsValue) {
        console::error_2(&format!(">> {} creation failed:", name).into(), error);
    }

    fn on_object_instantiation_success(&self, name: &str, value: &JsValue) {
        console::debug_2(&format!(">>> {} created:", name).into(), value);
    }

    fn on_function_call(&self, path: &str, args: &[JsValue]) {
        if args.is_empty() {
            console::debug_1(&format!(">>> {} called", path).into());
        } else {
            console::debug_2(
                &format!(">>> {} called with arguments:", path).into(),
                &js_args(args),
            );
        }
    }

    fn on_function_call_error(&self, path: &str, error: &JsValue) {
        console::error_2(&format!(">> {} failed:", path).into(), error);
    }

    fn on_function_call_success(&self, path: &str, value: &JsValue) {
        console::info_2(&format!(">>> {} succeeded:", path).into(), value);
    }

    fn on_function_promise_resolve(&self, path: &str, value: &JsValue) {
        console::info_2(&format!(">>> {} resolved:", path).into(), value);
    }

    fn on_function_promise_reject(&self, path: &str, reason: &JsValue) {
        console::error_2(&format!(">>> {} rejected:", path).into(), reason);
    }
}

/// Forwards events to a logger object supplied by the page.
///
/// Each callback is optional; events without one go to [`ConsoleNotifier`].
/// A callback that throws is reported and otherwise ignored.
#[derive(Debug, Clone)]
pub struct JsNotifier {
    logger: JsValue,
}

impl JsNotifier {
    pub fn new(logger: JsValue) -> Self {
        Self { logger }
    }

    /// Call `logger[callback](name, value)`; `false` if there is no such callback.
    fn forward(&self, callback: &str, name: &str, value: &JsValue) -> bool {
        let Some(function) = Reflect::get(&self.logger, &JsValue::from_str(callback))
            .ok()
            .and_then(|f| f.dyn_into::<Function>().ok())
        else {
            return false;
        };
        if let Err(e) = function.call2(&self.logger, &JsValue::from_str(name), value) {
            log::warn!("Logger callback {} threw: {:?}", callback, e);
        }
        true
    }
}

impl Notifier<JsValue> for JsNotifier {
    fn on_property_access(&self, path: &str, value: &JsValue) {
        if !self.forward("onPropertyAccess", path, value) {
            ConsoleNotifier.on_property_access(path, value);
        }
    }

    fn on_property_set(&self, path: &str, value: &JsValue) {
        if !self.forward("onSettingProperty", path, value) {
            ConsoleNotifier.on_property_set(path, value);
        }
    }

    fn on_object_instantiation(&self, name: &str, args: &[JsValue]) {
        if !self.forward("onObjectInstanciation", name, &js_args(args)) {
            ConsoleNotifier.on_object_instantiation(name, args);
        }
    }

    fn on_object_instantiation_error(&self, name: &str, error: &JsValue) {
        if !self.forward("onObjectInstanciationError", name, error) {
            ConsoleNotifier.on_object_instantiation_error(name, error);
        }
    }

    fn on_object_instantiation_success(&self, name: &str, value: &JsValue) {
        if !self.forward("onObjectInstanciationSuccess", name, value) {
            ConsoleNotifier.on_object_instantiation_success(name, value);
        }
    }

    fn on_function_call(&self, path: &str, args: &[JsValue]) {
        if !self.forward("onFunctionCall", path, &js_args(args)) {
            ConsoleNotifier.on_function_call(path, args);
        }
    }

    fn on_function_call_error(&self, path: &str, error: &JsValue) {
        if !self.forward("onFunctionCallError", path, error) {
            ConsoleNotifier.on_function_call_error(path, error);
        }
    }

    fn on_function_call_success(&self, path: &str, value: &JsValue) {
        if !self.forward("onFunctionCallSuccess", path, value) {
            ConsoleNotifier.on_function_call_success(path, value);
        }
    }

    fn on_function_promise_resolve(&self, path: &str, value: &JsValue) {
        if !self.forward("onFunctionPromiseResolve", path, value) {
            ConsoleNotifier.on_function_promise_resolve(path, value);
        }
    }

    fn on_function_promise_reject(&self, path: &str, reason: &JsValue) {
        if !self.forward("onFunctionPromiseReject", path, reason) {
            ConsoleNotifier.on_function_promise_reject(path, reason);
        }
    }
}
