//! # EME Spy
//!
//! Instrumentation for the browser's Encrypted Media Extensions, compiled to
//! WebAssembly.
//!
//! Every spied EME call is forwarded untouched to the native implementation
//! and recorded in a queryable log: arguments, return value or thrown error,
//! and the eventual settlement of returned promises.
//!
//! ## Architecture
//!
//! ```text
//! start() / stop()            (wasm entry points)
//!   ↓
//! EmeSpy                      (roster, active spy handles, call log)
//!   ↓
//! spy_on_whole_object / spy_on_methods / spy_on_properties
//!   ↓
//! Realm                       (JsRealm in the browser, Sandbox in tests)
//! ```
//!
//! ## Usage
//!
//! ```js
//! import init, { start, stop, get_eme_calls } from "eme-spy";
//! await init();
//! start();
//! // ... play encrypted content ...
//! console.log(get_eme_calls().MediaKeySession.methods.update);
//! stop();
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use wasm_bindgen::prelude::*;

// Modules
pub mod config;
pub mod eme;
pub mod error;
pub mod export;
pub mod notify;
pub mod realm;
pub mod record;
pub mod spy;

#[cfg(test)]
mod test_support;

pub use config::SpyConfig;
pub use eme::{EmeSpy, MethodSpec, SetupFailure, MEDIA_KEYS, MEDIA_KEY_SESSION, MEDIA_KEY_SYSTEM_ACCESS};
pub use error::{ErrorCode, Result, SpyError};
pub use notify::{ConsoleNotifier, JsNotifier, LogNotifier, Notifier};
pub use realm::{JsRealm, Realm};
#[cfg(any(test, feature = "sandbox"))]
pub use realm::Sandbox;
pub use record::{CallRecord, LogStore, LogSummary};
pub use spy::{ObjectSpec, Presence, SpyContext, SpyHandle};

thread_local! {
    static SESSION: RefCell<Option<EmeSpy<JsRealm>>> = const { RefCell::new(None) };
}

fn new_session() -> EmeSpy<JsRealm> {
    EmeSpy::new(JsRealm).with_notifier(Rc::new(ConsoleNotifier))
}

fn with_session<T>(f: impl FnOnce(&mut EmeSpy<JsRealm>) -> T) -> T {
    SESSION.with(|session| f(session.borrow_mut().get_or_insert_with(new_session)))
}

/// Serialize to plain JS objects (not `Map`s).
fn to_js<T: Serialize>(value: &T) -> std::result::Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&format!("Serialization failed: {}", e)))
}

/// Initialize the EME spy
///
/// Sets up logging and captures the native EME constructors, before page
/// code gets a chance to replace them.
#[wasm_bindgen(start)]
pub fn init() {
    // Initialize logging; a second init keeps the first logger.
    if console_log::init_with_level(log::Level::Info).is_err() {
        log::debug!("Logger already initialized");
    }

    with_session(|_| ());
    log::info!("EME spy initialized");
}

/// Start spying, replacing any running session.
///
/// `options` is an optional object of roster toggles
/// (`{ mediaKeys, mediaKeySession, mediaKeySystemAccess,
/// requestMediaKeySystemAccess, setMediaKeys }`), all `true` by default.
#[wasm_bindgen]
pub fn start(options: JsValue) -> std::result::Result<JsValue, JsValue> {
    let config = if options.is_undefined() || options.is_null() {
        SpyConfig::default()
    } else {
        serde_wasm_bindgen::from_value(options).unwrap_or_else(|e| {
            log::warn!("⚠️ Invalid spy options, using defaults: {}", e);
            SpyConfig::default()
        })
    };
    let installed = with_session(|session| session.start(&config));
    to_js(&serde_json::json!({ "installed": installed }))
}

/// Stop spying and restore every native binding.
#[wasm_bindgen]
pub fn stop() {
    with_session(EmeSpy::stop);
}

/// Snapshot of every recorded call, keyed by entity name.
#[wasm_bindgen]
pub fn get_eme_calls() -> std::result::Result<JsValue, JsValue> {
    with_session(|session| export::store_to_js(session.calls()))
}

/// Forget every recorded call.
#[wasm_bindgen]
pub fn reset_eme_calls() {
    with_session(|session| session.reset());
}

/// Route notifications to `logger`'s callbacks from the next `start` on.
/// `null` or `undefined` goes back to the console.
#[wasm_bindgen]
pub fn set_logger(logger: JsValue) {
    let notifier: Rc<dyn Notifier<JsValue>> = if logger.is_undefined() || logger.is_null() {
        Rc::new(ConsoleNotifier)
    } else {
        Rc::new(JsNotifier::new(logger))
    };
    with_session(|session| session.set_notifier(notifier));
}

/// Get spy status
#[wasm_bindgen]
pub fn get_status() -> std::result::Result<JsValue, JsValue> {
    with_session(|session| {
        to_js(&serde_json::json!({
            "active": session.is_active(),
            "spies": session.spy_labels(),
            "failures": session.failures(),
            "entities": session.calls().summary(),
        }))
    })
}
