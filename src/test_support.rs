//! Shared fixtures for the sandbox-driven tests.

use std::cell::RefCell;
use std::rc::Rc;

use crate::notify::Notifier;
use crate::realm::{Realm, Sandbox, Value};
use crate::record::LogStore;
use crate::spy::SpyContext;

/// Remembers every event as a `(callback, path)` pair.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub events: RefCell<Vec<(&'static str, String)>>,
}

impl RecordingNotifier {
    fn push(&self, event: &'static str, path: &str) {
        self.events.borrow_mut().push((event, path.to_string()));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.borrow().iter().map(|(e, _)| *e).collect()
    }
}

impl<V> Notifier<V> for RecordingNotifier {
    fn on_property_access(&self, path: &str, _: &V) {
        self.push("access", path);
    }
    fn on_property_set(&self, path: &str, _: &V) {
        self.push("set", path);
    }
    fn on_object_instantiation(&self, name: &str, _: &[V]) {
        self.push("construct", name);
    }
    fn on_object_instantiation_error(&self, name: &str, _: &V) {
        self.push("construct-error", name);
    }
    fn on_object_instantiation_success(&self, name: &str, _: &V) {
        self.push("construct-success", name);
    }
    fn on_function_call(&self, path: &str, _: &[V]) {
        self.push("call", path);
    }
    fn on_function_call_error(&self, path: &str, _: &V) {
        self.push("call-error", path);
    }
    fn on_function_call_success(&self, path: &str, _: &V) {
        self.push("call-success", path);
    }
    fn on_function_promise_resolve(&self, path: &str, _: &V) {
        self.push("resolve", path);
    }
    fn on_function_promise_reject(&self, path: &str, _: &V) {
        self.push("reject", path);
    }
}

/// A spy context over `sandbox` with a fresh store and a recording notifier.
pub(crate) fn context(sandbox: &Sandbox) -> (SpyContext<Sandbox>, Rc<RecordingNotifier>) {
    let notifier = Rc::new(RecordingNotifier::default());
    let cx = SpyContext::new(sandbox.clone(), notifier.clone(), LogStore::new());
    (cx, notifier)
}

/// The native EME bindings installed by [`fake_eme`].
pub(crate) struct FakeEme {
    pub media_keys: Value,
    pub media_key_session: Value,
    pub media_key_system_access: Value,
    pub navigator: Value,
    pub html_media_element: Value,
}

pub(crate) const WIDEVINE: &str = "com.widevine.alpha";

fn method(
    sandbox: &Sandbox,
    target: &Value,
    name: &str,
    body: impl Fn(&Value, &[Value]) -> Result<Value, Value> + 'static,
) {
    let function = sandbox.native_fn(body);
    sandbox
        .set(target, name, &function)
        .expect("fixture objects accept data properties");
}

fn prototype(sandbox: &Sandbox, class: &Value) -> Value {
    sandbox
        .get(class, "prototype")
        .expect("native classes have a prototype")
}

/// Bind a small EME implementation in the sandbox's global scope.
///
/// - `navigator.requestMediaKeySystemAccess(keySystem)` resolves with a
///   `MediaKeySystemAccess` for [`WIDEVINE`] and rejects otherwise.
/// - `MediaKeySystemAccess#createMediaKeys()` resolves with `MediaKeys`.
/// - `MediaKeys#createSession(type)` returns a `MediaKeySession`, and
///   throws for the `"bogus"` session type.
/// - `MediaKeySession#update(x)` rejects for a negative number.
pub(crate) fn fake_eme(sandbox: &Sandbox) -> FakeEme {
    let scope = sandbox.global();

    let inner = sandbox.clone();
    let media_key_session = sandbox.native_class("MediaKeySession", move |this, args| {
        let id = args.first().cloned().unwrap_or_else(|| "".into());
        inner.set(this, "_sessionId", &id)
    });
    let session_proto = prototype(sandbox, &media_key_session);
    let inner = sandbox.clone();
    sandbox.native_accessor(&session_proto, "sessionId", move |this| inner.get(this, "_sessionId"), None);
    sandbox.native_accessor(&session_proto, "expiration", |_| Ok(Value::Number(0.0)), None);
    let inner = sandbox.clone();
    sandbox.native_accessor(&session_proto, "closed", move |_| Ok(inner.resolved(Value::Undefined)), None);
    sandbox.native_accessor(&session_proto, "keyStatuses", |_| Ok("keyStatuses".into()), None);
    for name in ["generateRequest", "close", "remove"] {
        let inner = sandbox.clone();
        method(sandbox, &session_proto, name, move |_, _| Ok(inner.resolved(Value::Undefined)));
    }
    let inner = sandbox.clone();
    method(sandbox, &session_proto, "load", move |_, _| Ok(inner.resolved(false)));
    let inner = sandbox.clone();
    method(sandbox, &session_proto, "update", move |_, args| {
        match args.first().and_then(Value::as_number) {
            Some(n) if n < 0.0 => Ok(inner.rejected("InvalidAccessError")),
            _ => Ok(inner.resolved(Value::Undefined)),
        }
    });

    let media_keys = sandbox.native_class("MediaKeys", |_, _| Ok(()));
    let keys_proto = prototype(sandbox, &media_keys);
    let inner = sandbox.clone();
    let session_class = media_key_session.clone();
    method(sandbox, &keys_proto, "createSession", move |_, args| {
        if args.first().and_then(Value::as_str) == Some("bogus") {
            return Err("NotSupportedError".into());
        }
        inner.construct(&session_class, &["generated-id".into()])
    });
    let inner = sandbox.clone();
    method(sandbox, &keys_proto, "setServerCertificate", move |_, _| Ok(inner.resolved(true)));

    let inner = sandbox.clone();
    let media_key_system_access = sandbox.native_class("MediaKeySystemAccess", move |this, args| {
        let key_system = args.first().cloned().unwrap_or_default();
        inner.set(this, "_keySystem", &key_system)
    });
    let access_proto = prototype(sandbox, &media_key_system_access);
    let inner = sandbox.clone();
    sandbox.native_accessor(&access_proto, "keySystem", move |this| inner.get(this, "_keySystem"), None);
    let inner = sandbox.clone();
    method(sandbox, &access_proto, "getConfiguration", move |_, _| Ok(inner.object("MediaKeySystemConfiguration", None)));
    let inner = sandbox.clone();
    let keys_class = media_keys.clone();
    method(sandbox, &access_proto, "createMediaKeys", move |_, _| {
        let keys = inner.construct(&keys_class, &[])?;
        Ok(inner.resolved(keys))
    });

    let navigator = sandbox.object("Navigator", None);
    let inner = sandbox.clone();
    let access_class = media_key_system_access.clone();
    method(sandbox, &navigator, "requestMediaKeySystemAccess", move |_, args| {
        match args.first() {
            Some(Value::Str(key_system)) if key_system == WIDEVINE => {
                let access = inner.construct(&access_class, &[key_system.as_str().into()])?;
                Ok(inner.resolved(access))
            }
            _ => Ok(inner.rejected("NotSupportedError")),
        }
    });

    let html_media_element = sandbox.native_class("HTMLMediaElement", |_, _| Ok(()));
    let element_proto = prototype(sandbox, &html_media_element);
    let inner = sandbox.clone();
    method(sandbox, &element_proto, "setMediaKeys", move |this, args| {
        inner.set(this, "_mediaKeys", &args.first().cloned().unwrap_or_default())?;
        Ok(inner.resolved(Value::Undefined))
    });

    for (name, value) in [
        ("MediaKeys", &media_keys),
        ("MediaKeySession", &media_key_session),
        ("MediaKeySystemAccess", &media_key_system_access),
        ("navigator", &navigator),
        ("HTMLMediaElement", &html_media_element),
    ] {
        sandbox
            .set(&scope, name, value)
            .expect("the global object accepts data properties");
    }

    FakeEme {
        media_keys,
        media_key_session,
        media_key_system_access,
        navigator,
        html_media_element,
    }
}
