//! The EME roster and the session controller that installs it.
//!
//! [`EmeSpy`] captures the native constructors once, when it is created.
//! Every `start` spies on those captured natives, so a restart never wraps
//! a substitute left behind by an earlier session.

use std::rc::Rc;

use serde::Serialize;

use crate::config::SpyConfig;
use crate::error::{ErrorCode, Result, SpyError};
use crate::notify::{LogNotifier, Notifier};
use crate::realm::Realm;
use crate::record::LogStore;
use crate::spy::{
    spy_on_methods, spy_on_whole_object, MethodLog, ObjectSpec, Presence, SpyContext, SpyHandle,
};

pub const MEDIA_KEYS: ObjectSpec<'static> = ObjectSpec {
    name: "MediaKeys",
    read_only_properties: &[],
    properties: &[],
    static_methods: &[],
    methods: &["createSession", "setServerCertificate"],
};

pub const MEDIA_KEY_SESSION: ObjectSpec<'static> = ObjectSpec {
    name: "MediaKeySession",
    read_only_properties: &["sessionId", "expiration", "closed", "keyStatuses"],
    properties: &[],
    static_methods: &[],
    methods: &["generateRequest", "load", "update", "close", "remove"],
};

pub const MEDIA_KEY_SYSTEM_ACCESS: ObjectSpec<'static> = ObjectSpec {
    name: "MediaKeySystemAccess",
    read_only_properties: &["keySystem"],
    properties: &[],
    static_methods: &[],
    methods: &["getConfiguration", "createMediaKeys"],
};

/// A single method spied in place on an object found in the scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec<'a> {
    /// Scope binding holding the owner, also the log entity name.
    pub owner: &'a str,
    /// Spy on `owner.prototype` rather than `owner` itself.
    pub on_prototype: bool,
    pub method: &'a str,
}

pub const REQUEST_MEDIA_KEY_SYSTEM_ACCESS: MethodSpec<'static> = MethodSpec {
    owner: "navigator",
    on_prototype: false,
    method: "requestMediaKeySystemAccess",
};

pub const SET_MEDIA_KEYS: MethodSpec<'static> = MethodSpec {
    owner: "HTMLMediaElement",
    on_prototype: true,
    method: "setMediaKeys",
};

/// A spy of the roster that could not be installed by the last `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupFailure {
    pub spy: String,
    pub code: ErrorCode,
    pub message: String,
}

impl SetupFailure {
    fn new(spy: String, error: &SpyError) -> Self {
        Self {
            spy,
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// Scope bindings as they were when the spy was created.
struct Natives<V> {
    media_keys: Option<V>,
    media_key_session: Option<V>,
    media_key_system_access: Option<V>,
    navigator: Option<V>,
    html_media_element: Option<V>,
}

impl<V: std::fmt::Debug> Natives<V> {
    fn capture<R: Realm<Value = V>>(realm: &R, scope: &V) -> Self {
        let read = |name: &str| match realm.get(scope, name) {
            Ok(value) if !realm.is_nullish(&value) => Some(value),
            Ok(_) => None,
            Err(e) => {
                log::warn!("⚠️ Could not read {}: {:?}", name, e);
                None
            }
        };
        Self {
            media_keys: read(MEDIA_KEYS.name),
            media_key_session: read(MEDIA_KEY_SESSION.name),
            media_key_system_access: read(MEDIA_KEY_SYSTEM_ACCESS.name),
            navigator: read(REQUEST_MEDIA_KEY_SYSTEM_ACCESS.owner),
            html_media_element: read(SET_MEDIA_KEYS.owner),
        }
    }
}

/// Session controller: owns the active spies and the call log.
pub struct EmeSpy<R: Realm> {
    realm: R,
    scope: R::Value,
    natives: Natives<R::Value>,
    notifier: Rc<dyn Notifier<R::Value>>,
    store: LogStore<R::Value>,
    handles: Vec<SpyHandle>,
    failures: Vec<SetupFailure>,
    active: bool,
}

impl<R: Realm> EmeSpy<R> {
    /// Spy on the realm's global scope.
    pub fn new(realm: R) -> Self {
        let scope = realm.global();
        Self::with_scope(realm, scope)
    }

    /// Spy on the EME bindings of `scope`, capturing them now.
    pub fn with_scope(realm: R, scope: R::Value) -> Self {
        let natives = Natives::capture(&realm, &scope);
        Self {
            realm,
            scope,
            natives,
            notifier: Rc::new(LogNotifier),
            store: LogStore::new(),
            handles: Vec::new(),
            failures: Vec::new(),
            active: false,
        }
    }

    pub fn with_notifier(mut self, notifier: Rc<dyn Notifier<R::Value>>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the notification sink. Spies installed by the next `start`
    /// use it; the current ones keep theirs.
    pub fn set_notifier(&mut self, notifier: Rc<dyn Notifier<R::Value>>) {
        self.notifier = notifier;
    }

    /// Install every enabled spy, tearing down the current session first.
    /// Returns the number of spies installed.
    pub fn start(&mut self, config: &SpyConfig) -> usize {
        if self.active {
            log::info!("🔄 Restarting EME spy");
            self.stop();
        }

        let cx = SpyContext::new(
            self.realm.clone(),
            Rc::clone(&self.notifier),
            self.store.clone(),
        );
        let objects = [
            (config.media_keys, &MEDIA_KEYS, &self.natives.media_keys),
            (config.media_key_session, &MEDIA_KEY_SESSION, &self.natives.media_key_session),
            (
                config.media_key_system_access,
                &MEDIA_KEY_SYSTEM_ACCESS,
                &self.natives.media_key_system_access,
            ),
        ];
        let methods = [
            (
                config.request_media_key_system_access,
                &REQUEST_MEDIA_KEY_SYSTEM_ACCESS,
                &self.natives.navigator,
            ),
            (config.set_media_keys, &SET_MEDIA_KEYS, &self.natives.html_media_element),
        ];

        let mut handles = Vec::new();
        let mut failures = Vec::new();
        for (enabled, spec, native) in objects {
            if !enabled {
                continue;
            }
            let Some(native) = native else {
                log::warn!("⚠️ {} is not available, skipping", spec.name);
                continue;
            };
            match spy_on_whole_object(&cx, &self.scope, native, spec) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    if e.is_configuration() {
                        log::warn!("⚠️ Could not spy on {}: {}", spec.name, e);
                    } else {
                        log::error!("❌ Could not spy on {}: {}", spec.name, e);
                    }
                    failures.push(SetupFailure::new(spec.name.to_string(), &e));
                }
            }
        }
        for (enabled, spec, owner) in methods {
            if !enabled {
                continue;
            }
            let Some(owner) = owner else {
                log::warn!("⚠️ {} is not available, skipping", spec.owner);
                continue;
            };
            let label = format!("{}.{}", spec.owner, spec.method);
            match spy_on_method(&cx, owner, spec) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    if e.is_configuration() {
                        log::warn!("⚠️ Could not spy on {}: {}", label, e);
                    } else {
                        log::error!("❌ Could not spy on {}: {}", label, e);
                    }
                    failures.push(SetupFailure::new(label, &e));
                }
            }
        }

        self.handles = handles;
        self.failures = failures;
        self.active = true;
        log::info!("✅ EME spy started with {} spies", self.handles.len());
        self.handles.len()
    }

    /// Restore every native binding. Does nothing when idle.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        let count = self.handles.len();
        for handle in self.handles.drain(..).rev() {
            handle.restore();
        }
        self.active = false;
        log::info!("✅ EME spy stopped, {} spies restored", count);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of spies currently installed.
    pub fn spy_count(&self) -> usize {
        self.handles.len()
    }

    /// Labels of the installed spies, in installation order.
    pub fn spy_labels(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.label().to_string()).collect()
    }

    /// Spies the last `start` tried and failed to install. Entities absent
    /// from the scope are skipped, not failed.
    pub fn failures(&self) -> &[SetupFailure] {
        &self.failures
    }

    /// The shared call log.
    pub fn calls(&self) -> &LogStore<R::Value> {
        &self.store
    }

    /// Clear every entity entry. Active spies keep recording.
    pub fn reset(&self) {
        self.store.reset();
        log::info!("🗑️ EME call log cleared");
    }
}

impl<R: Realm> Drop for EmeSpy<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spy_on_method<R: Realm>(
    cx: &SpyContext<R>,
    owner: &R::Value,
    spec: &MethodSpec<'_>,
) -> Result<SpyHandle> {
    let (target, path) = if spec.on_prototype {
        let path = format!("{}.prototype", spec.owner);
        let prototype = cx
            .realm
            .get(owner, "prototype")
            .map_err(|e| SpyError::host(&path, &e))?;
        if cx.realm.is_nullish(&prototype) {
            return Err(SpyError::InvalidTarget(spec.owner.to_string()));
        }
        (prototype, path)
    } else {
        (owner.clone(), spec.owner.to_string())
    };
    spy_on_methods(
        cx,
        &target,
        &[spec.method],
        Presence::Required,
        &path,
        MethodLog::instance(spec.owner),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::{Sandbox, Value};
    use crate::record::{Access, MethodKind};
    use crate::test_support::{fake_eme, RecordingNotifier, WIDEVINE};

    fn spy(sandbox: &Sandbox) -> (EmeSpy<Sandbox>, Rc<RecordingNotifier>) {
        let notifier = Rc::new(RecordingNotifier::default());
        let spy = EmeSpy::new(sandbox.clone()).with_notifier(notifier.clone());
        (spy, notifier)
    }

    fn global(sandbox: &Sandbox, name: &str) -> Value {
        sandbox.get(&sandbox.global(), name).unwrap()
    }

    #[test]
    fn test_start_installs_whole_roster() {
        let sandbox = Sandbox::new();
        let natives = fake_eme(&sandbox);
        let (mut spy, _) = spy(&sandbox);

        assert!(!spy.is_active());
        assert_eq!(spy.start(&SpyConfig::default()), 5);
        assert!(spy.is_active());
        assert!(spy.failures().is_empty());
        assert_eq!(
            spy.spy_labels(),
            vec![
                "MediaKeys",
                "MediaKeySession",
                "MediaKeySystemAccess",
                "navigator",
                "HTMLMediaElement.prototype"
            ]
        );
        assert_ne!(global(&sandbox, "MediaKeys"), natives.media_keys);
        assert_ne!(global(&sandbox, "MediaKeySession"), natives.media_key_session);
        assert_ne!(global(&sandbox, "MediaKeySystemAccess"), natives.media_key_system_access);
        assert_eq!(global(&sandbox, "navigator"), natives.navigator);
        assert_eq!(global(&sandbox, "HTMLMediaElement"), natives.html_media_element);
        assert_eq!(
            spy.calls().entity_names(),
            vec!["MediaKeySession", "MediaKeySystemAccess", "MediaKeys"]
        );
    }

    #[test]
    fn test_full_license_flow_is_recorded() {
        let sandbox = Sandbox::new();
        fake_eme(&sandbox);
        let (mut spy, notifier) = spy(&sandbox);
        spy.start(&SpyConfig::default());

        let navigator = global(&sandbox, "navigator");
        let request = sandbox.get(&navigator, "requestMediaKeySystemAccess").unwrap();
        let pending = sandbox.call(&request, &navigator, &[WIDEVINE.into()]).unwrap();
        let access = sandbox.settled(&pending).unwrap().unwrap();
        assert_eq!(sandbox.get(&access, "keySystem").unwrap(), Value::from(WIDEVINE));

        let create = sandbox.get(&access, "createMediaKeys").unwrap();
        let keys = sandbox.call(&create, &access, &[]).unwrap();
        let keys = sandbox.settled(&keys).unwrap().unwrap();
        let create_session = sandbox.get(&keys, "createSession").unwrap();
        let session = sandbox.call(&create_session, &keys, &["temporary".into()]).unwrap();
        assert_eq!(sandbox.get(&session, "sessionId").unwrap(), Value::from("generated-id"));

        let update = sandbox.get(&session, "update").unwrap();
        let updated = sandbox.call(&update, &session, &[Value::Number(-1.0)]).unwrap();
        assert_eq!(sandbox.settled(&updated), Some(Err(Value::from("InvalidAccessError"))));

        let calls = spy.calls();
        let navigator_log = calls.entity("navigator").unwrap();
        let request_record = navigator_log.calls(MethodKind::Instance, "requestMediaKeySystemAccess")[0].clone();
        assert_eq!(request_record.borrow().target, navigator);
        assert_eq!(request_record.borrow().resolved(), Some(&access));

        let access_log = calls.entity("MediaKeySystemAccess").unwrap();
        assert_eq!(access_log.accesses("keySystem", Access::Get).len(), 1);
        assert_eq!(access_log.calls(MethodKind::Instance, "createMediaKeys").len(), 1);

        let keys_log = calls.entity("MediaKeys").unwrap();
        let created = keys_log.calls(MethodKind::Instance, "createSession")[0].clone();
        assert_eq!(created.borrow().response(), Some(&session));
        // Natives construct their own objects without going through the scope.
        assert!(keys_log.new.is_empty());

        let session_log = calls.entity("MediaKeySession").unwrap();
        assert_eq!(session_log.accesses("sessionId", Access::Get).len(), 1);
        let update_record = session_log.calls(MethodKind::Instance, "update")[0].clone();
        assert_eq!(update_record.borrow().rejected(), Some(&Value::from("InvalidAccessError")));
        assert!(notifier.names().contains(&"reject"));
    }

    #[test]
    fn test_page_constructions_are_recorded() {
        let sandbox = Sandbox::new();
        let natives = fake_eme(&sandbox);
        let (mut spy, _) = spy(&sandbox);
        spy.start(&SpyConfig::default());

        let substitute = global(&sandbox, "MediaKeySystemAccess");
        let access = sandbox.construct(&substitute, &[WIDEVINE.into()]).unwrap();
        assert_eq!(
            access.as_object().unwrap().prototype_of(),
            sandbox
                .get(&natives.media_key_system_access, "prototype")
                .unwrap()
                .as_object()
                .cloned()
        );
        let log = spy.calls().entity("MediaKeySystemAccess").unwrap();
        assert_eq!(log.new.len(), 1);
        assert_eq!(log.new[0].borrow().target, natives.media_key_system_access);
    }

    #[test]
    fn test_thrown_native_error_reaches_caller() {
        let sandbox = Sandbox::new();
        let natives = fake_eme(&sandbox);
        let (mut spy, notifier) = spy(&sandbox);
        spy.start(&SpyConfig::default());

        let keys = sandbox.construct(&natives.media_keys, &[]).unwrap();
        let create_session = sandbox.get(&keys, "createSession").unwrap();
        let thrown = sandbox.call(&create_session, &keys, &["bogus".into()]).unwrap_err();
        assert_eq!(thrown, Value::from("NotSupportedError"));

        let log = spy.calls().entity("MediaKeys").unwrap();
        let record = log.calls(MethodKind::Instance, "createSession")[0].clone();
        assert_eq!(record.borrow().error(), Some(&thrown));
        assert!(record.borrow().response().is_none());
        assert_eq!(notifier.names(), vec!["call", "call-error"]);
    }

    #[test]
    fn test_missing_entities_are_skipped() {
        let sandbox = Sandbox::new();
        let natives = fake_eme(&sandbox);
        let scope = sandbox.global();
        sandbox.set(&scope, "MediaKeySession", &Value::Undefined).unwrap();
        sandbox.set(&scope, "navigator", &sandbox.object("Navigator", None)).unwrap();

        let (mut spy, _) = spy(&sandbox);
        assert_eq!(spy.start(&SpyConfig::default()), 3);
        assert_eq!(
            spy.spy_labels(),
            vec!["MediaKeys", "MediaKeySystemAccess", "HTMLMediaElement.prototype"]
        );
        assert_eq!(global(&sandbox, "MediaKeySession"), Value::Undefined);
        assert_eq!(
            spy.failures(),
            &[SetupFailure {
                spy: "navigator.requestMediaKeySystemAccess".to_string(),
                code: ErrorCode::MissingMember,
                message: "No method in navigator.requestMediaKeySystemAccess".to_string(),
            }]
        );

        // Skipped entities leave the prototypes of their natives alone.
        let session_proto = sandbox.get(&natives.media_key_session, "prototype").unwrap();
        let update = sandbox.get(&session_proto, "update").unwrap();
        spy.stop();
        assert_eq!(sandbox.get(&session_proto, "update").unwrap(), update);
    }

    #[test]
    fn test_config_disables_spies() {
        let sandbox = Sandbox::new();
        let natives = fake_eme(&sandbox);
        let (mut spy, _) = spy(&sandbox);

        let config = SpyConfig {
            media_keys: true,
            set_media_keys: true,
            ..SpyConfig::none()
        };
        assert_eq!(spy.start(&config), 2);
        assert_eq!(global(&sandbox, "MediaKeySession"), natives.media_key_session);
        assert!(spy.calls().entity("MediaKeySession").is_none());

        assert_eq!(spy.start(&SpyConfig::none()), 0);
        assert!(spy.is_active());
        assert_eq!(global(&sandbox, "MediaKeys"), natives.media_keys);
    }

    #[test]
    fn test_restart_does_not_double_wrap() {
        let sandbox = Sandbox::new();
        let natives = fake_eme(&sandbox);
        let (mut spy, _) = spy(&sandbox);
        spy.start(&SpyConfig::default());
        spy.start(&SpyConfig::default());
        assert_eq!(spy.spy_count(), 5);

        let keys = sandbox.construct(&natives.media_keys, &[]).unwrap();
        let certificate = sandbox.get(&keys, "setServerCertificate").unwrap();
        sandbox.call(&certificate, &keys, &[]).unwrap();
        let log = spy.calls().entity("MediaKeys").unwrap();
        assert_eq!(log.calls(MethodKind::Instance, "setServerCertificate").len(), 1);

        let substitute = global(&sandbox, "MediaKeys");
        sandbox.construct(&substitute, &[]).unwrap();
        let log = spy.calls().entity("MediaKeys").unwrap();
        assert_eq!(log.new.len(), 1);
        assert_eq!(log.new[0].borrow().target, natives.media_keys);

        spy.stop();
        assert_eq!(global(&sandbox, "MediaKeys"), natives.media_keys);
    }

    #[test]
    fn test_stop_restores_and_is_idempotent() {
        let sandbox = Sandbox::new();
        let natives = fake_eme(&sandbox);
        let keys_proto = sandbox.get(&natives.media_keys, "prototype").unwrap();
        let create_session = sandbox.get(&keys_proto, "createSession").unwrap();
        let navigator = global(&sandbox, "navigator");
        let request = sandbox.get(&navigator, "requestMediaKeySystemAccess").unwrap();

        let (mut spy, _) = spy(&sandbox);
        spy.stop();
        spy.start(&SpyConfig::default());
        spy.stop();
        spy.stop();

        assert!(!spy.is_active());
        assert_eq!(spy.spy_count(), 0);
        assert_eq!(global(&sandbox, "MediaKeys"), natives.media_keys);
        assert_eq!(global(&sandbox, "MediaKeySession"), natives.media_key_session);
        assert_eq!(sandbox.get(&keys_proto, "createSession").unwrap(), create_session);
        assert_eq!(sandbox.get(&navigator, "requestMediaKeySystemAccess").unwrap(), request);
    }

    #[test]
    fn test_reset_clears_and_recording_resumes() {
        let sandbox = Sandbox::new();
        let natives = fake_eme(&sandbox);
        let (mut spy, _) = spy(&sandbox);
        spy.start(&SpyConfig::default());

        let element = sandbox.construct(&natives.html_media_element, &[]).unwrap();
        let set_media_keys = sandbox.get(&element, "setMediaKeys").unwrap();
        sandbox.call(&set_media_keys, &element, &[Value::Null]).unwrap();
        assert!(spy.calls().entity("HTMLMediaElement").is_some());

        spy.reset();
        assert!(spy.calls().is_empty());
        assert!(spy.is_active());

        sandbox.call(&set_media_keys, &element, &[Value::Null]).unwrap();
        let log = spy.calls().entity("HTMLMediaElement").unwrap();
        let records = log.calls(MethodKind::Instance, "setMediaKeys");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].borrow().target, sandbox.get(&natives.html_media_element, "prototype").unwrap());
    }

    #[test]
    fn test_log_survives_stop_and_restart() {
        let sandbox = Sandbox::new();
        let natives = fake_eme(&sandbox);
        let (mut spy, _) = spy(&sandbox);

        for _ in 0..2 {
            spy.start(&SpyConfig::default());
            let keys = sandbox.construct(&natives.media_keys, &[]).unwrap();
            let create_session = sandbox.get(&keys, "createSession").unwrap();
            sandbox.call(&create_session, &keys, &[]).unwrap();
            spy.stop();
        }
        let log = spy.calls().entity("MediaKeys").unwrap();
        let ids: Vec<u64> = log
            .calls(MethodKind::Instance, "createSession")
            .iter()
            .map(|r| r.borrow().id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);
    }

    #[test]
    fn test_drop_restores_natives() {
        let sandbox = Sandbox::new();
        let natives = fake_eme(&sandbox);
        {
            let (mut spy, _) = spy(&sandbox);
            spy.start(&SpyConfig::default());
        }
        assert_eq!(global(&sandbox, "MediaKeys"), natives.media_keys);
    }
}
