//! Method interceptor.
//!
//! Replaces named functions on an object with forwarders that record each
//! call, run the original with the caller's `this` and arguments, and record
//! the outcome. Deferred responses are watched in the background and the
//! same record is completed when they settle.

use std::rc::Rc;

use crate::error::{Result, SpyError};
use crate::realm::{MethodFn, Realm};
use crate::record::{CallInput, CallRecord, MethodKind, RecordRef};

use super::{Presence, SpyContext, SpyHandle};

/// Where the calls of one method interceptor are recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodLog {
    pub entity: String,
    pub kind: MethodKind,
}

impl MethodLog {
    pub fn instance(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            kind: MethodKind::Instance,
        }
    }

    pub fn statics(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            kind: MethodKind::Static,
        }
    }
}

/// A method captured before being replaced.
struct Captured<R: Realm> {
    name: String,
    original: R::Value,
    /// Own property as it was, `None` if the method was inherited.
    own: Option<R::Descriptor>,
}

/// Spy on the functions `names` of `target`.
///
/// Every member is looked up before anything is replaced, so a missing
/// required member leaves `target` untouched. `path` is the human-readable
/// location of `target` (e.g. `"MediaKeys.prototype"`), used in
/// notifications.
pub fn spy_on_methods<R: Realm>(
    cx: &SpyContext<R>,
    target: &R::Value,
    names: &[&str],
    presence: Presence,
    path: &str,
    log: MethodLog,
) -> Result<SpyHandle> {
    let mut captured: Vec<Captured<R>> = Vec::with_capacity(names.len());
    for &name in names {
        let complete_path = format!("{}.{}", path, name);
        let original = cx
            .realm
            .get(target, name)
            .map_err(|e| SpyError::host(&complete_path, &e))?;
        if !cx.realm.is_callable(&original) {
            match presence {
                Presence::Required => return Err(SpyError::MissingMember(complete_path)),
                Presence::Optional => {
                    log::warn!("No method in {}", complete_path);
                    continue;
                }
            }
        }
        let own = cx
            .realm
            .own_descriptor(target, name)
            .map_err(|e| SpyError::host(&complete_path, &e))?;
        captured.push(Captured {
            name: name.to_string(),
            original,
            own,
        });
    }

    let mut forwarders = Vec::with_capacity(captured.len());
    for method in &captured {
        let complete_path = format!("{}.{}", path, method.name);
        let body = forwarder(cx, target, &method.name, &complete_path, &log, &method.original);
        let function = cx
            .realm
            .function(body)
            .map_err(|e| SpyError::host(&complete_path, &e))?;
        forwarders.push(function);
    }

    for (installed, (method, forwarder)) in captured.iter().zip(&forwarders).enumerate() {
        if let Err(e) = cx.realm.set(target, &method.name, forwarder) {
            put_back(&cx.realm, target, &captured[..installed], path);
            return Err(SpyError::host(format!("{}.{}", path, method.name), &e));
        }
    }

    log::debug!("Spying on {} method(s) of {}", captured.len(), path);
    let realm = cx.realm.clone();
    let target = target.clone();
    let path = path.to_string();
    Ok(SpyHandle::new(path.clone(), move || {
        put_back(&realm, &target, &captured, &path);
    }))
}

fn put_back<R: Realm>(realm: &R, target: &R::Value, captured: &[Captured<R>], path: &str) {
    for method in captured {
        let restored = match &method.own {
            Some(descriptor) => realm.define_descriptor(target, &method.name, descriptor),
            None => realm.delete(target, &method.name),
        };
        if let Err(e) = restored {
            log::warn!("Could not restore {}.{}: {:?}", path, method.name, e);
        }
    }
}

fn forwarder<R: Realm>(
    cx: &SpyContext<R>,
    target: &R::Value,
    method: &str,
    complete_path: &str,
    log: &MethodLog,
    original: &R::Value,
) -> MethodFn<R::Value> {
    let cx = cx.clone();
    let target = target.clone();
    let method = method.to_string();
    let path = complete_path.to_string();
    let log = log.clone();
    let original = original.clone();

    Rc::new(move |this: R::Value, args: Vec<R::Value>| {
        cx.notifier.on_function_call(&path, &args);
        let record = CallRecord::new(target.clone(), CallInput::Args(args.clone())).shared();
        cx.store
            .push_call(&log.entity, log.kind, &method, Rc::clone(&record));

        let response = match cx.realm.call(&original, &this, &args) {
            Ok(response) => response,
            Err(error) => {
                cx.notifier.on_function_call_error(&path, &error);
                record.borrow_mut().record_error(error.clone());
                return Err(error);
            }
        };
        cx.notifier.on_function_call_success(&path, &response);
        record.borrow_mut().record_response(response.clone());
        watch_settlement(&cx, &path, record, &response);
        Ok(response)
    })
}

/// Complete `record` when `response` settles, if it is deferred.
fn watch_settlement<R: Realm>(
    cx: &SpyContext<R>,
    path: &str,
    record: RecordRef<R::Value>,
    response: &R::Value,
) {
    let notifier = Rc::clone(&cx.notifier);
    let path = path.to_string();
    cx.realm.when_settled(
        response,
        Box::new(move |settled| match settled {
            Ok(value) => {
                notifier.on_function_promise_resolve(&path, &value);
                record.borrow_mut().record_resolved(value);
            }
            Err(reason) => {
                notifier.on_function_promise_reject(&path, &reason);
                record.borrow_mut().record_rejected(reason);
            }
        }),
    );
}
