//! Object interceptor.
//!
//! Installs a substitute constructor in place of a scope binding. The
//! substitute records every construction and builds instances with the
//! original constructor, so they keep the native prototype chain. The
//! prototype's methods and accessors and the constructor's statics are
//! spied with the other interceptors.

use std::rc::Rc;

use crate::error::{Result, SpyError};
use crate::realm::{ConstructFn, Realm};
use crate::record::{CallInput, CallRecord};

use super::{
    own_descriptors, roll_back, spy_on_methods, spy_on_properties, spy_on_read_only_properties,
    MethodLog, Presence, SpyContext, SpyHandle,
};

/// Members of one spied constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectSpec<'a> {
    /// Binding name in the scope object, also the log entity name.
    pub name: &'a str,
    pub read_only_properties: &'a [&'a str],
    pub properties: &'a [&'a str],
    pub static_methods: &'a [&'a str],
    pub methods: &'a [&'a str],
}

/// Spy on `constructor` and bind the substitute as `scope[spec.name]`.
///
/// Fails with [`SpyError::InvalidTarget`] before any mutation when the
/// constructor or its prototype is missing. A failure half way through puts
/// back whatever was already replaced.
pub fn spy_on_whole_object<R: Realm>(
    cx: &SpyContext<R>,
    scope: &R::Value,
    constructor: &R::Value,
    spec: &ObjectSpec<'_>,
) -> Result<SpyHandle> {
    let name = spec.name;
    if cx.realm.is_nullish(constructor) {
        return Err(SpyError::InvalidTarget(name.to_string()));
    }
    let prototype = cx
        .realm
        .get(constructor, "prototype")
        .map_err(|e| SpyError::host(format!("{}.prototype", name), &e))?;
    if cx.realm.is_nullish(&prototype) {
        return Err(SpyError::InvalidTarget(name.to_string()));
    }

    cx.store.ensure_entity(name);
    let substitute = cx
        .realm
        .constructor(construct_hook(cx, name, constructor), &prototype)
        .map_err(|e| SpyError::host(name, &e))?;

    let mut installed = Vec::new();
    let bound = install_members(cx, constructor, &prototype, &substitute, spec, &mut installed)
        .and_then(|()| {
            cx.realm
                .set(scope, name, &substitute)
                .map_err(|e| SpyError::host(name, &e))
        });
    if let Err(e) = bound {
        roll_back(installed);
        return Err(e);
    }

    log::debug!("Substitute constructor installed for {}", name);
    let realm = cx.realm.clone();
    let scope = scope.clone();
    let original = constructor.clone();
    let name = name.to_string();
    Ok(SpyHandle::new(name.clone(), move || {
        roll_back(installed);
        // The scope binding goes back last.
        if let Err(e) = realm.set(&scope, &name, &original) {
            log::warn!("Could not rebind {}: {:?}", name, e);
        }
    }))
}

/// Instance methods, statics, then accessors. `installed` ends up in that
/// order so rolling back undoes accessors first.
fn install_members<R: Realm>(
    cx: &SpyContext<R>,
    constructor: &R::Value,
    prototype: &R::Value,
    substitute: &R::Value,
    spec: &ObjectSpec<'_>,
    installed: &mut Vec<SpyHandle>,
) -> Result<()> {
    let name = spec.name;
    let prototype_path = format!("{}.prototype", name);

    installed.push(spy_on_methods(
        cx,
        prototype,
        spec.methods,
        Presence::Required,
        &prototype_path,
        MethodLog::instance(name),
    )?);

    installed.push(spy_on_methods(
        cx,
        constructor,
        spec.static_methods,
        Presence::Optional,
        name,
        MethodLog::statics(name),
    )?);
    for &method in spec.static_methods {
        let path = format!("{}.{}", name, method);
        let spied = cx
            .realm
            .get(constructor, method)
            .map_err(|e| SpyError::host(&path, &e))?;
        if !cx.realm.is_callable(&spied) {
            continue;
        }
        // Statics keep the original constructor as `this`.
        let bound = cx
            .realm
            .bind(&spied, constructor)
            .map_err(|e| SpyError::host(&path, &e))?;
        cx.realm
            .set(substitute, method, &bound)
            .map_err(|e| SpyError::host(&path, &e))?;
    }

    let accessors: Vec<&str> = spec
        .read_only_properties
        .iter()
        .chain(spec.properties)
        .copied()
        .collect();
    let descriptors = own_descriptors(&cx.realm, prototype, &accessors)?;
    installed.push(spy_on_read_only_properties(
        cx,
        prototype,
        &descriptors,
        spec.read_only_properties,
        &prototype_path,
        name,
    )?);
    installed.push(spy_on_properties(
        cx,
        prototype,
        &descriptors,
        spec.properties,
        &prototype_path,
        name,
    )?);
    Ok(())
}

fn construct_hook<R: Realm>(
    cx: &SpyContext<R>,
    name: &str,
    original: &R::Value,
) -> ConstructFn<R::Value> {
    let cx = cx.clone();
    let name = name.to_string();
    let original = original.clone();

    Rc::new(move |args: Vec<R::Value>| {
        cx.notifier.on_object_instantiation(&name, &args);
        let record = CallRecord::new(original.clone(), CallInput::Args(args.clone())).shared();
        cx.store.push_construction(&name, Rc::clone(&record));

        match cx.realm.construct(&original, &args) {
            Ok(instance) => {
                cx.notifier.on_object_instantiation_success(&name, &instance);
                record.borrow_mut().record_response(instance.clone());
                Ok(instance)
            }
            Err(error) => {
                cx.notifier.on_object_instantiation_error(&name, &error);
                record.borrow_mut().record_error(error.clone());
                Err(error)
            }
        }
    })
}
