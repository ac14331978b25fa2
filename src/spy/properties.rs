//! Property interceptors.
//!
//! Accessor properties are replaced with instrumented accessors that run the
//! original getter (and setter) against the actual receiver. The original
//! descriptors are the restoration baseline and are put back verbatim.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Result, SpyError};
use crate::realm::{MethodFn, Realm};
use crate::record::{Access, CallInput, CallRecord};

use super::{roll_back, SpyContext, SpyHandle};

/// Own property descriptors of one object, by property name.
pub type Descriptors<R> = BTreeMap<String, <R as Realm>::Descriptor>;

/// Snapshot the own descriptors of `names` on `target`. Names without an
/// own property are left out.
pub fn own_descriptors<R: Realm>(
    realm: &R,
    target: &R::Value,
    names: &[&str],
) -> Result<Descriptors<R>> {
    let mut descriptors = Descriptors::<R>::new();
    for &name in names {
        let descriptor = realm
            .own_descriptor(target, name)
            .map_err(|e| SpyError::host(name, &e))?;
        if let Some(descriptor) = descriptor {
            descriptors.insert(name.to_string(), descriptor);
        }
    }
    Ok(descriptors)
}

/// Spy on reads of the accessors `names` of `target`.
///
/// Only a getter is installed. Names missing from `descriptors`, or whose
/// descriptor has no getter, are warned about and skipped.
pub fn spy_on_read_only_properties<R: Realm>(
    cx: &SpyContext<R>,
    target: &R::Value,
    descriptors: &Descriptors<R>,
    names: &[&str],
    path: &str,
    entity: &str,
) -> Result<SpyHandle> {
    spy_on_accessors(cx, target, descriptors, names, path, entity, false)
}

/// Spy on reads and writes of the accessors `names` of `target`.
///
/// Writes are recorded before the original setter runs and the value is
/// handed over untouched.
pub fn spy_on_properties<R: Realm>(
    cx: &SpyContext<R>,
    target: &R::Value,
    descriptors: &Descriptors<R>,
    names: &[&str],
    path: &str,
    entity: &str,
) -> Result<SpyHandle> {
    spy_on_accessors(cx, target, descriptors, names, path, entity, true)
}

fn spy_on_accessors<R: Realm>(
    cx: &SpyContext<R>,
    target: &R::Value,
    descriptors: &Descriptors<R>,
    names: &[&str],
    path: &str,
    entity: &str,
    writable: bool,
) -> Result<SpyHandle> {
    let mut installed = Vec::new();
    for &name in names {
        let complete_path = format!("{}.{}", path, name);
        let Some(descriptor) = descriptors.get(name) else {
            log::warn!("No property descriptor for {}", complete_path);
            continue;
        };
        let Some(original_get) = cx.realm.descriptor_getter(descriptor) else {
            log::warn!("{} has no getter", complete_path);
            continue;
        };

        match install(
            cx,
            target,
            name,
            &complete_path,
            entity,
            descriptor,
            original_get,
            writable,
        ) {
            Ok(handle) => installed.push(handle),
            Err(e) => {
                roll_back(installed);
                return Err(e);
            }
        }
    }

    log::debug!("Spying on {} property(ies) of {}", installed.len(), path);
    Ok(SpyHandle::new(path, move || {
        for handle in installed {
            handle.restore();
        }
    }))
}

#[allow(clippy::too_many_arguments)]
fn install<R: Realm>(
    cx: &SpyContext<R>,
    target: &R::Value,
    name: &str,
    complete_path: &str,
    entity: &str,
    descriptor: &R::Descriptor,
    original_get: R::Value,
    writable: bool,
) -> Result<SpyHandle> {
    let host_error = |e: R::Value| SpyError::host(complete_path, &e);

    let getter = cx
        .realm
        .function(getter_hook(cx, name, complete_path, entity, original_get))
        .map_err(host_error)?;
    let setter = match cx.realm.descriptor_setter(descriptor) {
        Some(original_set) if writable => Some(
            cx.realm
                .function(setter_hook(cx, name, complete_path, entity, original_set))
                .map_err(host_error)?,
        ),
        _ => None,
    };
    cx.realm
        .define_accessor(target, name, Some(&getter), setter.as_ref())
        .map_err(host_error)?;

    let realm = cx.realm.clone();
    let target = target.clone();
    let name = name.to_string();
    let descriptor = descriptor.clone();
    Ok(SpyHandle::new(complete_path, move || {
        if let Err(e) = realm.define_descriptor(&target, &name, &descriptor) {
            log::warn!("Could not restore property {}: {:?}", name, e);
        }
    }))
}

fn getter_hook<R: Realm>(
    cx: &SpyContext<R>,
    name: &str,
    complete_path: &str,
    entity: &str,
    original: R::Value,
) -> MethodFn<R::Value> {
    let cx = cx.clone();
    let name = name.to_string();
    let path = complete_path.to_string();
    let entity = entity.to_string();

    Rc::new(move |this: R::Value, _args: Vec<R::Value>| {
        let value = cx.realm.call(&original, &this, &[])?;
        cx.notifier.on_property_access(&path, &value);
        let record = CallRecord::new(this, CallInput::Value(value.clone())).shared();
        cx.store.push_access(&entity, &name, Access::Get, record);
        Ok(value)
    })
}

fn setter_hook<R: Realm>(
    cx: &SpyContext<R>,
    name: &str,
    complete_path: &str,
    entity: &str,
    original: R::Value,
) -> MethodFn<R::Value> {
    let cx = cx.clone();
    let name = name.to_string();
    let path = complete_path.to_string();
    let entity = entity.to_string();

    Rc::new(move |this: R::Value, args: Vec<R::Value>| {
        let value = args.first().cloned().unwrap_or_else(|| cx.realm.undefined());
        cx.notifier.on_property_set(&path, &value);
        let record = CallRecord::new(this.clone(), CallInput::Value(value)).shared();
        cx.store
            .push_access(&entity, &name, Access::Set, Rc::clone(&record));
        cx.realm.call(&original, &this, &args).inspect_err(|error| {
            record.borrow_mut().record_error(error.clone());
        })
    })
}
