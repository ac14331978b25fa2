//! Snapshot of the call log as plain JS objects.
//!
//! ```text
//! { MediaKeys: { new: [..], methods: { createSession: [..] },
//!                staticMethods: {}, properties: { p: { get: [..], set: [..] } },
//!                eventListeners: {} } }
//! ```
//!
//! Records become `{ self, id, timestamp, args | value, response, ... }`;
//! keys for outcomes that did not happen are left out.

use std::collections::BTreeMap;

use js_sys::{Array, Object, Reflect};
use wasm_bindgen::JsValue;

use crate::record::{CallInput, CallRecord, EntityLog, LogStore, Outcome, RecordRef, Settlement};

fn put(target: &Object, key: &str, value: &JsValue) -> Result<(), JsValue> {
    Reflect::set(target, &JsValue::from_str(key), value).map(|_| ())
}

fn record_to_js(record: &CallRecord<JsValue>) -> Result<JsValue, JsValue> {
    let out = Object::new();
    put(&out, "self", &record.target)?;
    put(&out, "id", &JsValue::from_f64(record.id as f64))?;
    put(&out, "timestamp", &JsValue::from_f64(record.timestamp))?;
    match &record.input {
        CallInput::Args(args) => put(&out, "args", &args.iter().collect::<Array>())?,
        CallInput::Value(value) => put(&out, "value", value)?,
    }
    match &record.outcome {
        Some(Outcome::Returned { value, timestamp }) => {
            put(&out, "response", value)?;
            put(&out, "responseTimestamp", &JsValue::from_f64(*timestamp))?;
        }
        Some(Outcome::Threw { error, timestamp }) => {
            put(&out, "error", error)?;
            put(&out, "errorTimestamp", &JsValue::from_f64(*timestamp))?;
        }
        None => {}
    }
    match &record.settlement {
        Some(Settlement::Resolved { value, timestamp }) => {
            put(&out, "responseResolved", value)?;
            put(&out, "responseResolvedTimestamp", &JsValue::from_f64(*timestamp))?;
        }
        Some(Settlement::Rejected { reason, timestamp }) => {
            put(&out, "responseRejected", reason)?;
            put(&out, "responseRejectedTimestamp", &JsValue::from_f64(*timestamp))?;
        }
        None => {}
    }
    Ok(out.into())
}

fn records_to_js(records: &[RecordRef<JsValue>]) -> Result<JsValue, JsValue> {
    let out = Array::new();
    for record in records {
        out.push(&record_to_js(&record.borrow())?);
    }
    Ok(out.into())
}

fn methods_to_js(methods: &BTreeMap<String, Vec<RecordRef<JsValue>>>) -> Result<JsValue, JsValue> {
    let out = Object::new();
    for (name, records) in methods {
        put(&out, name, &records_to_js(records)?)?;
    }
    Ok(out.into())
}

fn entity_to_js(log: &EntityLog<JsValue>) -> Result<JsValue, JsValue> {
    let out = Object::new();
    put(&out, "new", &records_to_js(&log.new)?)?;
    put(&out, "methods", &methods_to_js(&log.methods)?)?;
    put(&out, "staticMethods", &methods_to_js(&log.static_methods)?)?;
    let properties = Object::new();
    for (name, accesses) in &log.properties {
        let property = Object::new();
        put(&property, "get", &records_to_js(&accesses.get)?)?;
        put(&property, "set", &records_to_js(&accesses.set)?)?;
        put(&properties, name, &property)?;
    }
    put(&out, "properties", &properties)?;
    put(&out, "eventListeners", &methods_to_js(&log.event_listeners)?)?;
    Ok(out.into())
}

/// Build the JS view of `store`. Later calls do not change the result.
pub fn store_to_js(store: &LogStore<JsValue>) -> Result<JsValue, JsValue> {
    let out = Object::new();
    for (name, log) in store.entities().iter() {
        put(&out, name, &entity_to_js(log)?)?;
    }
    Ok(out.into())
}
