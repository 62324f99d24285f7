//! The output-document shape shared by [`crate::MapBuilder`] and [`crate::GroupBuilder`]: the
//! result payload merged with bookkeeping fields, or an error envelope on a domain failure.

use maggma_core::ItemError;
use maggma_time::Time;
use serde_json::{Map, Value};
use std::time::Duration;

/// Build one target document: `outcome`'s payload (on success) merged with `{key_field:
/// key_value, last_updated_field: now, _bt: build_tag}`, or `{error, state: "failed"}` in
/// place of the payload on a domain error. The bookkeeping fields are inserted last so a
/// careless `unary_function`/`nary_function` can't clobber them.
pub(crate) fn build_output(
    key_field: &str,
    key_value: Value,
    last_updated_field: &str,
    now: Time,
    build_tag: &str,
    outcome: Result<Value, ItemError>,
    process_time: Option<Duration>,
) -> Value {
    let mut doc = match &outcome {
        Ok(payload) => payload.as_object().cloned().unwrap_or_default(),
        Err(_) => Map::new(),
    };

    match outcome {
        Ok(_) => {
            if let Some(elapsed) = process_time {
                doc.insert(
                    "process_time_seconds".to_string(),
                    serde_json::json!(elapsed.as_secs_f64()),
                );
            }
        }
        Err(err) => {
            doc.insert("error".to_string(), Value::String(err.message));
            doc.insert("state".to_string(), Value::String("failed".to_string()));
        }
    }

    doc.insert(key_field.to_string(), key_value);
    doc.insert(last_updated_field.to_string(), Value::String(now.to_rfc3339()));
    doc.insert("_bt".to_string(), Value::String(build_tag.to_string()));

    Value::Object(doc)
}

/// As [`build_output`], but for [`crate::GroupBuilder`]: the document identity is the tuple
/// of `grouping_properties` fields (each set to its scalar group value) rather than a
/// single key field, and `member_key_field` is set to the *plural* -- the source key
/// field's name, holding every member's key value as a list.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_group_output(
    grouping_properties: &[String],
    group_values: &[Value],
    member_key_field: &str,
    member_keys: Vec<Value>,
    last_updated_field: &str,
    now: Time,
    build_tag: &str,
    outcome: Result<Value, ItemError>,
    process_time: Option<Duration>,
) -> Value {
    let mut doc = match &outcome {
        Ok(payload) => payload.as_object().cloned().unwrap_or_default(),
        Err(_) => Map::new(),
    };

    match outcome {
        Ok(_) => {
            if let Some(elapsed) = process_time {
                doc.insert(
                    "process_time_seconds".to_string(),
                    serde_json::json!(elapsed.as_secs_f64()),
                );
            }
        }
        Err(err) => {
            doc.insert("error".to_string(), Value::String(err.message));
            doc.insert("state".to_string(), Value::String("failed".to_string()));
        }
    }

    for (field, value) in grouping_properties.iter().zip(group_values.iter()) {
        doc.insert(field.clone(), value.clone());
    }
    doc.insert(member_key_field.to_string(), Value::Array(member_keys));
    doc.insert(last_updated_field.to_string(), Value::String(now.to_rfc3339()));
    doc.insert("_bt".to_string(), Value::String(build_tag.to_string()));

    Value::Object(doc)
}
