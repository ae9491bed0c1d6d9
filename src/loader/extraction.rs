//! Typed evaluation of query programs

use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::handle::EngineHandle;
use crate::engine::EngineValue;
use crate::{Error, Result};

/// Decoding of an engine value into a Rust type
pub trait FromEngineValue: Sized {
    /// Shape name reported when decoding fails
    const SHAPE: &'static str;

    /// Decode, handing the value back on mismatch
    fn from_engine_value(value: EngineValue) -> std::result::Result<Self, EngineValue>;
}

impl FromEngineValue for EngineValue {
    const SHAPE: &'static str = "any";

    fn from_engine_value(value: EngineValue) -> std::result::Result<Self, EngineValue> {
        Ok(value)
    }
}

impl FromEngineValue for () {
    const SHAPE: &'static str = "any";

    fn from_engine_value(_: EngineValue) -> std::result::Result<Self, EngineValue> {
        Ok(())
    }
}

impl FromEngineValue for bool {
    const SHAPE: &'static str = "boolean";

    fn from_engine_value(value: EngineValue) -> std::result::Result<Self, EngineValue> {
        match value {
            EngineValue::Bool(b) => Ok(b),
            other => Err(other),
        }
    }
}

impl FromEngineValue for f64 {
    const SHAPE: &'static str = "number";

    fn from_engine_value(value: EngineValue) -> std::result::Result<Self, EngineValue> {
        match value {
            EngineValue::Number(n) => Ok(n),
            other => Err(other),
        }
    }
}

impl FromEngineValue for String {
    const SHAPE: &'static str = "string";

    fn from_engine_value(value: EngineValue) -> std::result::Result<Self, EngineValue> {
        match value {
            EngineValue::String(s) => Ok(s),
            other => Err(other),
        }
    }
}

impl FromEngineValue for Option<String> {
    const SHAPE: &'static str = "string or null";

    fn from_engine_value(value: EngineValue) -> std::result::Result<Self, EngineValue> {
        match value {
            EngineValue::Null => Ok(None),
            EngineValue::String(s) => Ok(Some(s)),
            other => Err(other),
        }
    }
}

impl FromEngineValue for Vec<String> {
    const SHAPE: &'static str = "array<string>";

    fn from_engine_value(value: EngineValue) -> std::result::Result<Self, EngineValue> {
        let EngineValue::Array(items) = value else {
            return Err(value);
        };

        if !items.iter().all(serde_json::Value::is_string) {
            return Err(EngineValue::Array(items));
        }

        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect())
    }
}

impl FromEngineValue for HashMap<String, String> {
    const SHAPE: &'static str = "object<string, string>";

    fn from_engine_value(value: EngineValue) -> std::result::Result<Self, EngineValue> {
        let EngineValue::Object(map) = value else {
            return Err(value);
        };

        if !map.values().all(serde_json::Value::is_string) {
            return Err(EngineValue::Object(map));
        }

        Ok(map
            .into_iter()
            .filter_map(|(key, item)| match item {
                serde_json::Value::String(s) => Some((key, s)),
                _ => None,
            })
            .collect())
    }
}

/// Shape name of a value that failed to decode
fn received_shape(value: &EngineValue) -> String {
    match value {
        EngineValue::Array(items) if !items.is_empty() => {
            let mut kinds: Vec<&str> = items.iter().map(json_kind).collect();
            kinds.sort_unstable();
            kinds.dedup();
            format!("array<{}>", kinds.join(" | "))
        }
        EngineValue::Object(map) if !map.is_empty() => {
            let mut kinds: Vec<&str> = map.values().map(json_kind).collect();
            kinds.sort_unstable();
            kinds.dedup();
            format!("object<string, {}>", kinds.join(" | "))
        }
        other => other.type_name().to_string(),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Run a program on the engine and decode its result
///
/// Engine failures become [`Error::ScriptExecutionFailed`]; a value of the
/// wrong shape becomes [`Error::UnexpectedResultType`]. With a
/// `script_timeout`, an evaluation that outlives it fails with
/// [`Error::Timeout`]. Nothing is retried.
pub async fn evaluate<T: FromEngineValue>(
    handle: &EngineHandle,
    program: &str,
    script_timeout: Option<Duration>,
) -> Result<T> {
    let engine = handle.lock().await?;

    let outcome = match script_timeout {
        Some(limit) => tokio::time::timeout(limit, engine.evaluate(program))
            .await
            .map_err(|_| Error::timeout(format!("Script did not complete within {:?}", limit)))?,
        None => engine.evaluate(program).await,
    };
    drop(engine);

    let value = outcome.map_err(|e| match e {
        Error::SessionClosed | Error::ScriptExecutionFailed(_) => e,
        other => Error::script_execution_failed(other.to_string()),
    })?;

    T::from_engine_value(value).map_err(|value| {
        let received = received_shape(&value);
        debug!("Result shape mismatch: expected {}, received {}", T::SHAPE, received);
        Error::unexpected_result_type(T::SHAPE, received)
    })
}
