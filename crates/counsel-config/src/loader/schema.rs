//! Schema validation helpers for Counsel JSON5 configuration.

use super::SchemaMode;
use crate::ConfigError;
use serde_json::{Map, Value};

/// Validate a single config layer against the schema.
pub(super) fn validate_layer_schema(
    value: &Value,
    _mode: SchemaMode,
    layer: &str,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    let allowed = [
        "$schema",
        "models",
        "retrieval",
        "analysis",
        "generation",
        "service",
        "recovery",
    ];
    ensure_allowed_keys(map, &allowed, layer, "")?;

    if let Some(value) = map.get("$schema") {
        expect_string(value, layer, "$schema")?;
    }
    if let Some(value) = map.get("models") {
        validate_models(value, layer, "models")?;
    }
    if let Some(value) = map.get("retrieval") {
        validate_retrieval(value, layer, "retrieval")?;
    }
    if let Some(value) = map.get("analysis") {
        validate_analysis(value, layer, "analysis")?;
    }
    if let Some(value) = map.get("generation") {
        validate_generation(value, layer, "generation")?;
    }
    if let Some(value) = map.get("service") {
        validate_service(value, layer, "service")?;
    }
    if let Some(value) = map.get("recovery") {
        validate_recovery(value, layer, "recovery")?;
    }

    Ok(())
}

/// Validate the "models" block.
fn validate_models(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let allowed = ["catalog", "embedding", "utility", "generation", "gpu"];
    ensure_allowed_keys(map, &allowed, layer, path)?;

    if let Some(value) = map.get("catalog") {
        let arr = expect_array(value, layer, &join_path(path, "catalog"))?;
        for (idx, entry) in arr.iter().enumerate() {
            validate_model_descriptor(entry, layer, &format!("{path}.catalog[{idx}]"))?;
        }
    }
    for key in ["embedding", "utility", "generation"] {
        if let Some(value) = map.get(key) {
            expect_string(value, layer, &join_path(path, key))?;
        }
    }
    if let Some(value) = map.get("gpu") {
        validate_gpu_tiers(value, layer, &join_path(path, "gpu"))?;
    }
    Ok(())
}

/// Validate one catalog entry.
fn validate_model_descriptor(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let allowed = ["name", "path", "device", "memory_cost_mb", "max_gpu_layers"];
    ensure_allowed_keys(map, &allowed, layer, path)?;

    for key in ["name", "path"] {
        let field_path = join_path(path, key);
        let Some(field) = map.get(key) else {
            return Err(invalid_field(layer, &field_path, "missing required field"));
        };
        expect_string(field, layer, &field_path)?;
    }
    if let Some(value) = map.get("device") {
        validate_device_class(value, layer, &join_path(path, "device"))?;
    }
    if let Some(value) = map.get("memory_cost_mb") {
        expect_u64(value, layer, &join_path(path, "memory_cost_mb"))?;
    }
    if let Some(value) = map.get("max_gpu_layers") {
        expect_u64(value, layer, &join_path(path, "max_gpu_layers"))?;
    }
    Ok(())
}

/// Validate device class values.
fn validate_device_class(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let Some(device) = value.as_str() else {
        return Err(invalid_field(layer, path, "expected string"));
    };
    if matches!(device, "cpu" | "gpu") {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "invalid device class"))
    }
}

/// Validate the GPU tier thresholds block.
fn validate_gpu_tiers(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let allowed = [
        "full_offload_mb",
        "partial_offload_mb",
        "partial_layers",
        "memory_override_mb",
    ];
    ensure_allowed_keys(map, &allowed, layer, path)?;

    for key in allowed {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

/// Validate the "retrieval" block.
fn validate_retrieval(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["index_path", "max_chunks"], layer, path)?;

    if let Some(value) = map.get("index_path") {
        expect_string(value, layer, &join_path(path, "index_path"))?;
    }
    if let Some(value) = map.get("max_chunks") {
        expect_u64(value, layer, &join_path(path, "max_chunks"))?;
    }
    Ok(())
}

/// Validate the "analysis" block.
fn validate_analysis(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let allowed = ["utility_enabled", "relevance_threshold", "score_timeout_ms"];
    ensure_allowed_keys(map, &allowed, layer, path)?;

    if let Some(value) = map.get("utility_enabled") {
        expect_bool(value, layer, &join_path(path, "utility_enabled"))?;
    }
    if let Some(value) = map.get("relevance_threshold") {
        expect_f64(value, layer, &join_path(path, "relevance_threshold"))?;
    }
    if let Some(value) = map.get("score_timeout_ms") {
        expect_u64(value, layer, &join_path(path, "score_timeout_ms"))?;
    }
    Ok(())
}

/// Validate the "generation" block.
fn validate_generation(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let allowed = ["generate_timeout_ms", "default_style", "max_answer_chars"];
    ensure_allowed_keys(map, &allowed, layer, path)?;

    if let Some(value) = map.get("generate_timeout_ms") {
        expect_u64(value, layer, &join_path(path, "generate_timeout_ms"))?;
    }
    if let Some(value) = map.get("default_style") {
        validate_response_style(value, layer, &join_path(path, "default_style"))?;
    }
    if let Some(value) = map.get("max_answer_chars") {
        expect_u64(value, layer, &join_path(path, "max_answer_chars"))?;
    }
    Ok(())
}

/// Validate response style values.
fn validate_response_style(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let Some(style) = value.as_str() else {
        return Err(invalid_field(layer, path, "expected string"));
    };
    if matches!(style, "concise" | "detailed" | "technical") {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "invalid response style"))
    }
}

/// Validate the "service" block.
fn validate_service(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let allowed = [
        "binary",
        "heartbeat_interval_ms",
        "embed_timeout_ms",
        "embed_parallelism",
        "max_memory_mb",
    ];
    ensure_allowed_keys(map, &allowed, layer, path)?;

    if let Some(value) = map.get("binary") {
        expect_string(value, layer, &join_path(path, "binary"))?;
    }
    for key in [
        "heartbeat_interval_ms",
        "embed_timeout_ms",
        "embed_parallelism",
        "max_memory_mb",
    ] {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

/// Validate the "recovery" block.
fn validate_recovery(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let allowed = [
        "poll_interval_ms",
        "degraded_after_failures",
        "restart_limit",
        "restart_window_secs",
        "cooldown_secs",
        "restart_grace_ms",
        "probe_timeout_ms",
        "startup_probe_attempts",
        "memory_high_water_mb",
    ];
    ensure_allowed_keys(map, &allowed, layer, path)?;

    for key in allowed {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

/// Expect a JSON object or return a typed error.
fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(invalid_field(layer, path, "expected object")),
    }
}

/// Expect a JSON array or return a typed error.
fn expect_array<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Vec<Value>, ConfigError> {
    match value {
        Value::Array(arr) => Ok(arr),
        _ => Err(invalid_field(layer, path, "expected array")),
    }
}

/// Expect a JSON string or return a typed error.
fn expect_string(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.as_str().is_some() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected string"))
    }
}

/// Expect a JSON boolean or return a typed error.
fn expect_bool(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if matches!(value, Value::Bool(_)) {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected bool"))
    }
}

/// Expect a JSON u64 or return a typed error.
fn expect_u64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_u64() || value.is_i64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected integer"))
    }
}

/// Expect a JSON f64 or return a typed error.
fn expect_f64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_f64() || value.is_u64() || value.is_i64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected number"))
    }
}

/// Ensure an object contains only allowed keys.
fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid_field(layer, &join_path(path, key), "unknown key"));
        }
    }
    Ok(())
}

/// Join nested paths for better error messages.
fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Build a structured invalid-field error.
fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let normalized_path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{normalized_path}"),
        message: message.to_string(),
    }
}
