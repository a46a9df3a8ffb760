use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ScoringError;
use crate::models::{
    BehavioralSample, DeviceInfo, EnhancedSignals, FingerprintRequest, SessionInfo, SimInfo,
    UseCase,
};

/// Converts raw heterogeneous SDK payloads into the canonical
/// `FingerprintRequest`. Two shapes are accepted: the SDK-nested schema
/// (`device.fingerprint`, `session.*`, `behavioral.*`, optional `sim`)
/// and the flat/direct schema (`device_fingerprint`, `typing_dwell_ms`,
/// ...). Pure function; all validation failures are `MalformedRequest`.
pub fn normalize(raw: &Value, use_case: UseCase) -> Result<FingerprintRequest, ScoringError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ScoringError::malformed("payload must be a JSON object"))?;

    let nested = obj.get("device").map(Value::is_object).unwrap_or(false);

    let request = if nested {
        normalize_nested(raw, use_case)?
    } else {
        normalize_flat(raw, use_case)?
    };

    Ok(request)
}

fn normalize_nested(raw: &Value, use_case: UseCase) -> Result<FingerprintRequest, ScoringError> {
    let device_block = &raw["device"];

    let fingerprint = string_field(device_block, &["fingerprint", "fingerprint_hash"])
        .ok_or_else(|| ScoringError::malformed("device.fingerprint is required"))?;
    let fingerprint = canonical_fingerprint(&fingerprint)?;

    let timezone = string_field(device_block, &["timezone"])
        .ok_or_else(|| ScoringError::malformed("device.timezone is required"))?;
    validate_timezone(&timezone)?;

    let device_id = string_field(device_block, &["device_id"])
        .unwrap_or_else(|| derive_device_id(&fingerprint));

    let device = DeviceInfo {
        device_id,
        fingerprint_hash: fingerprint,
        manufacturer: string_field(device_block, &["manufacturer"]),
        model: string_field(device_block, &["model"]),
        os_version: string_field(device_block, &["os_version"]),
        screen_width: u32_field(device_block, "screen_width"),
        screen_height: u32_field(device_block, "screen_height"),
        timezone,
        locale: string_field(device_block, &["locale"]),
    };

    let null = Value::Null;
    let session_block = raw.get("session").unwrap_or(&null);
    let session = SessionInfo {
        session_id: string_field(session_block, &["session_id"])
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        timestamp: timestamp_field(session_block, "timestamp")?.unwrap_or_else(Utc::now),
    };

    let behavioral = parse_behavioral(raw.get("behavioral").unwrap_or(&null))?;
    let sim = parse_sim(raw.get("sim"))?;
    let enhanced_signals = parse_enhanced(raw.get("enhanced_signals"));

    Ok(FingerprintRequest {
        user_id: string_field(raw, &["user_id"]),
        device,
        session,
        behavioral,
        sim,
        use_case,
        enhanced_signals,
    })
}

fn normalize_flat(raw: &Value, use_case: UseCase) -> Result<FingerprintRequest, ScoringError> {
    let fingerprint = string_field(raw, &["device_fingerprint", "fingerprint"])
        .ok_or_else(|| ScoringError::malformed("device_fingerprint is required"))?;
    let fingerprint = canonical_fingerprint(&fingerprint)?;

    let timezone = string_field(raw, &["timezone"])
        .ok_or_else(|| ScoringError::malformed("timezone is required"))?;
    validate_timezone(&timezone)?;

    let device_id =
        string_field(raw, &["device_id"]).unwrap_or_else(|| derive_device_id(&fingerprint));

    let device = DeviceInfo {
        device_id,
        fingerprint_hash: fingerprint,
        manufacturer: string_field(raw, &["manufacturer"]),
        model: string_field(raw, &["model"]),
        os_version: string_field(raw, &["os_version"]),
        screen_width: u32_field(raw, "screen_width"),
        screen_height: u32_field(raw, "screen_height"),
        timezone,
        locale: string_field(raw, &["locale"]),
    };

    let session = SessionInfo {
        session_id: string_field(raw, &["session_id"])
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        timestamp: timestamp_field(raw, "timestamp")?.unwrap_or_else(Utc::now),
    };

    let behavioral = parse_behavioral(raw)?;

    // The flat Android variant carries sim fields at the top level
    let sim = if raw.get("sim_serial_hash").is_some() {
        Some(SimInfo {
            sim_operator: string_field(raw, &["sim_operator"]),
            sim_serial_hash: string_field(raw, &["sim_serial_hash"])
                .ok_or_else(|| ScoringError::malformed("sim_serial_hash must be a string"))?,
            network_type: string_field(raw, &["network_type"]),
        })
    } else {
        None
    };

    let enhanced_signals = parse_enhanced(raw.get("enhanced_signals"));

    Ok(FingerprintRequest {
        user_id: string_field(raw, &["user_id"]),
        device,
        session,
        behavioral,
        sim,
        use_case,
        enhanced_signals,
    })
}

fn parse_behavioral(block: &Value) -> Result<BehavioralSample, ScoringError> {
    Ok(BehavioralSample {
        typing_dwell_ms: float_array(block.get("typing_dwell_ms"), "typing_dwell_ms")?,
        typing_flight_ms: float_array(block.get("typing_flight_ms"), "typing_flight_ms")?,
        swipe_velocity: scalar(block.get("swipe_velocity"), "swipe_velocity")?,
        session_entropy: scalar(block.get("session_entropy"), "session_entropy")?,
    })
}

fn parse_sim(block: Option<&Value>) -> Result<Option<SimInfo>, ScoringError> {
    let block = match block {
        Some(b) if !b.is_null() => b,
        _ => return Ok(None),
    };

    let serial = string_field(block, &["sim_serial_hash"])
        .ok_or_else(|| ScoringError::malformed("sim.sim_serial_hash is required"))?;

    Ok(Some(SimInfo {
        sim_operator: string_field(block, &["sim_operator"]),
        sim_serial_hash: serial,
        network_type: string_field(block, &["network_type"]),
    }))
}

fn parse_enhanced(block: Option<&Value>) -> Option<EnhancedSignals> {
    block
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Canonicalize and validate a fingerprint hash: exactly 64 hex
/// characters, lowercased.
fn canonical_fingerprint(input: &str) -> Result<String, ScoringError> {
    let lowered = input.to_ascii_lowercase();
    let valid = lowered.len() == 64
        && lowered
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if !valid {
        return Err(ScoringError::malformed(
            "device fingerprint must be a 64-character hex SHA-256 digest",
        ));
    }
    Ok(lowered)
}

fn validate_timezone(tz: &str) -> Result<(), ScoringError> {
    tz.parse::<chrono_tz::Tz>()
        .map(|_| ())
        .map_err(|_| ScoringError::malformed(format!("invalid IANA timezone: {}", tz)))
}

fn derive_device_id(fingerprint: &str) -> String {
    fingerprint[..32].to_string()
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(k))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn u32_field(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

fn timestamp_field(value: &Value, key: &str) -> Result<Option<DateTime<Utc>>, ScoringError> {
    let raw = match value.get(key) {
        Some(v) if !v.is_null() => v,
        _ => return Ok(None),
    };

    if let Some(s) = raw.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| ScoringError::malformed(format!("invalid timestamp: {}", s)));
    }
    if let Some(ms) = raw.as_i64() {
        return DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| ScoringError::malformed(format!("invalid timestamp: {}", ms)));
    }

    Err(ScoringError::malformed("timestamp must be RFC3339 or epoch millis"))
}

fn float_array(value: Option<&Value>, name: &str) -> Result<Vec<f64>, ScoringError> {
    let items = match value {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(_) => {
            return Err(ScoringError::malformed(format!(
                "{} must be an array of numbers",
                name
            )))
        }
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let x = item.as_f64().ok_or_else(|| {
            ScoringError::malformed(format!("{} contains a non-numeric value", name))
        })?;
        if !x.is_finite() || x < 0.0 {
            return Err(ScoringError::malformed(format!(
                "{} values must be non-negative finite numbers",
                name
            )));
        }
        out.push(x);
    }
    Ok(out)
}

fn scalar(value: Option<&Value>, name: &str) -> Result<f64, ScoringError> {
    let raw = match value {
        Some(v) if !v.is_null() => v,
        _ => return Ok(0.0),
    };
    let x = raw
        .as_f64()
        .ok_or_else(|| ScoringError::malformed(format!("{} must be a number", name)))?;
    if !x.is_finite() || x < 0.0 {
        return Err(ScoringError::malformed(format!(
            "{} must be a non-negative finite number",
            name
        )));
    }
    Ok(x)
}
