use chrono::NaiveDate;

use super::error::HandlerErr;

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if raw.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(raw)
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_str_array(
    params: &serde_json::Value,
    key: &str,
) -> Result<Vec<String>, HandlerErr> {
    let arr = params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::bad_params(format!(
                "{} must be an array of strings",
                key
            )));
        };
        out.push(s.to_string());
    }
    Ok(out)
}

// Calendar dates travel as `YYYY-MM-DD` strings. Re-render the parsed date
// instead of echoing the input: chrono accepts unpadded months and days, and
// a stored "2026-3-2" would dodge both the upsert key and the string-ordered
// window comparisons.
pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    let parsed = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
        HandlerErr::bad_params(format!("{} must be a YYYY-MM-DD date", key))
    })?;
    Ok(parsed.format("%Y-%m-%d").to_string())
}
