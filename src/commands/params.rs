//! 参数读取辅助：缺失或类型错误一律转为 Validation 错误

use serde_json::Value;

use crate::commands::{Params, Payload};
use crate::core::AgentError;

pub fn required_str(params: &Params, key: &str) -> Result<String, AgentError> {
    optional_str(params, key)?
        .ok_or_else(|| AgentError::validation(format!("missing required parameter: {key}")))
}

pub fn optional_str(params: &Params, key: &str) -> Result<Option<String>, AgentError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(AgentError::validation(format!("parameter '{key}' must be a string"))),
    }
}

pub fn optional_bool(params: &Params, key: &str, default: bool) -> Result<bool, AgentError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(AgentError::validation(format!("parameter '{key}' must be a boolean"))),
    }
}

pub fn optional_u64(params: &Params, key: &str, default: u64) -> Result<u64, AgentError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_u64().ok_or_else(|| {
            AgentError::validation(format!("parameter '{key}' must be a non-negative integer"))
        }),
    }
}

/// 子对象参数；缺失时返回空映射
pub fn optional_object(params: &Params, key: &str) -> Result<Params, AgentError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Params::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(AgentError::validation(format!("parameter '{key}' must be an object"))),
    }
}

/// 将 `json!({...})` 转为负载；非对象值放到 "value" 键下
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Payload::new();
            map.insert("value".into(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Params {
        payload(v)
    }

    #[test]
    fn test_required_str_missing() {
        let err = required_str(&Params::new(), "task_id").unwrap_err();
        assert_eq!(err.to_string(), "invalid parameters: missing required parameter: task_id");
    }

    #[test]
    fn test_required_str_wrong_type() {
        let err = required_str(&params(json!({"task_id": 5})), "task_id").unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[test]
    fn test_defaults() {
        let p = params(json!({"force": null}));
        assert!(!optional_bool(&p, "force", false).unwrap());
        assert_eq!(optional_u64(&p, "depth", 5).unwrap(), 5);
        assert!(optional_object(&p, "filter").unwrap().is_empty());
    }

    #[test]
    fn test_u64_rejects_negative() {
        let p = params(json!({"duration": -3}));
        assert!(optional_u64(&p, "duration", 60).is_err());
    }

    #[test]
    fn test_payload_wraps_scalars() {
        assert_eq!(json!(payload(json!(3))), json!({"value": 3}));
    }
}
