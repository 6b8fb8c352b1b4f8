//! Narrow JSON-RPC transport seam.
//!
//! Request/batch framing, timeouts, and HTTP error mapping all live behind
//! this trait in the host application. The drivers only know method names
//! and JSON values, which is also what makes them scriptable under test.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DriverError;

/// One JSON-RPC call: method name plus positional params.
#[derive(Clone, Debug)]
pub struct RpcCall {
    pub method: &'static str,
    pub params: Value,
}

impl RpcCall {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self { method, params }
    }
}

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Issue a single call, returning the `result` member.
    /// A JSON `null` result comes back as `Value::Null`, not an error.
    async fn call(&self, call: RpcCall) -> Result<Value, DriverError>;

    /// Issue a batch, returning results in request order.
    async fn batch(&self, calls: Vec<RpcCall>) -> Result<Vec<Value>, DriverError>;
}

/// Parse a JSON-RPC quantity (`"0x1f"`, or a plain number from lenient
/// nodes) into a u64. Returns `None` for null/absent/garbage so callers
/// can apply their own defaulting.
pub fn parse_quantity(v: &Value) -> Option<u64> {
    match v {
        Value::String(s) => {
            let trimmed = s.strip_prefix("0x").unwrap_or(s);
            if trimmed.is_empty() {
                return None;
            }
            if s.starts_with("0x") {
                u64::from_str_radix(trimmed, 16).ok()
            } else {
                trimmed.parse().ok()
            }
        }
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Pull a quantity field out of a JSON object, `None` when the field is
/// missing or unparseable.
pub fn field_quantity(obj: &Value, field: &str) -> Option<u64> {
    obj.get(field).and_then(parse_quantity)
}

/// Pull a string field out of a JSON object.
pub fn field_str(obj: &Value, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quantities_parse_hex_and_decimal() {
        assert_eq!(parse_quantity(&json!("0x1f")), Some(31));
        assert_eq!(parse_quantity(&json!("0x0")), Some(0));
        assert_eq!(parse_quantity(&json!("42")), Some(42));
        assert_eq!(parse_quantity(&json!(7)), Some(7));
    }

    #[test]
    fn quantities_reject_garbage() {
        assert_eq!(parse_quantity(&json!(null)), None);
        assert_eq!(parse_quantity(&json!("0x")), None);
        assert_eq!(parse_quantity(&json!("zz")), None);
        assert_eq!(parse_quantity(&json!({"a": 1})), None);
    }

    #[test]
    fn field_helpers_default_on_missing() {
        let obj = json!({"blockNumber": "0x10", "status": "0x1"});
        assert_eq!(field_quantity(&obj, "blockNumber"), Some(16));
        assert_eq!(field_quantity(&obj, "epochNumber"), None);
        assert_eq!(field_str(&obj, "status").as_deref(), Some("0x1"));
    }
}
