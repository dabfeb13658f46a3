//! Request identity fingerprints.

use std::fmt;

use serde_json::Value;

use crate::descriptor::HttpMethod;

/// Fingerprint of a logical request: `METHOD_URL_body`.
///
/// Object keys in the body are sorted at every depth, so bodies that differ
/// only in key order produce the same identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestIdentity(String);

impl RequestIdentity {
    /// Compute the identity of a request.
    pub fn of(method: HttpMethod, url: &str, data: Option<&Value>) -> Self {
        Self(format!("{}_{}_{}", method, url, canonical_body(data)))
    }

    /// The fingerprint string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the fingerprint contains `fragment`.
    pub fn contains(&self, fragment: &str) -> bool {
        self.0.contains(fragment)
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn canonical_body(data: Option<&Value>) -> String {
    match data {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            let mut out = String::new();
            write_canonical(other, &mut out);
            out
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_key_order_independent() {
        let a = json!({"page": 1, "filter": {"b": true, "a": [1, 2]}});
        let b: Value =
            serde_json::from_str(r#"{"filter": {"a": [1, 2], "b": true}, "page": 1}"#).unwrap();
        assert_eq!(
            RequestIdentity::of(HttpMethod::Post, "/api/list", Some(&a)),
            RequestIdentity::of(HttpMethod::Post, "/api/list", Some(&b)),
        );
    }

    #[test]
    fn test_format() {
        let id = RequestIdentity::of(HttpMethod::Get, "https://api.example.com/api/user/info", None);
        assert_eq!(id.as_str(), "GET_https://api.example.com/api/user/info_null");

        let id = RequestIdentity::of(HttpMethod::Post, "/a", Some(&json!({"b": 2, "a": 1})));
        assert_eq!(id.as_str(), r#"POST_/a_{"a":1,"b":2}"#);
    }

    #[test]
    fn test_method_and_body_distinguish() {
        let body = json!({"id": 7});
        let get = RequestIdentity::of(HttpMethod::Get, "/a", Some(&body));
        let post = RequestIdentity::of(HttpMethod::Post, "/a", Some(&body));
        let other = RequestIdentity::of(HttpMethod::Get, "/a", Some(&json!({"id": 8})));
        assert_ne!(get, post);
        assert_ne!(get, other);
    }

    #[test]
    fn test_contains() {
        let id = RequestIdentity::of(HttpMethod::Get, "/api/orders/list", None);
        assert!(id.contains("/api/orders"));
        assert!(!id.contains("/api/user"));
    }
}
