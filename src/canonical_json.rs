//
// Copyright 2024 The Sigstore Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Canonical JSON serialization.
//!
//! Both TUF metadata signatures and transparency log entry ids are computed
//! over a canonical JSON form: object keys sorted lexicographically, no
//! insignificant whitespace, and only `"` and `\` escaped in strings (the
//! OLPC canonical-json profile used by both ecosystems). Payloads are
//! restricted to integers; floats are rejected rather than canonicalized.

use serde_json::Value;

use crate::errors::{Result, SigstoreError};

/// Serializes `value` into canonical JSON bytes.
pub(crate) fn to_canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if n.is_f64() {
                return Err(SigstoreError::UnexpectedError(
                    "floats have no canonical JSON form".into(),
                ));
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => write_string(s, out),
        Value::Array(values) => {
            out.push(b'[');
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(v, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for byte in s.bytes() {
        match byte {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            other => out.push(other),
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_are_sorted_and_compact() {
        let value = json!({"b": 2, "a": {"z": [1, 2], "y": "x"}});
        assert_eq!(
            to_canonical_bytes(&value).unwrap(),
            br#"{"a":{"y":"x","z":[1,2]},"b":2}"#
        );
    }

    #[test]
    fn only_quote_and_backslash_are_escaped() {
        let value = json!({"k": "a\"b\\c"});
        assert_eq!(
            to_canonical_bytes(&value).unwrap(),
            br#"{"k":"a\"b\\c"}"#
        );
    }

    #[test]
    fn integers_stay_plain() {
        let value = json!([0, -1, 9007199254740991i64]);
        assert_eq!(
            to_canonical_bytes(&value).unwrap(),
            br#"[0,-1,9007199254740991]"#
        );
    }

    #[test]
    fn floats_are_rejected() {
        assert!(to_canonical_bytes(&json!(1.5)).is_err());
    }

    #[test]
    fn serialization_is_stable_across_key_insertion_order() {
        let a: Value = serde_json::from_str(r#"{"x":1,"a":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":2,"x":1}"#).unwrap();
        assert_eq!(
            to_canonical_bytes(&a).unwrap(),
            to_canonical_bytes(&b).unwrap()
        );
    }
}
