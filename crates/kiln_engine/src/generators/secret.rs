//! Secret data encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

/// Base64-encode every value under `data`.
pub fn encode_data(body: &mut Value) {
    let Some(data) = body.get_mut("data").and_then(Value::as_object_mut) else {
        return;
    };
    for value in data.values_mut() {
        let plain = match &*value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        *value = Value::String(STANDARD.encode(plain.as_bytes()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::tests::generate;
    use crate::instantiation::Mode;
    use kiln_store::ResourceKind;
    use serde_json::json;

    #[test]
    fn test_data_values_are_base64() {
        let out = generate(
            ResourceKind::Secret,
            r#"{"metadata": {"name": "creds"}, "type": "Opaque", "data": {"a": "x", "port": 5432}}"#,
            Mode::Apply,
        )
        .unwrap();

        let data = &out.manifest.body["data"];
        let decoded = STANDARD.decode(data["a"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, b"x");
        assert_eq!(data["port"], "NTQzMg==");
        assert_eq!(out.manifest.body["type"], "Opaque");
    }

    #[test]
    fn test_mixed_values_encoded_in_place() {
        let mut body = json!({"data": {"s": "ab", "n": 7, "b": true, "z": null}});
        encode_data(&mut body);
        assert_eq!(body["data"], json!({"s": "YWI=", "n": "Nw==", "b": "dHJ1ZQ==", "z": ""}));
    }

    #[test]
    fn test_unresolved_values_encode_blank() {
        let mut body = json!({"data": {"token": ""}});
        encode_data(&mut body);
        assert_eq!(body["data"]["token"], "");
    }
}
