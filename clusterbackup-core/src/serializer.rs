/*!
Object serialization for the archive.

Captured objects are stripped of fields that only make sense on the cluster
instance they came from, then rendered as JSON with two-space indentation.
The same input always renders to the same bytes.
*/

use crate::cluster::ObjectDocument;
use crate::Result;

/// `metadata` fields removed before an object is written.
pub const STRIPPED_METADATA_FIELDS: &[&str] = &[
    "managedFields",
    "resourceVersion",
    "uid",
    "selfLink",
    "creationTimestamp",
    "generation",
];

/// Remove cluster-instance fields and the whole `status` subtree in place.
pub fn strip_runtime_fields(object: &mut ObjectDocument) {
    if let Some(metadata) = object
        .get_mut("metadata")
        .and_then(|metadata| metadata.as_object_mut())
    {
        for field in STRIPPED_METADATA_FIELDS {
            metadata.remove(*field);
        }
    }
    object.remove("status");
}

/// Strip `object` and render it as indented JSON.
pub fn serialize_object(mut object: ObjectDocument) -> Result<Vec<u8>> {
    strip_runtime_fields(&mut object);
    let mut rendered = serde_json::to_vec_pretty(&object)?;
    rendered.push(b'\n');
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn captured() -> ObjectDocument {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "sample-config",
                "namespace": "restore-ns",
                "labels": {"app": "demo"},
                "managedFields": [{"manager": "kubectl"}],
                "resourceVersion": "1234",
                "uid": "0f7c",
                "selfLink": "/api/v1/namespaces/restore-ns/configmaps/sample-config",
                "creationTimestamp": "2025-01-01T00:00:00Z",
                "generation": 3
            },
            "data": {"key": "value"},
            "status": {"phase": "Active"}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_runtime_fields_are_removed() {
        let mut object = captured();
        strip_runtime_fields(&mut object);

        let metadata = object["metadata"].as_object().unwrap();
        for field in STRIPPED_METADATA_FIELDS {
            assert!(!metadata.contains_key(*field), "{field} survived");
        }
        assert!(!object.contains_key("status"));
        assert_eq!(metadata["labels"]["app"], "demo");
        assert_eq!(object["data"]["key"], "value");
    }

    #[test]
    fn test_serialized_form_is_indented_and_stable() {
        let first = serialize_object(captured()).unwrap();
        let second = serialize_object(captured()).unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        assert!(text.starts_with("{\n  \"apiVersion\": \"v1\""));
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["metadata"]["name"], "sample-config");
    }

    #[test]
    fn test_object_without_metadata() {
        let object = json!({"kind": "Thing", "status": {}}).as_object().cloned().unwrap();
        let text = String::from_utf8(serialize_object(object).unwrap()).unwrap();
        assert!(!text.contains("status"));
    }
}
