//! Manifest decoding and filtering
//!
//! Manifests are decoded into loosely typed [`ManifestResource`] records: the
//! identity fields (group, version, kind, namespace, name) are extracted and
//! everything else stays a dynamic JSON tree. This keeps the set of kinds we
//! can process open-ended without compiled schemas for each of them.

use kube::api::GroupVersionKind;
use serde_json::Value;

use crate::Error;

/// One decoded declarative resource.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestResource {
    /// Group, version and kind parsed from `apiVersion` and `kind`
    pub gvk: GroupVersionKind,
    /// `metadata.name`
    pub name: String,
    /// `metadata.namespace`, if set
    pub namespace: Option<String>,
    /// The full document
    pub value: Value,
}

impl ManifestResource {
    /// Build a resource from a decoded document, validating identity fields.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::manifest("document missing apiVersion"))?;
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::manifest("document missing kind"))?;
        let name = value
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::manifest(format!("{} missing metadata.name", kind)))?
            .to_string();
        let namespace = value
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        let (group, version) = parse_api_version(api_version);
        let gvk = GroupVersionKind::gvk(&group, &version, kind);

        Ok(Self {
            gvk,
            name,
            namespace,
            value,
        })
    }

    /// Build a resource from any serializable Kubernetes object
    pub fn from_object(object: &impl serde::Serialize) -> Result<Self, Error> {
        Self::from_value(serde_json::to_value(object)?)
    }

    /// The `apiVersion` string (`group/version`, or just `version` for core)
    pub fn api_version(&self) -> String {
        if self.gvk.group.is_empty() {
            self.gvk.version.clone()
        } else {
            format!("{}/{}", self.gvk.group, self.gvk.version)
        }
    }

    /// `kind/namespace/name` for logging
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}", self.gvk.kind, ns, self.name),
            None => format!("{}/{}", self.gvk.kind, self.name),
        }
    }
}

/// Decode a buffer of concatenated YAML or JSON documents.
///
/// Input whose first non-whitespace byte is `{` or `[` is read as a stream of
/// JSON values (a top-level array contributes its items); anything else as
/// multi-document YAML. Any malformed document fails the whole decode.
pub fn decode_resources(bytes: &[u8]) -> Result<Vec<ManifestResource>, Error> {
    let documents = match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        None => return Ok(Vec::new()),
        Some(b'{') | Some(b'[') => decode_json_stream(bytes)?,
        Some(_) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| Error::manifest(format!("manifest is not UTF-8: {}", e)))?;
            crate::yaml::parse_documents(text)
                .map_err(|e| Error::manifest(format!("invalid YAML: {}", e)))?
        }
    };

    documents
        .into_iter()
        .map(ManifestResource::from_value)
        .collect()
}

fn decode_json_stream(bytes: &[u8]) -> Result<Vec<Value>, Error> {
    let mut documents = Vec::new();
    for value in serde_json::Deserializer::from_slice(bytes).into_iter::<Value>() {
        match value.map_err(|e| Error::manifest(format!("invalid JSON: {}", e)))? {
            Value::Array(items) => documents.extend(items),
            Value::Null => {}
            other => documents.push(other),
        }
    }
    Ok(documents)
}

/// Select the resources matching `predicate`, preserving order.
pub fn filter_resources<P>(resources: &[ManifestResource], predicate: P) -> Vec<ManifestResource>
where
    P: Fn(&GroupVersionKind) -> bool,
{
    resources
        .iter()
        .filter(|r| predicate(&r.gvk))
        .cloned()
        .collect()
}

/// Predicate matching an exact group, version and kind
pub fn is_kind<'a>(
    group: &'a str,
    version: &'a str,
    kind: &'a str,
) -> impl Fn(&GroupVersionKind) -> bool + 'a {
    move |gvk| gvk.group == group && gvk.version == version && gvk.kind == kind
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use everest_provisioner::manifest::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLM_MANIFEST: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: olm
---
apiVersion: operators.coreos.com/v1alpha1
kind: Subscription
metadata:
  name: packageserver
  namespace: olm
spec:
  channel: stable
  name: packageserver
  source: operatorhubio-catalog
  sourceNamespace: olm
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: olm-operator
  namespace: olm
---
apiVersion: operators.coreos.com/v1alpha1
kind: Subscription
metadata:
  name: victoriametrics-operator
  namespace: olm
"#;

    fn subscription_predicate() -> impl Fn(&GroupVersionKind) -> bool {
        is_kind("operators.coreos.com", "v1alpha1", "Subscription")
    }

    // ==========================================================================
    // Story: decoding keeps document order and identity fields
    // ==========================================================================

    #[test]
    fn yaml_documents_decode_in_order() {
        let resources = decode_resources(OLM_MANIFEST.as_bytes()).unwrap();
        let kinds: Vec<_> = resources.iter().map(|r| r.gvk.kind.as_str()).collect();
        assert_eq!(
            kinds,
            ["Namespace", "Subscription", "Deployment", "Subscription"]
        );

        assert_eq!(resources[0].gvk.group, "");
        assert_eq!(resources[0].gvk.version, "v1");
        assert_eq!(resources[0].namespace, None);
        assert_eq!(resources[1].gvk.group, "operators.coreos.com");
        assert_eq!(resources[1].namespace.as_deref(), Some("olm"));
        assert_eq!(resources[1].value["spec"]["channel"], "stable");
    }

    #[test]
    fn concatenated_json_documents_decode() {
        let json = br#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"a"}}
{"apiVersion":"v1","kind":"Secret","metadata":{"name":"b","namespace":"default"}}"#;
        let resources = decode_resources(json).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].name, "a");
        assert_eq!(resources[1].gvk.kind, "Secret");
        assert_eq!(resources[1].namespace.as_deref(), Some("default"));
    }

    #[test]
    fn json_array_contributes_its_items() {
        let json = br#"[{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"a"}},
                        {"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"b"}}]"#;
        let names: Vec<_> = decode_resources(json)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        assert!(decode_resources(b"").unwrap().is_empty());
        assert!(decode_resources(b"   \n").unwrap().is_empty());
    }

    // ==========================================================================
    // Story: a malformed document fails the whole decode
    // ==========================================================================

    #[test]
    fn malformed_yaml_fails_without_partial_result() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ok\n---\nnot: valid: yaml: {{";
        let err = decode_resources(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
    }

    #[test]
    fn malformed_json_fails() {
        let err = decode_resources(br#"{"apiVersion": "v1", "kind": "#).unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn document_without_kind_fails() {
        let yaml = "apiVersion: v1\nmetadata:\n  name: x\n";
        let err = decode_resources(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("kind"));
    }

    #[test]
    fn document_without_name_fails() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n";
        let err = decode_resources(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    // ==========================================================================
    // Story: filtering selects subscriptions in order, without dedup
    // ==========================================================================

    #[test]
    fn filter_keeps_matching_resources_in_order() {
        let resources = decode_resources(OLM_MANIFEST.as_bytes()).unwrap();
        let subs = filter_resources(&resources, subscription_predicate());
        let names: Vec<_> = subs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["packageserver", "victoriametrics-operator"]);
    }

    #[test]
    fn filter_does_not_deduplicate() {
        let mut resources = decode_resources(OLM_MANIFEST.as_bytes()).unwrap();
        resources.push(resources[1].clone());
        assert_eq!(
            filter_resources(&resources, subscription_predicate()).len(),
            3
        );
    }

    #[test]
    fn filter_requires_exact_version() {
        let resources = decode_resources(OLM_MANIFEST.as_bytes()).unwrap();
        let matched = filter_resources(
            &resources,
            is_kind("operators.coreos.com", "v1", "Subscription"),
        );
        assert!(matched.is_empty());
    }

    // ==========================================================================
    // Identity helpers
    // ==========================================================================

    #[test]
    fn api_version_round_trips_through_gvk() {
        let resources = decode_resources(OLM_MANIFEST.as_bytes()).unwrap();
        assert_eq!(resources[0].api_version(), "v1");
        assert_eq!(resources[1].api_version(), "operators.coreos.com/v1alpha1");
        assert_eq!(resources[1].display_name(), "Subscription/olm/packageserver");
        assert_eq!(resources[0].display_name(), "Namespace/olm");
    }
}
