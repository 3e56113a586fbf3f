use crate::crd::bundle::Bundle;
use crate::crd::options::BundleDeploymentOptions;
use crate::crd::summary::ResourceKey;
use crate::manifest;
use crate::options::merge_options;

use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Enumerate the identity of every object the bundle would produce, once
/// per *declared* target (matched or not), with namespaces defaulted from
/// that target's merged options. Sorted and deduplicated.
///
/// Chart rendering happens downstream; enumeration parses the declared
/// manifest documents themselves. Unparsable documents are skipped, they
/// fail later at apply time with a better message.
pub fn resource_keys(bundle: &Bundle) -> Vec<ResourceKey> {
    let mut keys = BTreeSet::new();

    let mut option_sets: Vec<BundleDeploymentOptions> = bundle
        .spec
        .targets
        .iter()
        .map(|target| merge_options(&bundle.spec.defaults, &target.options))
        .collect();
    if option_sets.is_empty() {
        option_sets.push(bundle.spec.defaults.clone());
    }

    for options in &option_sets {
        let target_namespace = options.target_namespace.as_deref();
        let default_namespace = options.default_namespace.as_deref().unwrap_or("default");

        for resource in &bundle.spec.resources {
            let content = match manifest::decode_resource(resource) {
                Ok(content) => content,
                Err(error) => {
                    debug!(resource = ?resource.name, %error, "skipping undecodable resource");
                    continue;
                }
            };
            let Ok(text) = String::from_utf8(content) else {
                continue;
            };
            for document in serde_yaml::Deserializer::from_str(&text) {
                let Ok(value) = serde_yaml::Value::deserialize(document) else {
                    debug!(resource = ?resource.name, "skipping unparsable document");
                    break;
                };
                if let Some(key) = document_key(&value, target_namespace, default_namespace) {
                    keys.insert(key);
                }
            }
        }
    }
    keys.into_iter().collect()
}

fn document_key(
    value: &serde_yaml::Value,
    target_namespace: Option<&str>,
    default_namespace: &str,
) -> Option<ResourceKey> {
    let api_version = value.get("apiVersion")?.as_str()?.to_string();
    let kind = value.get("kind")?.as_str()?.to_string();
    let metadata = value.get("metadata")?;
    let name = metadata.get("name")?.as_str()?.to_string();
    // targetNamespace overrides even a declared namespace; defaultNamespace
    // only fills documents that carry none
    let namespace = match target_namespace {
        Some(forced) => forced.to_string(),
        None => metadata
            .get("namespace")
            .and_then(|ns| ns.as_str())
            .unwrap_or(default_namespace)
            .to_string(),
    };
    Some(ResourceKey {
        api_version,
        kind,
        namespace,
        name,
    })
}
