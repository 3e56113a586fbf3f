use crate::crd::options::{BundleDeploymentOptions, HelmOptions};
use crate::error::{Error, Result};
use crate::values;

use sha2::{Digest, Sha256};

/// Merge bundle defaults with a target's overrides; the target wins per
/// field, Helm values merge recursively.
pub fn merge_options(
    base: &BundleDeploymentOptions,
    over: &BundleDeploymentOptions,
) -> BundleDeploymentOptions {
    BundleDeploymentOptions {
        content_id: over.content_id.clone().or_else(|| base.content_id.clone()),
        default_namespace: over
            .default_namespace
            .clone()
            .or_else(|| base.default_namespace.clone()),
        target_namespace: over
            .target_namespace
            .clone()
            .or_else(|| base.target_namespace.clone()),
        service_account: over
            .service_account
            .clone()
            .or_else(|| base.service_account.clone()),
        helm: merge_helm(base.helm.as_ref(), over.helm.as_ref()),
        force_sync_generation: over.force_sync_generation.or(base.force_sync_generation),
    }
}

fn merge_helm(base: Option<&HelmOptions>, over: Option<&HelmOptions>) -> Option<HelmOptions> {
    match (base, over) {
        (None, None) => None,
        (Some(h), None) => Some(h.clone()),
        (None, Some(h)) => Some(h.clone()),
        (Some(base), Some(over)) => Some(HelmOptions {
            release_name: over
                .release_name
                .clone()
                .or_else(|| base.release_name.clone()),
            values: match (&base.values, &over.values) {
                (Some(base_values), Some(over_values)) => {
                    let mut merged = base_values.clone();
                    values::merge_values(&mut merged, over_values);
                    Some(merged)
                }
                (base_values, over_values) => over_values.clone().or_else(|| base_values.clone()),
            },
            // a target-provided list replaces the default list wholesale
            values_from: if over.values_from.is_empty() {
                base.values_from.clone()
            } else {
                over.values_from.clone()
            },
            disable_pre_process: over.disable_pre_process.or(base.disable_pre_process),
        }),
    }
}

/// Stable fingerprint of (manifest, merged options) for one pair. Equal
/// inputs give equal ids on any host; any semantic change in either input
/// changes the id.
pub fn deployment_id(manifest_id: &str, options: &BundleDeploymentOptions) -> Result<String> {
    let value = serde_json::to_value(options).map_err(Error::SerializationError)?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.update(b":");
    hasher.update(manifest_id.as_bytes());
    Ok(format!("s-{}", hex::encode(hasher.finalize())))
}

/// Canonical JSON text: object keys sorted, zero values dropped so an unset
/// field hashes like its default.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut first = true;
            for key in keys {
                let entry = &map[key];
                if is_zero(entry) {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(entry, out);
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
        other => out.push_str(&other.to_string()),
    }
}

fn is_zero(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.values().all(is_zero),
    }
}
