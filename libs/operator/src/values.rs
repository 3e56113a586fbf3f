use crate::crd::cluster::Cluster;
use crate::crd::options::{BundleDeploymentOptions, GenericMap, ValuesReference};
use crate::error::{Error, Result};

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::Api;
use kube::client::Client;
use kube::ResourceExt;
use minijinja::syntax::SyntaxConfig;
use minijinja::{context, Environment, UndefinedBehavior};
use std::collections::BTreeMap;
use tracing::warn;

/// String values with this prefix are replaced by the named cluster label.
pub const CLUSTER_LABEL_PREFIX: &str = "global.fleet.clusterLabels.";

pub const MAX_VALUES_DEPTH: usize = 50;

pub const DEFAULT_VALUES_KEY: &str = "values.yaml";

/// Run the in-memory stages of the pipeline over a target's Helm values:
/// label-prefix substitution, then the template pass unless disabled.
pub fn preprocess_helm_values(
    options: &mut BundleDeploymentOptions,
    cluster: &Cluster,
) -> Result<()> {
    let Some(helm) = options.helm.as_mut() else {
        return Ok(());
    };
    let Some(values) = helm.values.as_mut() else {
        return Ok(());
    };
    if values.is_empty() {
        return Ok(());
    }
    substitute_cluster_labels(values, cluster.labels())?;
    if !helm.disable_pre_process.unwrap_or(false) {
        *values = template_values(values, cluster)?;
    }
    Ok(())
}

/// Depth-first walk replacing `global.fleet.clusterLabels.<key>` strings
/// with the label's value. Missing labels become the empty string.
pub fn substitute_cluster_labels(
    values: &mut GenericMap,
    labels: &BTreeMap<String, String>,
) -> Result<()> {
    for value in values.values_mut() {
        walk(value, labels, 1)?;
    }
    Ok(())
}

fn walk(
    value: &mut serde_json::Value,
    labels: &BTreeMap<String, String>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_VALUES_DEPTH {
        return Err(Error::TemplateRecursion(depth));
    }
    match value {
        serde_json::Value::String(s) => {
            if let Some(label) = s.strip_prefix(CLUSTER_LABEL_PREFIX) {
                match labels.get(label) {
                    Some(replacement) => *s = replacement.clone(),
                    None => {
                        warn!(label, "cluster label referenced in values is not set");
                        s.clear();
                    }
                }
            }
        }
        serde_json::Value::Object(map) => {
            for nested in map.values_mut() {
                walk(nested, labels, depth + 1)?;
            }
        }
        serde_json::Value::Array(items) => {
            for nested in items.iter_mut() {
                walk(nested, labels, depth + 1)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Labels/annotations as exposed to templates: tool-internal entries are
/// stripped, but the fleet/management prefixes always pass through.
pub fn cleaned_meta(meta: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    meta.iter()
        .filter(|(key, _)| {
            if key.starts_with("fleet.cattle.io/") || key.starts_with("management.cattle.io/") {
                return true;
            }
            !key.starts_with("kubectl.kubernetes.io/") && !key.contains("cattle.io/")
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Template pass: serialize the values to YAML, render with `${` `}`
/// delimiters and strict missing-key handling, parse the result back.
///
/// The environment has no loader, so templates cannot include files, read
/// the process environment or invoke other templates; only the builtin
/// string/number/map helpers are reachable.
pub fn template_values(values: &GenericMap, cluster: &Cluster) -> Result<GenericMap> {
    let text = serde_yaml::to_string(values).map_err(Error::YamlError)?;

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let syntax = SyntaxConfig::builder()
        .variable_delimiters("${", "}")
        .build()
        .map_err(Error::TemplateError)?;
    env.set_syntax(syntax);

    let cluster_values = cluster.spec.template_values.clone().unwrap_or_default();
    let rendered = env
        .render_str(
            &text,
            context! {
                ClusterNamespace => cluster.namespace().unwrap_or_default(),
                ClusterName => cluster.name_any(),
                ClusterLabels => cleaned_meta(cluster.labels()),
                ClusterAnnotations => cleaned_meta(cluster.annotations()),
                ClusterValues => cluster_values,
            },
        )
        .map_err(Error::TemplateError)?;

    serde_yaml::from_str(&rendered).map_err(Error::YamlError)
}

/// Recursive merge, source wins: scalars overwrite, maps merge at the same
/// key, anything else is replaced by the source value.
pub fn merge_values(dst: &mut GenericMap, src: &GenericMap) {
    for (key, value) in src {
        match (dst.get_mut(key), value) {
            (Some(serde_json::Value::Object(dst_map)), serde_json::Value::Object(src_map)) => {
                merge_values(dst_map, src_map);
            }
            _ => {
                dst.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Deploy-time stage: resolve each `valuesFrom` reference and merge the
/// result over the inline values. Returns true when anything was merged.
pub async fn apply_values_from(
    client: &Client,
    default_namespace: &str,
    options: &mut BundleDeploymentOptions,
) -> Result<bool> {
    let Some(helm) = options.helm.as_mut() else {
        return Ok(false);
    };
    if helm.values_from.is_empty() {
        return Ok(false);
    }

    let mut merged = helm.values.clone().unwrap_or_default();
    for source in &helm.values_from {
        if let Some(reference) = &source.config_map_key_ref {
            let doc = read_config_map(client, default_namespace, reference).await?;
            merge_values(&mut merged, &doc);
        }
        if let Some(reference) = &source.secret_key_ref {
            let doc = read_secret(client, default_namespace, reference).await?;
            merge_values(&mut merged, &doc);
        }
    }
    helm.values = Some(merged);
    Ok(true)
}

async fn read_config_map(
    client: &Client,
    default_namespace: &str,
    reference: &ValuesReference,
) -> Result<GenericMap> {
    let namespace = reference.namespace.as_deref().unwrap_or(default_namespace);
    let key = reference.key.as_deref().unwrap_or(DEFAULT_VALUES_KEY);
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let config_map = api.get(&reference.name).await.map_err(Error::KubeError)?;

    let text = config_map
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .cloned()
        .ok_or_else(|| Error::MissingValuesKey {
            name: format!("{namespace}/{}", reference.name),
            key: key.to_string(),
        })?;
    parse_values(&text)
}

async fn read_secret(
    client: &Client,
    default_namespace: &str,
    reference: &ValuesReference,
) -> Result<GenericMap> {
    let namespace = reference.namespace.as_deref().unwrap_or(default_namespace);
    let key = reference.key.as_deref().unwrap_or(DEFAULT_VALUES_KEY);
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = api.get(&reference.name).await.map_err(Error::KubeError)?;

    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .cloned()
        .ok_or_else(|| Error::MissingValuesKey {
            name: format!("{namespace}/{}", reference.name),
            key: key.to_string(),
        })?;
    let text = String::from_utf8(bytes.0)
        .map_err(|e| Error::UserInputError(format!("values are not utf-8: {e}")))?;
    parse_values(&text)
}

fn parse_values(text: &str) -> Result<GenericMap> {
    serde_yaml::from_str(text).map_err(Error::YamlError)
}
