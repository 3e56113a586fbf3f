use k8s_openapi::ByteString;
use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn byte_string_schema(gen: &mut SchemaGenerator) -> Schema {
    gen.subschema_for::<String>()
}

/// Immutable, content-addressed snapshot of a bundle's resources. Cluster
/// scoped; the name is derived from the payload digest (`s-<hex>`, 63 chars
/// max). Created on first reference, never mutated.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "flotilla.dev", version = "v1alpha1", kind = "Content")]
#[serde(rename_all = "camelCase")]
pub struct ContentSpec {
    /// Gzip of the canonical resource-list serialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "byte_string_schema")]
    pub content: Option<ByteString>,

    /// Hex SHA-256 of the uncompressed payload; verified on every read.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256sum: String,
}
