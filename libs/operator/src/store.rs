use crate::crd::content::{Content, ContentSpec};
use crate::error::{Error, Result};
use crate::manifest;

use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::client::Client;
use tracing::debug;

/// Put-if-absent store for content-addressed manifests. Records are never
/// mutated or deleted here; concurrent first writers both succeed.
#[derive(Clone)]
pub struct ContentStore {
    api: Api<Content>,
}

impl ContentStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    /// Ensure a record exists for `key`. `digest` is the hex SHA-256 of the
    /// uncompressed `payload`.
    pub async fn ensure(&self, key: &str, digest: &str, payload: &[u8]) -> Result<()> {
        if self
            .api
            .get_opt(key)
            .await
            .map_err(Error::KubeError)?
            .is_some()
        {
            return Ok(());
        }

        let content = Content {
            metadata: ObjectMeta {
                name: Some(key.to_string()),
                ..ObjectMeta::default()
            },
            spec: ContentSpec {
                content: Some(ByteString(manifest::compress(payload)?)),
                sha256sum: digest.to_string(),
            },
        };
        match self.api.create(&PostParams::default(), &content).await {
            Ok(_) => {
                debug!(%key, "stored manifest");
                Ok(())
            }
            // a concurrent reconcile won the race; same digest, same payload
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    /// Read a payload back, verifying it still matches its recorded digest.
    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let content = self.api.get(key).await.map_err(Error::KubeError)?;
        let packed = content
            .spec
            .content
            .ok_or_else(|| Error::UserInputError(format!("content {key:?} has no payload")))?;
        let payload = manifest::decompress(&packed.0)?;
        let actual = manifest::sha256_hex(&payload);
        if actual != content.spec.sha256sum {
            return Err(Error::DigestMismatch {
                expected: content.spec.sha256sum,
                actual,
            });
        }
        Ok(payload)
    }
}
