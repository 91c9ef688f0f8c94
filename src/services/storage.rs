use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};

use crate::core::config::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredBlob {
    pub(crate) key: String,
    pub(crate) size_bytes: i64,
    pub(crate) sha256: String,
}

/// Opaque put/get by key. The engine never interprets blob contents.
#[async_trait]
pub(crate) trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>)
        -> anyhow::Result<StoredBlob>;

    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn sanitized_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_' || *c == '-')
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "upload".to_string()
    } else {
        sanitized
    }
}

#[derive(Debug, Clone)]
pub(crate) struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub(crate) async fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        if settings.s3().access_key.is_empty() || settings.s3().secret_key.is_empty() {
            return Ok(None);
        }

        let creds = Credentials::new(
            settings.s3().access_key.clone(),
            settings.s3().secret_key.clone(),
            None,
            None,
            "eval-engine-static",
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(settings.s3().endpoint.clone())
            .region(aws_config::Region::new(settings.s3().region.clone()))
            .credentials_provider(creds)
            .load()
            .await;

        let client = Client::new(&config);

        Ok(Some(Self { client, bucket: settings.s3().bucket.clone() }))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<StoredBlob> {
        let size_bytes = bytes.len() as i64;
        let sha256 = sha256_hex(&bytes);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await?;

        Ok(StoredBlob { key: key.to_string(), size_bytes, sha256 })
    }

    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let object = self.client.get_object().bucket(&self.bucket).key(key).send().await?;
        let data = object.body.collect().await?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.client.delete_object().bucket(&self.bucket).key(key).send().await?;
        Ok(())
    }
}
