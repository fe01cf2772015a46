use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use std::time::Duration;

/// Interface to the external storage provider.
///
/// The broker only needs the control-plane surface: a direct write (proxy
/// mode), a presigned write credential (brokered mode), delete-by-locator and
/// locator resolution. Byte transport and durability stay on the provider.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn put_object(&self, key: &str, content_type: &str, data: Vec<u8>) -> Result<()>;
    async fn delete_object(&self, key: &str) -> Result<()>;
    async fn object_exists(&self, key: &str) -> Result<bool>;
    async fn object_url(&self, key: &str) -> Result<String>;
    /// Scoped write credential for the caller's direct upload
    async fn presigned_put_url(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String>;
}

pub struct S3StorageService {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3StorageService {
    pub fn new(client: Client, bucket: String, public_base_url: String) -> Self {
        Self {
            client,
            bucket,
            public_base_url,
        }
    }
}

#[async_trait]
impl StorageService for S3StorageService {
    async fn put_object(&self, key: &str, content_type: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        // S3 delete is already idempotent: deleting a missing key succeeds
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(anyhow::anyhow!(service_error))
                }
            }
        }
    }

    async fn object_url(&self, key: &str) -> Result<String> {
        Ok(format!("{}/{}", self.public_base_url.trim_end_matches('/'), key))
    }

    async fn presigned_put_url(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String> {
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(PresigningConfig::expires_in(expires_in)?)
            .await?;

        Ok(presigned.uri().to_string())
    }
}
