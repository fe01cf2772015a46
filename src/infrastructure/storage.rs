use crate::services::storage::S3StorageService;
use aws_sdk_s3::config::Region;
use std::env;
use std::sync::Arc;
use tracing::info;

/// Builds the S3 client with the process-wide static credential.
///
/// This credential backs proxy uploads and presigned-URL generation; brokered
/// callers never see it, only the scoped URLs derived from it.
pub async fn setup_storage() -> Arc<S3StorageService> {
    let endpoint_url = env::var("STORAGE_ENDPOINT").expect("STORAGE_ENDPOINT must be set");
    let access_key = env::var("STORAGE_ACCESS_KEY").expect("STORAGE_ACCESS_KEY must be set");
    let secret_key = env::var("STORAGE_SECRET_KEY").expect("STORAGE_SECRET_KEY must be set");
    let bucket = env::var("STORAGE_BUCKET").expect("STORAGE_BUCKET must be set");
    let public_base_url = env::var("STORAGE_PUBLIC_URL")
        .unwrap_or_else(|_| format!("{}/{}", endpoint_url.trim_end_matches('/'), bucket));

    info!("☁️  Object storage: {} (Bucket: {})", endpoint_url, bucket);

    let aws_config = aws_config::from_env()
        .endpoint_url(&endpoint_url)
        .region(Region::new("us-east-1"))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true)
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);

    match s3_client.head_bucket().bucket(&bucket).send().await {
        Ok(_) => info!("✅ Bucket '{}' is ready", bucket),
        Err(_) => {
            info!("🪣 Bucket '{}' not found, creating...", bucket);
            if let Err(e) = s3_client.create_bucket().bucket(&bucket).send().await {
                tracing::error!("❌ Failed to create bucket '{}': {}", bucket, e);
            } else {
                info!("✅ Bucket '{}' created successfully", bucket);
            }
        }
    }

    Arc::new(S3StorageService::new(s3_client, bucket, public_base_url))
}
