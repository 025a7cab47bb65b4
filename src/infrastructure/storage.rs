use crate::services::storage::S3StorageService;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub async fn setup_storage(request_timeout_secs: u64) -> anyhow::Result<Arc<S3StorageService>> {
    let endpoint_url =
        env::var("S3_ENDPOINT").map_err(|_| anyhow::anyhow!("S3_ENDPOINT must be set"))?;
    let access_key =
        env::var("S3_ACCESS_KEY").map_err(|_| anyhow::anyhow!("S3_ACCESS_KEY must be set"))?;
    let secret_key =
        env::var("S3_SECRET_KEY").map_err(|_| anyhow::anyhow!("S3_SECRET_KEY must be set"))?;
    let bucket = env::var("S3_BUCKET").map_err(|_| anyhow::anyhow!("S3_BUCKET must be set"))?;

    info!("☁️  S3 Storage: {} (Bucket: {})", endpoint_url, bucket);

    // Timeouts fail a retrieval as a backend fault, not as object absence.
    let aws_config = aws_config::from_env()
        .endpoint_url(&endpoint_url)
        .region(Region::new("us-east-1"))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ))
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(Duration::from_secs(request_timeout_secs))
                .build(),
        )
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true)
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
    Ok(Arc::new(S3StorageService::new(
        s3_client,
        bucket,
        endpoint_url,
    )))
}
