use crate::error::{QuernError, Result};
use chrono::Utc;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::env;
use tracing::{info, warn};

/// Remote snapshot storage settings, read from the environment.
///
/// Absent configuration is not an error: backup endpoints report
/// `SnapshotUnavailable` instead.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
}

impl S3Config {
    pub fn from_env() -> Option<S3Config> {
        let bucket = env::var("QUERN_S3_BUCKET").ok()?;
        Some(S3Config {
            bucket,
            region: env::var("QUERN_S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: env::var("QUERN_S3_ENDPOINT").ok(),
        })
    }
}

/// Snapshot archive storage on S3-compatible object stores.
pub struct SnapshotStore {
    bucket: Box<Bucket>,
}

impl SnapshotStore {
    pub fn new(config: &S3Config) -> Result<Self> {
        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .region
                .parse()
                .map_err(|e| QuernError::S3(format!("bad region: {e}")))?,
        };
        let credentials =
            Credentials::default().map_err(|e| QuernError::S3(e.to_string()))?;
        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| QuernError::S3(e.to_string()))?
            .with_path_style();
        Ok(SnapshotStore { bucket })
    }

    fn prefix(tenant: &str) -> String {
        format!("snapshots/{tenant}/")
    }

    /// Upload a snapshot archive, keyed by tenant and UTC timestamp.
    /// Returns the object key.
    pub async fn upload(&self, tenant: &str, data: &[u8]) -> Result<String> {
        let key = format!(
            "{}{}.tar.gz",
            Self::prefix(tenant),
            Utc::now().format("%Y%m%dT%H%M%SZ")
        );
        let response = self
            .bucket
            .put_object(&key, data)
            .await
            .map_err(|e| QuernError::S3(e.to_string()))?;
        if response.status_code() != 200 {
            return Err(QuernError::S3(format!(
                "upload failed with status {}",
                response.status_code()
            )));
        }
        info!(tenant, key, bytes = data.len(), "snapshot uploaded");
        Ok(key)
    }

    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| QuernError::S3(e.to_string()))?;
        if response.status_code() != 200 {
            return Err(QuernError::S3(format!(
                "download of {key} failed with status {}",
                response.status_code()
            )));
        }
        Ok(response.to_vec())
    }

    /// Object keys for a tenant's snapshots, oldest first.
    pub async fn list(&self, tenant: &str) -> Result<Vec<String>> {
        let results = self
            .bucket
            .list(Self::prefix(tenant), None)
            .await
            .map_err(|e| QuernError::S3(e.to_string()))?;
        let mut keys: Vec<String> = results
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|obj| obj.key)
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// The most recent snapshot key, if any. Timestamped names make the
    /// lexicographic maximum the newest.
    pub async fn latest(&self, tenant: &str) -> Result<Option<String>> {
        Ok(self.list(tenant).await?.pop())
    }

    /// Delete snapshots beyond the `keep` most recent.
    pub async fn enforce_retention(&self, tenant: &str, keep: usize) -> Result<usize> {
        let keys = self.list(tenant).await?;
        if keys.len() <= keep {
            return Ok(0);
        }
        let stale = keys.len() - keep;
        let mut deleted = 0;
        for key in &keys[..stale] {
            match self.bucket.delete_object(key).await {
                Ok(_) => deleted += 1,
                Err(e) => warn!(tenant, key, error = %e, "snapshot delete failed"),
            }
        }
        info!(tenant, deleted, "snapshot retention enforced");
        Ok(deleted)
    }
}
