//! Object storage for processed cover images
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to upload {key}: {message}")]
    Upload { key: String, message: String },
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError>;
}

/// Bucket-backed store. Keys are used verbatim as object keys.
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    #[must_use]
    #[inline]
    pub const fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|error| StorageError::Upload {
                key: key.to_owned(),
                message: DisplayErrorContext(&error).to_string(),
            })?;
        tracing::debug!(bucket = %self.bucket, %key, "object stored");
        Ok(())
    }
}

#[cfg(test)]
pub mod memory {
    use super::{ObjectStore, StorageError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every put; can be told to refuse uploads
    #[derive(Default)]
    pub struct MemoryObjectStore {
        objects: Mutex<Vec<(String, Vec<u8>, String)>>,
        refuse: bool,
    }

    #[allow(clippy::unwrap_used, reason = "Test helper, lock is never poisoned")]
    impl MemoryObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn refusing() -> Self {
            Self {
                objects: Mutex::default(),
                refuse: true,
            }
        }

        pub fn keys(&self) -> Vec<String> {
            self.objects
                .lock()
                .unwrap()
                .iter()
                .map(|(key, _, _)| key.clone())
                .collect()
        }

        pub fn object(&self, key: &str) -> Option<(Vec<u8>, String)> {
            self.objects
                .lock()
                .unwrap()
                .iter()
                .find(|(k, _, _)| k == key)
                .map(|(_, bytes, content_type)| (bytes.clone(), content_type.clone()))
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryObjectStore {
        #[allow(clippy::unwrap_used, reason = "Test helper, lock is never poisoned")]
        async fn put(
            &self,
            key: &str,
            bytes: Vec<u8>,
            content_type: &str,
        ) -> Result<(), StorageError> {
            if self.refuse {
                return Err(StorageError::Upload {
                    key: key.to_owned(),
                    message: "access denied".to_owned(),
                });
            }
            self.objects
                .lock()
                .unwrap()
                .push((key.to_owned(), bytes, content_type.to_owned()));
            Ok(())
        }
    }
}
