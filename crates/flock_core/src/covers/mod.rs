//! Cover pipeline
//!
//! Downloads a provider cover, rejects placeholder-sized payloads, normalizes the image to a
//! square bounding box and stores it under `covers/{book_id}.jpg`.
pub mod storage;

use crate::config::QualitySettings;
use crate::covers::storage::{ObjectStore, StorageError};
use crate::providers::http::HttpFetch;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const JPEG_QUALITY: u8 = 85;

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverStatus {
    Uploaded { key: String },
    /// Too small to be a real cover, or not an image at all
    BadQuality,
    NotFound,
}

impl CoverStatus {
    #[must_use]
    #[inline]
    pub const fn is_uploaded(&self) -> bool {
        matches!(self, Self::Uploaded { .. })
    }
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    #[error("failed to encode cover: {0}")]
    Encode(#[from] image::ImageError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cover processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Object key of a book's cover
#[must_use]
#[inline]
pub fn cover_key(book_id: Uuid) -> String {
    format!("covers/{book_id}.jpg")
}

pub struct CoverPipeline {
    fetch: Arc<dyn HttpFetch>,
    store: Arc<dyn ObjectStore>,
    min_bytes: usize,
    size: u32,
}

impl CoverPipeline {
    #[must_use]
    #[inline]
    pub fn new(
        fetch: Arc<dyn HttpFetch>,
        store: Arc<dyn ObjectStore>,
        settings: &QualitySettings,
    ) -> Self {
        Self {
            fetch,
            store,
            min_bytes: settings.min_cover_bytes,
            size: settings.cover_size,
        }
    }

    /// # Errors
    /// Fails only when a valid image could not be re-encoded or stored. Every provider-side
    /// problem maps onto a status instead.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn acquire(
        &self,
        source_url: Option<&str>,
        book_id: Uuid,
    ) -> Result<CoverStatus, CoverError> {
        let Some(url) = source_url.map(str::trim).filter(|url| !url.is_empty()) else {
            return Ok(CoverStatus::NotFound);
        };

        let response = match self.fetch.get(url, &[]).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                debug!(%url, status = response.status, "cover not available");
                return Ok(CoverStatus::NotFound);
            }
            Err(error) => {
                warn!(%url, %error, "cover download failed");
                return Ok(CoverStatus::NotFound);
            }
        };

        if response.body.len() < self.min_bytes {
            info!(%book_id, bytes = response.body.len(), "cover below size threshold");
            return Ok(CoverStatus::BadQuality);
        }

        // Decoding and Lanczos resampling are CPU bound
        let size = self.size;
        let body = response.body;
        let normalized = tokio::task::spawn_blocking(move || normalize(&body, size)).await?;
        let Some(jpeg) = normalized? else {
            info!(%book_id, %url, "cover payload is not a decodable image");
            return Ok(CoverStatus::BadQuality);
        };

        let key = cover_key(book_id);
        self.store.put(&key, jpeg, "image/jpeg").await?;
        info!(%book_id, %key, "cover uploaded");
        Ok(CoverStatus::Uploaded { key })
    }
}

/// Resizes into a `size` square bounding box and re-encodes as JPEG. `None` when the bytes do
/// not decode.
fn normalize(bytes: &[u8], size: u32) -> Result<Option<Vec<u8>>, CoverError> {
    let Ok(decoded) = image::load_from_memory(bytes) else {
        return Ok(None);
    };
    let rgb = decoded.resize(size, size, FilterType::Lanczos3).to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(Some(jpeg))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
pub mod test_images {
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageBuffer, ImageEncoder, Rgb};

    /// PNG filled with pseudo-random noise so it cannot compress below the size threshold
    pub fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x2545_f491;
        let img = ImageBuffer::from_fn(width, height, |_, _| {
            let mut channel = || {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            };
            Rgb([channel(), channel(), channel()])
        });
        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
            .unwrap();
        png
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::covers::storage::memory::MemoryObjectStore;
    use crate::covers::test_images::noisy_png;
    use crate::providers::http::fake::FakeFetch;
    use pretty_assertions::assert_eq;

    const URL: &str = "https://images.test/cover.jpg";

    fn pipeline(fetch: &Arc<FakeFetch>, store: &Arc<MemoryObjectStore>) -> CoverPipeline {
        CoverPipeline::new(
            Arc::clone(fetch) as Arc<dyn HttpFetch>,
            Arc::clone(store) as Arc<dyn ObjectStore>,
            &QualitySettings::default(),
        )
    }

    #[tokio::test]
    async fn large_cover_is_resized_and_uploaded() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.respond(URL, 200, noisy_png(300, 450));
        let store = Arc::new(MemoryObjectStore::new());
        let id = Uuid::new_v4();

        let status = pipeline(&fetch, &store).acquire(Some(URL), id).await.unwrap();

        let key = format!("covers/{id}.jpg");
        assert_eq!(status, CoverStatus::Uploaded { key: key.clone() });
        let (bytes, content_type) = store.object(&key).unwrap();
        assert_eq!(content_type, "image/jpeg");
        let stored = image::load_from_memory(&bytes).unwrap();
        assert_eq!((stored.width(), stored.height()), (267, 400));
    }

    #[tokio::test]
    async fn tiny_cover_is_bad_quality_and_never_uploaded() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.respond(URL, 200, vec![0xFF; 100]);
        let store = Arc::new(MemoryObjectStore::new());

        let status = pipeline(&fetch, &store)
            .acquire(Some(URL), Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(status, CoverStatus::BadQuality);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn payload_of_exactly_the_threshold_passes_the_size_gate() {
        let png = noisy_png(300, 450);
        let fetch = Arc::new(FakeFetch::new());
        fetch.respond(URL, 200, png.clone());
        let store = Arc::new(MemoryObjectStore::new());
        let mut settings = QualitySettings::default();

        settings.min_cover_bytes = png.len();
        let at_threshold = CoverPipeline::new(
            Arc::clone(&fetch) as Arc<dyn HttpFetch>,
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            &settings,
        );
        let status = at_threshold.acquire(Some(URL), Uuid::new_v4()).await.unwrap();
        assert!(status.is_uploaded());

        settings.min_cover_bytes = png.len() + 1;
        let above_threshold = CoverPipeline::new(
            Arc::clone(&fetch) as Arc<dyn HttpFetch>,
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            &settings,
        );
        let status = above_threshold
            .acquire(Some(URL), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(status, CoverStatus::BadQuality);
        assert_eq!(store.keys().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_payload_above_threshold_is_bad_quality() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.respond(URL, 200, vec![0x42; 6_000]);
        let store = Arc::new(MemoryObjectStore::new());

        let status = pipeline(&fetch, &store)
            .acquire(Some(URL), Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(status, CoverStatus::BadQuality);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn missing_url_or_download_is_not_found() {
        let fetch = Arc::new(FakeFetch::new());
        let store = Arc::new(MemoryObjectStore::new());
        let covers = pipeline(&fetch, &store);

        assert_eq!(
            covers.acquire(None, Uuid::new_v4()).await.unwrap(),
            CoverStatus::NotFound
        );
        assert_eq!(
            covers.acquire(Some("  "), Uuid::new_v4()).await.unwrap(),
            CoverStatus::NotFound
        );
        assert_eq!(
            covers.acquire(Some(URL), Uuid::new_v4()).await.unwrap(),
            CoverStatus::NotFound
        );
        assert_eq!(fetch.calls().len(), 1);
    }

    #[tokio::test]
    async fn storage_failure_is_an_error() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.respond(URL, 200, noisy_png(300, 450));
        let store = Arc::new(MemoryObjectStore::refusing());

        let result = pipeline(&fetch, &store).acquire(Some(URL), Uuid::new_v4()).await;
        assert!(matches!(result, Err(CoverError::Storage(_))));
    }
}
