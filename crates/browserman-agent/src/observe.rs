//! Per-step page snapshot.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::artifacts::ArtifactStore;
use crate::config::Size;
use crate::driver::Driver;
use crate::Result;

/// What the page looked like at the start of a step.
pub struct Observation {
    /// PNG bytes exactly as captured.
    pub png: Vec<u8>,
    /// Decoded screenshot at its original resolution.
    pub image: DynamicImage,
    pub html: String,
    pub url: String,
}

impl Observation {
    /// Base64 PNG thumbnail for event transport.
    pub fn thumbnail(&self, size: Size) -> Result<String> {
        let small = self
            .image
            .resize_exact(size.width, size.height, FilterType::Triangle);
        image_to_base64(&small)
    }
}

pub fn image_to_base64(img: &DynamicImage) -> Result<String> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(BASE64.encode(buffer.into_inner()))
}

/// Screenshot and DOM of the current page, persisted under `job_id`/`step`.
///
/// Artifact write failures are logged and do not fail the capture.
pub async fn capture(
    driver: &dyn Driver,
    artifacts: &dyn ArtifactStore,
    job_id: &str,
    step: u32,
) -> Result<Observation> {
    let png = driver.screenshot().await?;
    if let Err(e) = artifacts.put_screenshot(job_id, step, &png).await {
        warn!("failed to store screenshot for step {}: {}", step, e);
    }
    let image = image::load_from_memory(&png)?;

    let html = driver.content().await?;
    if let Err(e) = artifacts.put_dom(job_id, step, &html).await {
        warn!("failed to store DOM for step {}: {}", step, e);
    }
    let url = driver.url().await?;

    debug!(
        "observed {} ({}x{}, {} bytes of DOM)",
        url,
        image.width(),
        image.height(),
        html.len()
    );
    Ok(Observation {
        png,
        image,
        html,
        url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};

    fn solid(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30])))
    }

    #[test]
    fn test_thumbnail_keeps_original() {
        let obs = Observation {
            png: Vec::new(),
            image: solid(1920, 1080),
            html: String::new(),
            url: String::new(),
        };
        let encoded = obs
            .thumbnail(Size {
                width: 480,
                height: 270,
            })
            .unwrap();
        let bytes = BASE64.decode(encoded).unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!(thumb.dimensions(), (480, 270));
        assert_eq!(obs.image.dimensions(), (1920, 1080));
    }

    #[test]
    fn test_base64_is_png() {
        let encoded = image_to_base64(&solid(4, 4)).unwrap();
        let bytes = BASE64.decode(encoded).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
    }
}
