//! In-memory flattening of base + overlay for display and PDF export.

use image::imageops::FilterType;
use image::{imageops, DynamicImage, RgbImage};

use crate::codec::decode_image_file;
use crate::error::Result;
use crate::refs::MediaRef;
use crate::MediaStore;

impl MediaStore {
    /// Flatten a base image with its annotation overlay into one RGB
    /// bitmap.
    ///
    /// The result is never written back into the store; base media stay
    /// pristine. A missing base yields `None` (broken reference, no
    /// fallback). An absent or missing overlay yields the base converted
    /// to RGB. An overlay with mismatched dimensions is resized to the
    /// base's before alpha-compositing.
    ///
    /// Read-only: callers may cache the result keyed by the two resolved
    /// paths, since bases are immutable and overlays are replaced, not
    /// mutated.
    pub fn composite(
        &self,
        base: &MediaRef,
        overlay: Option<&MediaRef>,
    ) -> Result<Option<RgbImage>> {
        let base_path = match self.resolve(base) {
            Some(path) => path,
            None => return Ok(None),
        };
        let mut flattened = decode_image_file(&base_path)?.to_rgba8();

        if let Some(overlay_ref) = overlay {
            if let Some(overlay_path) = self.resolve(overlay_ref) {
                let mut overlay_rgba = decode_image_file(&overlay_path)?.to_rgba8();
                if overlay_rgba.dimensions() != flattened.dimensions() {
                    let (w, h) = flattened.dimensions();
                    overlay_rgba = imageops::resize(&overlay_rgba, w, h, FilterType::Triangle);
                }
                imageops::overlay(&mut flattened, &overlay_rgba, 0, 0);
            }
        }

        Ok(Some(DynamicImage::ImageRgba8(flattened).to_rgb8()))
    }
}
