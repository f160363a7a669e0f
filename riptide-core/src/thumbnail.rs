//! Keyframe-to-JPEG conversion for the heartbeat's preview uploads.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;

use crate::errors::ThumbnailError;

const JPEG_QUALITY: u8 = 75;

pub struct Thumbnail {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode one Annex-B H.264 keyframe and re-encode it as a JPEG preview.
///
/// CPU-bound; callers on the async runtime should run it on a blocking
/// thread.
pub fn keyframe_to_jpeg(keyframe: &[u8]) -> Result<Thumbnail, ThumbnailError> {
    let mut decoder =
        Decoder::new().map_err(|err| ThumbnailError::Decode(err.to_string()))?;
    let frame = decoder
        .decode(keyframe)
        .map_err(|err| ThumbnailError::Decode(err.to_string()))?
        .ok_or(ThumbnailError::NoPicture)?;

    let (width, height) = frame.dimensions();
    let mut rgb = vec![0u8; width * height * 3];
    frame.write_rgb8(&mut rgb);

    let mut data = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY);
    encoder
        .encode(
            &rgb,
            width as u32,
            height as u32,
            ExtendedColorType::Rgb8,
        )
        .map_err(|err| ThumbnailError::Encode(err.to_string()))?;

    Ok(Thumbnail {
        data,
        width: width as u32,
        height: height as u32,
    })
}
