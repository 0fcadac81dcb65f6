use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Decodes a `data:<mime>;base64,<payload>` string into an RGB image.
///
/// The payload is the segment following the first comma; the declared
/// media type is ignored and the format is sniffed from the bytes.
/// Whitespace inside the payload (line-wrapped base64) is skipped.
pub fn decode_data_url(data_url: &str) -> Result<DynamicImage, failure::Error> {
    let payload = data_url
        .split(',')
        .nth(1)
        .ok_or_else(|| format_err!("Missing data URL separator"))?;
    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD.decode(payload)?;
    if bytes.is_empty() {
        bail!("Image payload is empty");
    }
    let image = image::load_from_memory(&bytes)?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// JPEG-encodes `image` and returns the bare base64 text (no data URL prefix).
pub fn encode_jpeg_base64(image: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    // The JPEG encoder rejects alpha channels.
    DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buffer, ImageFormat::Jpeg)?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// A solid-colour RGBA PNG wrapped in a data URL.
    pub fn png_data_url(width: u32, height: u32) -> String {
        let image = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([200, 40, 40, 255]),
        ));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        format!(
            "data:image/png;base64,{}",
            STANDARD.encode(buffer.into_inner())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::png_data_url;
    use super::*;

    #[test]
    fn decodes_png_data_url_to_rgb() {
        let image = decode_data_url(&png_data_url(12, 7)).unwrap();
        assert_eq!((image.width(), image.height()), (12, 7));
        assert!(matches!(image, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn ignores_declared_media_type() {
        let url = png_data_url(3, 3).replace("image/png", "image/jpeg");
        assert!(decode_data_url(&url).is_ok());
    }

    #[test]
    fn decodes_line_wrapped_payload() {
        let url = png_data_url(9, 5);
        let (prefix, payload) = url.split_at(url.find(',').unwrap() + 1);
        let lines: Vec<String> = payload
            .as_bytes()
            .chunks(20)
            .map(|line| String::from_utf8(line.to_vec()).unwrap())
            .collect();
        let wrapped = format!("{}{}\r\n", prefix, lines.join("\n"));
        let image = decode_data_url(&wrapped).unwrap();
        assert_eq!((image.width(), image.height()), (9, 5));
    }

    #[test]
    fn rejects_string_without_separator() {
        let url = png_data_url(3, 3);
        let bare = url.split(',').nth(1).unwrap();
        assert!(decode_data_url(bare).is_err());
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(decode_data_url("data:image/png;base64,not-valid-base64!!!").is_err());
    }

    #[test]
    fn rejects_bytes_that_are_not_an_image() {
        let payload = STANDARD.encode([0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
        let url = format!("data:image/png;base64,{}", payload);
        assert!(decode_data_url(&url).is_err());
    }

    #[test]
    fn rejects_empty_payload() {
        assert!(decode_data_url("data:image/png;base64,").is_err());
    }

    #[test]
    fn encodes_jpeg_without_prefix() {
        let image = decode_data_url(&png_data_url(16, 16)).unwrap();
        let encoded = encode_jpeg_base64(&image).unwrap();
        // FF D8 FF
        assert!(encoded.starts_with("/9j/"));
        let bytes = STANDARD.decode(&encoded).unwrap();
        let round = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).unwrap();
        assert_eq!((round.width(), round.height()), (16, 16));
    }
}
