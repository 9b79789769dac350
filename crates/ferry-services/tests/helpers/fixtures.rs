use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ferry_services::RawSource;
use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;

/// Encode a solid-colour PNG of the given size.
pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgb([200u8, 40, 40]));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)
        .expect("Failed to encode test PNG");
    buffer.into_inner()
}

/// A PNG wrapped in a `data:image/png;base64,` marker, as a browser would hand it over.
pub fn png_source(name: &str, width: u32, height: u32) -> RawSource {
    let data_url = format!(
        "data:image/png;base64,{}",
        STANDARD.encode(create_test_png(width, height))
    );
    RawSource::new(data_url.into_bytes(), name)
}

pub fn text_source(name: &str, content: &str) -> RawSource {
    RawSource::new(content.as_bytes().to_vec(), name)
}
