use chrono::NaiveDateTime;
use std::io::Cursor;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub taken_at: Option<NaiveDateTime>,
}

/// Best-effort metadata from an in-memory file. Missing pieces stay `None`.
pub fn extract_metadata(bytes: &[u8]) -> ImageMetadata {
    let mut metadata = ImageMetadata::default();

    if let Ok(reader) = image::ImageReader::new(Cursor::new(bytes)).with_guessed_format() {
        if let Ok((width, height)) = reader.into_dimensions() {
            metadata.width = Some(width);
            metadata.height = Some(height);
        }
    }

    let mut cursor = Cursor::new(bytes);
    if let Ok(exif) = exif::Reader::new().read_from_container(&mut cursor) {
        let taken = exif
            .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
            .or_else(|| exif.get_field(exif::Tag::DateTime, exif::In::PRIMARY));
        if let Some(field) = taken {
            if let exif::Value::Ascii(ref values) = field.value {
                metadata.taken_at = values
                    .first()
                    .and_then(|raw| std::str::from_utf8(raw).ok())
                    .and_then(parse_exif_datetime);
            }
        }
    }

    metadata
}

/// Parse the EXIF `YYYY:MM:DD HH:MM:SS` form. Zeroed placeholder dates yield `None`.
pub fn parse_exif_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim().trim_matches('"').trim_end_matches('\0');
    NaiveDateTime::parse_from_str(trimmed, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .ok()
}
