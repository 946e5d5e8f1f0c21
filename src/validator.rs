use crate::types::{UploadInput, UploadRequest, ValidationError};

/// Validate the selected files and package them for upload.
///
/// Checks run in order and short-circuit on the first failure: both files
/// present, image within the size limit, image MIME type, annotation is
/// JSON (by MIME type or `.json` extension). Pure; performs no I/O.
pub fn validate(
    input: UploadInput,
    max_image_size_bytes: u64,
) -> std::result::Result<UploadRequest, ValidationError> {
    let image = input.image.ok_or(ValidationError::MissingImage)?;
    let annotation = input.annotation.ok_or(ValidationError::MissingAnnotation)?;

    if image.size() > max_image_size_bytes {
        return Err(ValidationError::ImageTooLarge {
            actual: image.size(),
            max: max_image_size_bytes,
        });
    }

    if !image.mime_type.starts_with("image/") {
        return Err(ValidationError::InvalidImageType {
            name: image.name,
            mime: image.mime_type,
        });
    }

    let is_json = annotation.mime_type.eq_ignore_ascii_case("application/json")
        || annotation.name.to_ascii_lowercase().ends_with(".json");
    if !is_json {
        return Err(ValidationError::InvalidAnnotationType {
            name: annotation.name,
            mime: annotation.mime_type,
        });
    }

    Ok(UploadRequest { image, annotation })
}
