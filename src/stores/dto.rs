use serde::Deserialize;

use super::{photos::PhotoUpload, services::StoreInput};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct NearQuery {
    pub lng: f64,
    pub lat: f64,
}

/// Accumulates multipart fields of the store form.
#[derive(Default)]
pub struct StoreForm {
    input: StoreInput,
    photo: Option<PhotoUpload>,
}

fn parse_coordinate(value: &str) -> Result<Option<f64>, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| AppError::Validation {
        field: "location.coordinates",
        reason: "must be numbers",
    })
}

impl StoreForm {
    /// Unknown field names are ignored.
    pub fn set_text(&mut self, name: &str, value: String) -> Result<(), AppError> {
        match name {
            "name" => self.input.name = Some(value),
            "description" => self.input.description = Some(value),
            "tags" | "tags[]" => self.input.tags.push(value),
            "lng" | "location[coordinates][0]" => self.input.lng = parse_coordinate(&value)?,
            "lat" | "location[coordinates][1]" => self.input.lat = parse_coordinate(&value)?,
            "address" | "location[address]" => self.input.address = Some(value),
            _ => {}
        }
        Ok(())
    }

    pub fn set_photo(&mut self, photo: PhotoUpload) {
        self.photo = Some(photo);
    }

    pub fn into_parts(self) -> (StoreInput, Option<PhotoUpload>) {
        (self.input, self.photo)
    }
}
