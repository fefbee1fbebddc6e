use ulip_domain::dates::parse_iso_date;
use validator::{Validate, ValidationError};

use crate::error::ApiError;

pub fn validate<T: Validate>(value: &T) -> Result<(), ApiError> {
    value
        .validate()
        .map_err(|err| ApiError::Validation(err.to_string()))?;
    Ok(())
}

/// Accepts only real calendar dates written as `YYYY-MM-DD`.
pub fn iso_date(value: &str) -> Result<(), ValidationError> {
    match parse_iso_date(value) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("iso_date")
            .with_message("must be a valid YYYY-MM-DD date".into())),
    }
}
