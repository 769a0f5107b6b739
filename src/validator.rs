//! Functions that check the validity of user input.
//!
//! These functions are called after the parsing phase and execute
//! checks that are not easily done by the parser.

use chrono::{DateTime, Months, Utc};

use crate::{
    error::EventError,
    error::InputError,
    types::{ImportFormat, Rating},
};

/// How far in the future an outing can be scheduled.
const MAX_SCHEDULE_MONTHS: u32 = 20 * 12;

/// The time of an outing must be in the future, but not too far.
pub fn validate_schedule(when: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), EventError> {
    if when <= now {
        return Err(EventError::invalid_schedule("the date is in the past"));
    }
    match now.checked_add_months(Months::new(MAX_SCHEDULE_MONTHS)) {
        Some(limit) if when <= limit => Ok(()),
        _ => Err(EventError::invalid_schedule(
            "the date is more than 20 years in the future",
        )),
    }
}

pub fn validate_rating(rating: Rating) -> Result<(), InputError> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(InputError::invalid_rating(&rating.to_string()))
    }
}

/// The extension of the uploaded file tells its format.
pub fn validate_import_file_name(file_name: Option<&str>) -> Result<ImportFormat, InputError> {
    let name = file_name.map(str::to_lowercase).unwrap_or_default();
    if name.ends_with(".json") {
        Ok(ImportFormat::Json)
    } else if name.ends_with(".csv") {
        Ok(ImportFormat::Csv)
    } else {
        Err(InputError::UnsupportedImportFormat)
    }
}

pub fn validate_restaurant_name(name: &str) -> Result<&str, InputError> {
    let name = name.trim();
    if name.is_empty() {
        Err(InputError::MissingRestaurantName)
    } else {
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_validate_schedule() {
        let now = Utc::now();
        assert!(validate_schedule(now + Duration::minutes(1), now).is_ok());
        assert!(validate_schedule(now + Duration::days(365 * 19), now).is_ok());

        for when in [now, now - Duration::hours(1), now + Duration::days(365 * 21)] {
            assert!(matches!(
                validate_schedule(when, now),
                Err(EventError::InvalidSchedule(_))
            ));
        }
    }

    #[test]
    fn test_validate_rating() {
        for rating in 1..=5 {
            assert!(validate_rating(rating).is_ok());
        }
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(6).is_err());
    }

    #[test]
    fn test_validate_import_file_name() {
        assert_eq!(
            validate_import_file_name(Some("restaurants.json")).unwrap(),
            ImportFormat::Json
        );
        assert_eq!(
            validate_import_file_name(Some("RESTAURANTS.JSON")).unwrap(),
            ImportFormat::Json
        );
        assert_eq!(
            validate_import_file_name(Some("Restaurants.Csv")).unwrap(),
            ImportFormat::Csv
        );
        assert!(matches!(
            validate_import_file_name(Some("restaurants.xlsx")),
            Err(InputError::UnsupportedImportFormat)
        ));
        assert!(validate_import_file_name(None).is_err());
    }

    #[test]
    fn test_validate_restaurant_name() {
        assert_eq!(validate_restaurant_name("  Da Mario ").unwrap(), "Da Mario");
        assert!(matches!(
            validate_restaurant_name("   "),
            Err(InputError::MissingRestaurantName)
        ));
    }
}
