//! Parse the file with the restaurants to import.
//!
//! A JSON file is either an object with a `restaurants` array or the bare array.
//! A CSV file has a header row naming the columns. In both cases unknown fields
//! (like the `id` of the exporting system) are ignored.

use log::debug;
use serde::Deserialize;

use crate::{
    error::InputError,
    types::{ImportFormat, ImportedRestaurant},
};

#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    Wrapped { restaurants: Vec<RestaurantRecord> },
    Bare(Vec<RestaurantRecord>),
}

#[derive(Deserialize)]
struct RestaurantRecord {
    name: Option<String>,
    address: Option<String>,
    cuisine: Option<String>,
    description: Option<String>,
    #[serde(alias = "priceIndicator", alias = "average_check")]
    price_indicator: Option<PriceIndicator>,
}

/// A row of a CSV file. Empty cells are read as missing values.
#[derive(Deserialize)]
struct CsvRecord {
    name: Option<String>,
    address: Option<String>,
    cuisine: Option<String>,
    description: Option<String>,
    #[serde(alias = "priceIndicator", alias = "average_check")]
    price_indicator: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PriceIndicator {
    Text(String),
    Number(serde_json::Number),
}

/// Restaurants read from an import file, plus how many records were unusable.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedImport {
    pub restaurants: Vec<ImportedRestaurant>,
    pub invalid: usize,
}

pub fn parse_import_file(bytes: &[u8], format: ImportFormat) -> Result<ParsedImport, InputError> {
    let records = match format {
        ImportFormat::Json => parse_json(bytes)?,
        ImportFormat::Csv => parse_csv(bytes)?,
    };

    let total = records.len();
    let restaurants: Vec<_> = records.into_iter().filter_map(to_restaurant).collect();
    let invalid = total - restaurants.len();
    if invalid > 0 {
        debug!("{invalid} records without a name in the import file");
    }

    Ok(ParsedImport {
        restaurants,
        invalid,
    })
}

fn parse_json(bytes: &[u8]) -> Result<Vec<RestaurantRecord>, InputError> {
    let file: ImportFile = serde_json::from_slice(bytes).map_err(InputError::invalid_import_file)?;
    Ok(match file {
        ImportFile::Wrapped { restaurants } => restaurants,
        ImportFile::Bare(restaurants) => restaurants,
    })
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<RestaurantRecord>, InputError> {
    // Excel puts a byte order mark in front of UTF-8 files.
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader.headers().map_err(InputError::invalid_import_file)?;
    if !headers.iter().any(|header| header == "name") {
        return Err(InputError::invalid_import_file("the `name` column is missing"));
    }

    reader
        .deserialize::<CsvRecord>()
        .map(|row| {
            row.map(|record| RestaurantRecord {
                name: record.name,
                address: record.address,
                cuisine: record.cuisine,
                description: record.description,
                price_indicator: record.price_indicator.map(PriceIndicator::Text),
            })
            .map_err(InputError::invalid_import_file)
        })
        .collect()
}

fn to_restaurant(record: RestaurantRecord) -> Option<ImportedRestaurant> {
    let name = non_empty(record.name)?;
    Some(ImportedRestaurant {
        name,
        address: non_empty(record.address).unwrap_or_default(),
        cuisine: non_empty(record.cuisine),
        description: non_empty(record.description),
        price_indicator: record.price_indicator.and_then(|p| match p {
            PriceIndicator::Text(text) => non_empty(Some(text)),
            PriceIndicator::Number(number) => Some(number.to_string()),
        }),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_file() -> anyhow::Result<()> {
        let json = r#"{"restaurants": [
            {"id": 1, "name": " Da Mario ", "address": "Via Roma 1", "cuisine": "Italian",
             "description": "Pizza", "average_check": 2000},
            {"id": 2, "name": "Sushi Bar", "priceIndicator": "$$"}
        ]}"#;

        let parsed = parse_import_file(json.as_bytes(), ImportFormat::Json)?;
        assert_eq!(parsed.invalid, 0);
        assert_eq!(parsed.restaurants.len(), 2);

        let first = &parsed.restaurants[0];
        assert_eq!(first.name, "Da Mario");
        assert_eq!(first.address, "Via Roma 1");
        assert_eq!(first.cuisine.as_deref(), Some("Italian"));
        assert_eq!(first.price_indicator.as_deref(), Some("2000"));

        let second = &parsed.restaurants[1];
        assert_eq!(second.address, "");
        assert_eq!(second.cuisine, None);
        assert_eq!(second.price_indicator.as_deref(), Some("$$"));
        Ok(())
    }

    #[test]
    fn test_parse_bare_array() -> anyhow::Result<()> {
        let json = r#"[{"name": "X", "address": "Y", "price_indicator": "€€"}, {"name": "  "}, {}]"#;

        let parsed = parse_import_file(json.as_bytes(), ImportFormat::Json)?;
        assert_eq!(parsed.restaurants, vec![ImportedRestaurant {
            price_indicator: Some("€€".to_string()),
            ..ImportedRestaurant::new("X", "Y")
        }]);
        assert_eq!(parsed.invalid, 2);
        Ok(())
    }

    #[test]
    fn test_parse_invalid_file() {
        for json in ["", "not json", r#"{"places": []}"#, r#"{"restaurants": 3}"#] {
            let result = parse_import_file(json.as_bytes(), ImportFormat::Json);
            assert!(matches!(result, Err(InputError::InvalidImportFile(_))));
        }
    }

    #[test]
    fn test_parse_csv_file() -> anyhow::Result<()> {
        let csv = "\u{feff}name,address,cuisine,description,average_check\n\
                   Da Mario,\"Via Roma 1, Milano\",Italian,Pizza,2000\n\
                   ,Nowhere,,,\n\
                   Sushi Bar,Main street,,,\n";

        let parsed = parse_import_file(csv.as_bytes(), ImportFormat::Csv)?;
        assert_eq!(parsed.invalid, 1);
        assert_eq!(
            parsed.restaurants,
            vec![
                ImportedRestaurant {
                    cuisine: Some("Italian".to_string()),
                    description: Some("Pizza".to_string()),
                    price_indicator: Some("2000".to_string()),
                    ..ImportedRestaurant::new("Da Mario", "Via Roma 1, Milano")
                },
                ImportedRestaurant::new("Sushi Bar", "Main street"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_parse_csv_with_fewer_columns() -> anyhow::Result<()> {
        let csv = "address,name\nVia Po 3,Trattoria\n";

        let parsed = parse_import_file(csv.as_bytes(), ImportFormat::Csv)?;
        assert_eq!(
            parsed.restaurants,
            vec![ImportedRestaurant::new("Trattoria", "Via Po 3")]
        );
        Ok(())
    }

    #[test]
    fn test_parse_invalid_csv_file() {
        for csv in ["", "title,address\nX,Y\n"] {
            let result = parse_import_file(csv.as_bytes(), ImportFormat::Csv);
            assert!(matches!(result, Err(InputError::InvalidImportFile(_))));
        }
        let result = parse_import_file(b"name\n\xff\xfe\n", ImportFormat::Csv);
        assert!(matches!(result, Err(InputError::InvalidImportFile(_))));
    }
}
