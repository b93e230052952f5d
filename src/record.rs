// 🧾 Record Codec
// Positional CSV format emitted by the catalog generator:
//   id,name,price,created_at,updated_at
//
// Fields are matched by position, never by header name.

use crate::error::{Result, SyncError};
use chrono::{DateTime, Datelike, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Header line written by `export` and skipped by the snapshot reader
pub const HEADER: &str = "id,name,price,created_at,updated_at";

/// Number of positional fields per record line
pub const FIELD_COUNT: usize = 5;

// ============================================================================
// PRICE
// ============================================================================

/// Non-negative decimal with exactly two fractional digits, stored as cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(u64);

impl Price {
    pub fn from_cents(cents: u64) -> Self {
        Price(cents)
    }

    pub fn cents(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Price {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || SyncError::malformed(format!("invalid price '{}'", s));

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if s.ends_with('.') {
            return Err(invalid());
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let frac_cents: u64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };

        whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .map(Price)
            .ok_or_else(invalid)
    }
}

// ============================================================================
// PRODUCT
// ============================================================================

/// One catalog entry. `id` is the immutable identity; everything else may
/// change between snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: Price,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The mutable part of a product, as written by an upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFields {
    pub name: String,
    pub price: Price,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn fields(&self) -> ProductFields {
        ProductFields {
            name: self.name.clone(),
            price: self.price,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn from_parts(id: String, fields: ProductFields) -> Self {
        Product {
            id,
            name: fields.name,
            price: fields.price,
            created_at: fields.created_at,
            updated_at: fields.updated_at,
        }
    }
}

// ============================================================================
// TIMESTAMPS
// ============================================================================

/// Accepts RFC 3339 (any offset, normalized to UTC) or naive ISO-8601
/// date-times, which are taken as UTC. Years outside 0000..=9999 are
/// rejected since RFC 3339 output could not represent them.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    let parsed = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .into_iter()
                .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
                .map(|naive| naive.and_utc())
        });

    match parsed {
        Some(dt) if (0..=9999).contains(&dt.year()) => Ok(dt),
        Some(_) => Err(SyncError::malformed(format!("timestamp '{}' out of range", s))),
        None => Err(SyncError::malformed(format!("invalid timestamp '{}'", s))),
    }
}

pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ============================================================================
// CODEC
// ============================================================================

/// Parse one record line (header and blank lines already filtered out)
pub fn parse(line: &str) -> Result<Product> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    let mut record = csv::StringRecord::new();
    let found = rdr
        .read_record(&mut record)
        .map_err(|e| SyncError::malformed(e.to_string()))?;

    if !found {
        return Err(SyncError::malformed("empty record"));
    }
    if record.len() != FIELD_COUNT {
        return Err(SyncError::malformed(format!(
            "expected {} fields, found {}",
            FIELD_COUNT,
            record.len()
        )));
    }

    let id = record[0].to_string();
    if id.trim().is_empty() {
        return Err(SyncError::malformed("empty identity"));
    }

    Ok(Product {
        id,
        name: record[1].to_string(),
        price: record[2].parse()?,
        created_at: parse_timestamp(&record[3])?,
        updated_at: parse_timestamp(&record[4])?,
    })
}

/// Serialize a product in the same positional order `parse` reads
pub fn serialize(product: &Product) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let price = product.price.to_string();
    let created_at = format_timestamp(&product.created_at);
    let updated_at = format_timestamp(&product.updated_at);

    wtr.write_record([
        product.id.as_str(),
        product.name.as_str(),
        price.as_str(),
        created_at.as_str(),
        updated_at.as_str(),
    ])
    .map_err(|e| SyncError::malformed(format!("cannot serialize '{}': {}", product.id, e)))?;

    let bytes = wtr
        .into_inner()
        .map_err(|e| SyncError::malformed(format!("cannot serialize '{}': {}", product.id, e)))?;
    let mut line = String::from_utf8(bytes)
        .map_err(|e| SyncError::malformed(format!("cannot serialize '{}': {}", product.id, e)))?;

    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

// ============================================================================
// TESTS
// ============================================================================
