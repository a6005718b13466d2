use std::fs::File;
use std::io::{BufRead, BufReader};
use serde::Serialize;
use log::{info, warn, error};

use crate::error::{RelayError, Result};

// Built-in table, in publication order. The first entry is the default selection.
const BUILTIN_RATES: [(&str, &str); 5] = [
    ("RUB", "0.011USD"),
    ("EUR", "1.09USD"),
    ("CZK", "0.044USD"),
    ("BTC", "42'155.80USD"),
    ("ETH", "2'247.84USD"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateEntry {
    pub code: String,
    pub rate: String,
}

impl RateEntry {
    pub fn from_line(line: &str, line_num: usize) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();

        if fields.len() != 2 {
            return Err(format!(
                "Invalid rate format at line {}: expected CODE,RATE, got {} fields",
                line_num + 1,
                fields.len()
            ));
        }

        let (code, rate) = (fields[0], fields[1]);
        if code.is_empty() || code.contains(char::is_whitespace) {
            return Err(format!("Invalid currency code at line {}: '{}'", line_num + 1, code));
        }
        if rate.is_empty() {
            return Err(format!("Missing rate for {} at line {}", code, line_num + 1));
        }

        Ok(RateEntry {
            code: code.to_string(),
            rate: rate.to_string(),
        })
    }
}

/// Immutable mapping from currency code to a pre-formatted rate string.
///
/// Entries keep their load order; lookups are linear, which is fine for the
/// handful of codes a relay carries.
#[derive(Debug, Clone)]
pub struct RateTable {
    entries: Vec<RateEntry>,
}

impl RateTable {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_RATES
                .iter()
                .map(|(code, rate)| RateEntry {
                    code: code.to_string(),
                    rate: rate.to_string(),
                })
                .collect(),
        }
    }

    /// Builds a table from entries, keeping the first occurrence of a code.
    pub fn from_entries(entries: impl IntoIterator<Item = RateEntry>) -> Self {
        let mut table = Self { entries: Vec::new() };
        for entry in entries {
            if table.contains(&entry.code) {
                warn!("Duplicate currency code {} ignored", entry.code);
                continue;
            }
            table.entries.push(entry);
        }
        table
    }

    pub fn load_from_file(file_path: &str) -> Result<Self> {
        let file = File::open(file_path)
            .map_err(|e| RelayError::RateFile(format!("Failed to open file {}: {}", file_path, e)))?;

        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut errors = 0usize;

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match RateEntry::from_line(line, line_num) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    error!("{}", e);
                    errors += 1;
                }
            }
        }

        let table = Self::from_entries(entries);
        if table.is_empty() {
            return Err(RelayError::RateFile(format!(
                "No valid rates in {} ({} errors encountered)", file_path, errors
            )));
        }

        if errors > 0 {
            warn!("Loaded {} rates from {} with {} errors", table.len(), file_path, errors);
        } else {
            info!("Loaded {} rates from {}", table.len(), file_path);
        }

        Ok(table)
    }

    pub fn rate_for(&self, code: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| entry.rate.as_str())
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rate_for(code).is_some()
    }

    pub fn default_code(&self) -> Option<&str> {
        self.entries.first().map(|entry| entry.code.as_str())
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.code.as_str())
    }

    pub fn entries(&self) -> &[RateEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
