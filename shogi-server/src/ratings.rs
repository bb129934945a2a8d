//! Read-only rating table loaded at startup.
//!
//! The table lives in a TOML file maintained by the rating tool:
//!
//! ```toml
//! [[players]]
//! id = "alice+5e884898da28..."
//! name = "alice"
//! rate = 1520
//! win = 12
//! loss = 7
//! modified_at = "2024-05-01T09:30:00Z"
//! ```

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::player::PlayerIdentity;

#[derive(Debug, thiserror::Error)]
pub enum RatingsError {
    #[error("failed to read rating table {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse rating table {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Stored rating values for one identity token.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RatingRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rate: i32,
    #[serde(default)]
    pub win: u32,
    #[serde(default)]
    pub loss: u32,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_game_win: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RatingFile {
    #[serde(default)]
    players: Vec<RatingRecord>,
}

/// Rating records keyed by identity token, in file order.
#[derive(Debug, Default)]
pub struct RatingTable {
    records: Vec<RatingRecord>,
    by_id: HashMap<String, usize>,
}

impl RatingTable {
    pub fn load(path: &Path) -> Result<Self, RatingsError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| RatingsError::Read {
            path: display.clone(),
            source,
        })?;
        Self::parse(&content).map_err(|source| RatingsError::Parse {
            path: display,
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let file: RatingFile = toml::from_str(content)?;
        Ok(Self::from_records(file.players))
    }

    pub fn from_records(records: Vec<RatingRecord>) -> Self {
        let mut table = Self::default();
        for record in records {
            if let Some(&i) = table.by_id.get(&record.id) {
                table.records[i] = record;
            } else {
                table.by_id.insert(record.id.clone(), table.records.len());
                table.records.push(record);
            }
        }
        table
    }

    pub fn get(&self, id: &str) -> Option<&RatingRecord> {
        self.by_id.get(id).map(|&i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Identities for every stored record, rebuilt for listing.
    pub fn identities(&self) -> impl Iterator<Item = (&str, PlayerIdentity)> + '_ {
        self.records.iter().map(|record| {
            let mut identity = PlayerIdentity::from_record(record);
            identity.apply_record(record);
            (record.id.as_str(), identity)
        })
    }
}

impl PlayerIdentity {
    /// Rebuilds a rated identity for a player who is not logged in. The
    /// token comes from the table since the secret is unknown.
    fn from_record(record: &RatingRecord) -> Self {
        let mut identity = PlayerIdentity::new(record.name.clone());
        identity.restore_token(&record.id);
        identity
    }
}
