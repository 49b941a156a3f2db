use std::fmt::Display;
use std::io::Read;
use std::path::Path;

use fxhash::FxHashMap;
use serde::Deserialize;

use super::error::AssayTableError;

/// How an assay is called
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssayType {
    LoA,
    QPcr,
    /// Any other type named in the assay table, as written there
    Other(String),
    Unknown,
}

impl AssayType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::LoA => "LoA",
            Self::QPcr => "qPCR",
            Self::Other(kind) => kind,
            Self::Unknown => "Unknown",
        }
    }

    /// Parse the Type column of the assay table. A blank type is Unknown
    pub fn from_table(value: &str) -> Self {
        let value = value.trim();
        match value.to_lowercase().as_str() {
            "loa" => Self::LoA,
            "qpcr" => Self::QPcr,
            "" => Self::Unknown,
            _ => Self::Other(value.to_string()),
        }
    }
}

impl Display for AssayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the assay table. Other columns in the file are ignored
#[derive(Debug, Clone, Deserialize)]
struct AssayRecord {
    #[serde(rename = "Variant")]
    variant: String,
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Assay")]
    assay: String,
}

/// The entry for a known assay variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssayInfo {
    pub assay_type: AssayType,
    pub name: String,
}

/// AssayTable maps target/variant names (as typed on the instrument) to the assay type and
/// the canonical assay name. Lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct AssayTable {
    map: FxHashMap<String, AssayInfo>,
}

impl AssayTable {
    /// Load the tab separated assay table from disk
    pub fn new(path: &Path) -> Result<Self, AssayTableError> {
        if !path.exists() {
            return Err(AssayTableError::BadFilePath(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, AssayTableError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = AssayTable::default();
        for record in reader.deserialize::<AssayRecord>() {
            let record = record?;
            let key = record.variant.to_lowercase();
            if key.is_empty() {
                continue;
            }
            if table.map.contains_key(&key) {
                spdlog::warn!("Assay table lists variant {} more than once; keeping the first", key);
                continue;
            }
            table.map.insert(
                key,
                AssayInfo {
                    assay_type: AssayType::from_table(&record.kind),
                    name: record.assay,
                },
            );
        }
        Ok(table)
    }

    /// Look up a target name
    pub fn get(&self, target: &str) -> Option<&AssayInfo> {
        self.map.get(&target.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
