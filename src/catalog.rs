//! The ICD-10 code catalog.
//!
//! A catalog is an ordered, duplicate-free list of codes loaded from CSV or
//! JSON. Its fingerprint (SHA-256 over the ordered records) identifies the
//! catalog version an index was built from.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CodingError, CodingResult};

/// Identifier of a diagnostic code, e.g. `G43.909`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CodeId(String);

impl CodeId {
    /// Creates a code id, trimming surrounding whitespace.
    ///
    /// Returns a data error for blank ids.
    pub fn new(id: impl AsRef<str>) -> CodingResult<Self> {
        let trimmed = id.as_ref().trim();
        if trimmed.is_empty() {
            return Err(CodingError::Data {
                reason: "code id cannot be empty".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CodeId {
    type Error = CodingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CodeId> for String {
    fn from(id: CodeId) -> Self {
        id.0
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    #[serde(rename = "icd_code", alias = "code")]
    pub id: CodeId,
    #[serde(default)]
    pub short_description: String,
    pub long_description: String,
}

impl Code {
    /// Creates a code; fails on a blank id or long description.
    pub fn new(
        id: impl AsRef<str>,
        short_description: impl Into<String>,
        long_description: impl Into<String>,
    ) -> CodingResult<Self> {
        let id = CodeId::new(id)?;
        let long_description = long_description.into().trim().to_string();
        if long_description.is_empty() {
            return Err(CodingError::Data {
                reason: format!("code {id} has an empty long description"),
            });
        }
        Ok(Self {
            id,
            short_description: short_description.into().trim().to_string(),
            long_description,
        })
    }
}

/// Ordered, duplicate-free code catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    codes: Vec<Code>,
    positions: HashMap<CodeId, usize>,
    fingerprint: String,
}

impl Catalog {
    /// Builds a catalog, rejecting duplicate ids.
    pub fn new(codes: Vec<Code>) -> CodingResult<Self> {
        let mut positions = HashMap::with_capacity(codes.len());
        for (position, code) in codes.iter().enumerate() {
            if code.long_description.trim().is_empty() {
                return Err(CodingError::Data {
                    reason: format!("code {} has an empty long description", code.id),
                });
            }
            if positions.insert(code.id.clone(), position).is_some() {
                return Err(CodingError::Data {
                    reason: format!("duplicate code id {}", code.id),
                });
            }
        }

        let fingerprint = Self::compute_fingerprint(&codes);
        Ok(Self {
            codes,
            positions,
            fingerprint,
        })
    }

    /// Loads a catalog from a `.csv` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> CodingResult<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let file = std::fs::File::open(path).map_err(|e| CodingError::Data {
            reason: format!("cannot read catalog '{}': {e}", path.display()),
        })?;

        let catalog = match extension.as_deref() {
            Some("csv") => Self::from_csv_reader(file),
            Some("json") => Self::from_json_reader(file),
            _ => Err(CodingError::Data {
                reason: format!(
                    "unsupported catalog format '{}': expected .csv or .json",
                    path.display()
                ),
            }),
        }?;

        tracing::info!(
            path = %path.display(),
            codes = catalog.len(),
            fingerprint = %catalog.short_fingerprint(),
            "loaded catalog"
        );
        Ok(catalog)
    }

    /// Reads CSV with `icd_code`, `short_description`, `long_description` headers.
    pub fn from_csv_reader(reader: impl Read) -> CodingResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let mut codes = Vec::new();
        for (row, record) in csv_reader.deserialize::<Code>().enumerate() {
            let code = record.map_err(|e| CodingError::Data {
                reason: format!("catalog row {}: {e}", row + 1),
            })?;
            codes.push(Code::new(
                code.id.as_str(),
                code.short_description,
                code.long_description,
            )?);
        }

        Self::new(codes)
    }

    /// Reads a JSON array of code objects.
    pub fn from_json_reader(reader: impl Read) -> CodingResult<Self> {
        let raw: Vec<Code> = serde_json::from_reader(reader).map_err(|e| CodingError::Data {
            reason: format!("invalid catalog JSON: {e}"),
        })?;
        let codes = raw
            .into_iter()
            .map(|code| Code::new(code.id.as_str(), code.short_description, code.long_description))
            .collect::<CodingResult<Vec<_>>>()?;
        Self::new(codes)
    }

    fn compute_fingerprint(codes: &[Code]) -> String {
        let mut hasher = Sha256::new();
        for code in codes {
            hasher.update(code.id.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(code.short_description.as_bytes());
            hasher.update([0u8]);
            hasher.update(code.long_description.as_bytes());
            hasher.update([b'\n']);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Codes in catalog order.
    #[must_use]
    pub fn codes(&self) -> &[Code] {
        &self.codes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Code> {
        self.codes.iter()
    }

    #[must_use]
    pub fn get(&self, id: &CodeId) -> Option<&Code> {
        self.positions.get(id).map(|&position| &self.codes[position])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Hex SHA-256 of the ordered records.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// First 8 hex digits of the fingerprint.
    #[must_use]
    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..8]
    }
}
