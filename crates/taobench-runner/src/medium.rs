//! Backing-store kinds for the ORAM file and their canonical names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMedium {
    Memory,
    Ssd,
    Hdd,
}

impl StorageMedium {
    /// Enumeration order used by the storage sweep.
    pub const ALL: [StorageMedium; 3] = [
        StorageMedium::Memory,
        StorageMedium::Ssd,
        StorageMedium::Hdd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMedium::Memory => "memory",
            StorageMedium::Ssd => "ssd",
            StorageMedium::Hdd => "hdd",
        }
    }
}

impl fmt::Display for StorageMedium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMedium {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageMedium::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| HarnessError::UnknownMedium(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip_through_from_str() {
        for medium in StorageMedium::ALL {
            let parsed: StorageMedium = medium.as_str().parse().expect("parse");
            assert_eq!(parsed, medium);
        }
        assert_eq!(StorageMedium::Ssd.to_string(), "ssd");
    }

    #[test]
    fn parsing_is_case_sensitive() {
        let err = "SSD".parse::<StorageMedium>().expect_err("upper case must not parse");
        assert!(err.to_string().contains("SSD"), "unexpected error: {}", err);
    }
}
