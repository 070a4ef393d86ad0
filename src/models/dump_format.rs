use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Defines how a database is serialized into a backup artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Typed, length-prefixed frames. Safe for any blob or text encoding.
    #[default]
    Binary,

    /// Plain SQL statements, replayable by any SQLite shell.
    /// Text that is not valid UTF-8 is stored lossily.
    Sql,
}

impl DumpFormat {
    /// File extension placed before `.gz`
    pub fn extension(&self) -> &'static str {
        match self {
            DumpFormat::Binary => "dump",
            DumpFormat::Sql => "sql",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DumpFormat::Binary => "binary",
            DumpFormat::Sql => "sql",
        }
    }

    /// Returns true if the format survives arbitrary byte values
    pub fn is_binary_safe(&self) -> bool {
        matches!(self, DumpFormat::Binary)
    }
}

impl fmt::Display for DumpFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DumpFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binary" => Ok(DumpFormat::Binary),
            "sql" => Ok(DumpFormat::Sql),
            other => Err(format!("unknown dump format '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(DumpFormat::Binary.extension(), "dump");
        assert_eq!(DumpFormat::Sql.extension(), "sql");
    }

    #[test]
    fn test_is_binary_safe() {
        assert!(DumpFormat::Binary.is_binary_safe());
        assert!(!DumpFormat::Sql.is_binary_safe());
    }

    #[test]
    fn test_default_is_binary() {
        assert_eq!(DumpFormat::default(), DumpFormat::Binary);
        assert_eq!("SQL".parse::<DumpFormat>(), Ok(DumpFormat::Sql));
    }
}
