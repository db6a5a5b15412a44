use crate::Error;
use core::fmt;
use core::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Section {
    //read-only boot code, verifies and hands over to RW
    Ro,
    //updatable application firmware, holds the pairing key
    Rw,
}

impl Section {
    /// FMAP area holding the section's code.
    pub fn area(self) -> &'static str {
        match self {
            Section::Ro => "EC_RO",
            Section::Rw => "EC_RW",
        }
    }

    /// FMAP area holding the section's version string.
    pub fn version_area(self) -> &'static str {
        match self {
            Section::Ro => "RO_FRID",
            Section::Rw => "RW_FWID",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Ro => f.write_str("RO"),
            Section::Rw => f.write_str("RW"),
        }
    }
}

impl FromStr for Section {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ro" => Ok(Section::Ro),
            "rw" => Ok(Section::Rw),
            _ => Err(Error::Malformed),
        }
    }
}
