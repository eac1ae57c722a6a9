//! Validated host names.
//!
//! Compute nodes and targets live in the same namespace: a host that runs
//! workers can also be attacked by them. Both are addressed by `HostName`.

use std::borrow::Borrow;

use crate::NameError;

/// Name of a host in the network, e.g. `n00dles` or `home`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostName(String);

impl HostName {
    /// Parses a host name.
    ///
    /// The name must be non-empty and contain no whitespace or control
    /// characters.
    pub fn parse(s: &str) -> Result<Self, NameError> {
        if s.is_empty() {
            return Err(NameError::Empty);
        }

        if s.chars().any(char::is_whitespace) {
            return Err(NameError::Whitespace(s.to_string()));
        }

        if s.chars().any(char::is_control) {
            return Err(NameError::ControlCharacter(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HostName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for HostName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for HostName {
    type Error = NameError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl AsRef<str> for HostName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for HostName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for HostName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for HostName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Parses a comma-separated list of host names, skipping blanks.
pub fn parse_name_list(s: &str) -> Result<Vec<HostName>, NameError> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(HostName::parse)
        .collect()
}
