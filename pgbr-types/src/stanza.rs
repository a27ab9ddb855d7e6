use std::fmt;

use crate::error::{Error, ErrorKind};

/// A named logical grouping identifying one PostgreSQL cluster in the
/// repository. All repository paths are rooted under `/<stanza>/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StanzaName(String);

impl StanzaName {
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::new(ErrorKind::OptionInvalidValue, "stanza name is empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::new(
                ErrorKind::OptionInvalidValue,
                format!("invalid stanza name '{name}'"),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StanzaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StanzaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
