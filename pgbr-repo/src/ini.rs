use serde_json::Value;

use pgbr_types::{Error, ErrorKind};

/// An ordered INI document: sections and, within each, keys, kept in the
/// order they were parsed or inserted. Plain `Vec`s rather than a map
/// crate since write order is load-bearing for the checksum rendering
/// (spec'd grammar, not a generic config format, so nothing off-the-shelf
/// fits better than this).
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    sections: Vec<(String, Vec<(String, Value)>)>,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut doc = IniDocument::new();
        let mut current: Option<String> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                if !line.ends_with(']') {
                    return Err(Error::new(
                        ErrorKind::Format,
                        format!("line {}: unterminated section header", lineno + 1),
                    ));
                }
                let name = line[1..line.len() - 1].to_string();
                doc.ensure_section(&name);
                current = Some(name);
                continue;
            }
            let section = current.as_ref().ok_or_else(|| {
                Error::new(
                    ErrorKind::Format,
                    format!("line {}: key outside of any section", lineno + 1),
                )
            })?;
            let eq = line.find('=').ok_or_else(|| {
                Error::new(ErrorKind::Format, format!("line {}: missing '='", lineno + 1))
            })?;
            let key = line[..eq].trim();
            let value_str = line[eq + 1..].trim();
            if key.is_empty() {
                return Err(Error::new(
                    ErrorKind::Format,
                    format!("line {}: empty key", lineno + 1),
                ));
            }
            let value: Value = serde_json::from_str(value_str).map_err(|e| {
                Error::new(
                    ErrorKind::Format,
                    format!("line {}: invalid JSON value for '{}'", lineno + 1, key),
                )
                .with_source(e)
            })?;
            doc.set(section, key, value);
        }

        Ok(doc)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (section, entries) in &self.sections {
            out.push('[');
            out.push_str(section);
            out.push_str("]\n");
            for (key, value) in entries {
                out.push_str(key);
                out.push('=');
                out.push_str(&value.to_string());
                out.push('\n');
            }
        }
        out
    }

    fn ensure_section(&mut self, section: &str) {
        if !self.sections.iter().any(|(s, _)| s == section) {
            self.sections.push((section.to_string(), Vec::new()));
        }
    }

    pub fn set(&mut self, section: &str, key: &str, value: Value) {
        self.ensure_section(section);
        let (_, entries) = self
            .sections
            .iter_mut()
            .find(|(s, _)| s == section)
            .unwrap();
        if let Some(slot) = entries.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            entries.push((key.to_string(), value));
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.sections
            .iter()
            .find(|(s, _)| s == section)
            .and_then(|(_, entries)| entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v)
    }

    pub fn section(&self, name: &str) -> Option<&[(String, Value)]> {
        self.sections
            .iter()
            .find(|(s, _)| s == name)
            .map(|(_, entries)| entries.as_slice())
    }

    pub fn sections(&self) -> &[(String, Vec<(String, Value)>)] {
        &self.sections
    }

    /// Deterministic JSON rendering of every section/key in write order,
    /// optionally skipping one key (used to exclude the checksum itself
    /// while computing it). Hand-rolled instead of building a
    /// `serde_json::Value` tree because `serde_json::Map`'s default
    /// ordering is alphabetical, not insertion order.
    pub fn canonical_json(&self, skip: Option<(&str, &str)>) -> String {
        let mut out = String::from("{");
        for (i, (section, entries)) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&serde_json::to_string(section).unwrap());
            out.push(':');
            out.push('{');
            let mut first = true;
            for (key, value) in entries {
                if let Some((ss, sk)) = skip {
                    if section == ss && key == sk {
                        continue;
                    }
                }
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str(&serde_json::to_string(key).unwrap());
                out.push(':');
                out.push_str(&value.to_string());
            }
            out.push('}');
        }
        out.push('}');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_values() {
        let text = "# comment\n[db]\nhistory-id=1\nsystem-id=\"123\"\n\n[cipher]\ncipher-pass=\"x\"\n";
        let doc = IniDocument::parse(text).unwrap();
        assert_eq!(doc.get("db", "history-id"), Some(&Value::from(1)));
        assert_eq!(doc.get("cipher", "cipher-pass"), Some(&Value::from("x")));
    }

    #[test]
    fn rejects_key_outside_section() {
        let err = IniDocument::parse("key=1\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
    }

    #[test]
    fn rejects_missing_equals() {
        let err = IniDocument::parse("[a]\nnoequals\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
    }

    #[test]
    fn canonical_json_excludes_skipped_key() {
        let mut doc = IniDocument::new();
        doc.set("backrest", "backrest-format", Value::from(5));
        doc.set("backrest", "backrest-checksum", Value::from("deadbeef"));
        let json = doc.canonical_json(Some(("backrest", "backrest-checksum")));
        assert!(!json.contains("checksum"));
        assert!(json.contains("backrest-format"));
    }
}
