//! Repository configuration stored as a git-style INI file.
//!
//! ```text
//! [user]
//!     name = Jane
//! [remote "origin"]
//!     url = https://example.com/repo.git
//! ```
//!
//! Keys are addressed with dotted names: `user.name`, `remote.origin.url`.

use crate::{ByteStorage, Result, StorageError};
use std::sync::Arc;

/// Path of the config file in the repository storage.
pub const CONFIG_PATH: &str = "config";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    subsection: Option<String>,
    entries: Vec<(String, String)>,
}

impl Section {
    fn matches(&self, name: &str, subsection: Option<&str>) -> bool {
        self.name.eq_ignore_ascii_case(name) && self.subsection.as_deref() == subsection
    }
}

/// Parsed repository configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoConfig {
    sections: Vec<Section>,
}

/// Splits `section[.subsection].key`.
fn split_key(key: &str) -> Result<(&str, Option<&str>, &str)> {
    let (section, rest) = key
        .split_once('.')
        .ok_or_else(|| StorageError::InvalidConfig(format!("key without section: {}", key)))?;
    let (subsection, name) = match rest.rsplit_once('.') {
        Some((sub, name)) => (Some(sub), name),
        None => (None, rest),
    };
    if section.is_empty() || name.is_empty() {
        return Err(StorageError::InvalidConfig(format!("invalid key: {}", key)));
    }
    Ok((section, subsection, name))
}

impl RepoConfig {
    /// Parses config text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut sections: Vec<Section> = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[') {
                let header = header.strip_suffix(']').ok_or_else(|| {
                    StorageError::InvalidConfig(format!("line {}: unterminated section", lineno + 1))
                })?;
                let (name, subsection) = match header.split_once(' ') {
                    Some((name, sub)) => {
                        let sub = sub.trim().trim_matches('"').to_string();
                        (name.trim().to_string(), Some(sub))
                    }
                    None => (header.trim().to_string(), None),
                };
                sections.push(Section {
                    name,
                    subsection,
                    entries: Vec::new(),
                });
                continue;
            }
            let section = sections.last_mut().ok_or_else(|| {
                StorageError::InvalidConfig(format!("line {}: entry outside a section", lineno + 1))
            })?;
            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (line, "true"),
            };
            section
                .entries
                .push((key.to_string(), value.trim_matches('"').to_string()));
        }
        Ok(Self { sections })
    }

    /// Loads the config from storage; a missing file is an empty config.
    pub fn load(storage: &Arc<dyn ByteStorage>) -> Result<Self> {
        if !storage.is_file(CONFIG_PATH) {
            return Ok(Self::default());
        }
        let bytes = storage.read_file(CONFIG_PATH)?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| StorageError::InvalidConfig("config is not utf-8".to_string()))?;
        Self::parse(text)
    }

    /// Writes the config to storage.
    pub fn save(&self, storage: &Arc<dyn ByteStorage>) -> Result<()> {
        storage.put_contents(CONFIG_PATH, self.to_string().as_bytes())
    }

    /// Looks up a dotted key; the last assignment wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        let (section, subsection, name) = split_key(key).ok()?;
        self.sections
            .iter()
            .filter(|s| s.matches(section, subsection))
            .flat_map(|s| s.entries.iter())
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .last()
    }

    /// Sets a dotted key, replacing an existing value or appending one.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let (section, subsection, name) = split_key(key)?;
        let existing = self
            .sections
            .iter_mut()
            .filter(|s| s.matches(section, subsection))
            .flat_map(|s| s.entries.iter_mut())
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .last();
        if let Some((_, v)) = existing {
            *v = value.to_string();
            return Ok(());
        }

        let position = self
            .sections
            .iter()
            .position(|s| s.matches(section, subsection));
        let pos = match position {
            Some(pos) => pos,
            None => {
                self.sections.push(Section {
                    name: section.to_string(),
                    subsection: subsection.map(str::to_string),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        self.sections[pos]
            .entries
            .push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Registers (or re-points) a remote.
    pub fn add_remote(&mut self, name: &str, url: &str) -> Result<()> {
        self.set(&format!("remote.{}.url", name), url)
    }

    /// Returns a remote's URL.
    pub fn remote_url(&self, name: &str) -> Option<&str> {
        self.get(&format!("remote.{}.url", name))
    }

    /// Lists configured remotes in file order.
    pub fn remotes(&self) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|s| s.name.eq_ignore_ascii_case("remote"))
            .filter_map(|s| s.subsection.as_deref())
            .collect()
    }
}

impl std::fmt::Display for RepoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for section in &self.sections {
            match &section.subsection {
                Some(sub) => writeln!(f, "[{} \"{}\"]", section.name, sub)?,
                None => writeln!(f, "[{}]", section.name)?,
            }
            for (key, value) in &section.entries {
                writeln!(f, "    {} = {}", key, value)?;
            }
        }
        Ok(())
    }
}
