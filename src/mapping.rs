use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Old numeric sprite ids mapped to their replacement names.
///
/// Keys stay textual so `007` and `7` are distinct entries and nothing is lost
/// to integer parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpriteMap {
    entries: HashMap<String, String>,
}

impl SpriteMap {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for SpriteMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub fn load_sprite_map(path: &Path) -> Result<SpriteMap> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading mapping file {}", path.display()))?;
    Ok(parse_sprite_map(&raw))
}

/// Parses `key-value` lines. Blank lines, `#` comments and lines without a
/// `-` are skipped; a repeated key keeps its last value.
pub fn parse_sprite_map(raw: &str) -> SpriteMap {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('-'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}
