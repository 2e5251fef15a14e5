use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamEntry {
    pub name: String,
    pub value: f32,
    #[serde(default)]
    pub default_value: Option<f32>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub options: String,
    #[serde(default)]
    pub desc: String,
}

impl ParamEntry {
    pub fn new(name: impl Into<String>, value: f32) -> Self {
        Self {
            name: name.into(),
            value,
            default_value: None,
            unit: String::new(),
            options: String::new(),
            desc: String::new(),
        }
    }
}

/// Descriptive data for a parameter, keyed by name in a metadata file:
///
/// ```toml
/// [ARMING_CHECK]
/// default = 1
/// desc = "Checks prior to arming motor"
/// options = "0:Disabled,1:Enabled"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParamMeta {
    pub default: Option<f32>,
    pub unit: Option<String>,
    pub options: Option<String>,
    pub desc: Option<String>,
}

pub fn load_metadata(path: &str) -> Result<HashMap<String, ParamMeta>> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read param metadata {}", path))?;
    parse_metadata(&s)
}

pub fn parse_metadata(s: &str) -> Result<HashMap<String, ParamMeta>> {
    toml::from_str(s).context("parse param metadata toml")
}

/// Name-unique parameter store. Keeps vehicle order for display.
#[derive(Debug, Clone, Default)]
pub struct ParamTable {
    params: Vec<ParamEntry>,
    index: HashMap<String, usize>,
    meta: HashMap<String, ParamMeta>,
    loaded: bool,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk replace. Duplicate names collapse to the last occurrence.
    pub fn set_all(&mut self, list: Vec<ParamEntry>) {
        self.params.clear();
        self.index.clear();
        for p in list {
            self.upsert(p);
        }
        self.loaded = true;
    }

    /// Inserts or fully replaces an entry. Returns true if the name was new.
    pub fn upsert(&mut self, mut entry: ParamEntry) -> bool {
        if let Some(m) = self.meta.get(&entry.name) {
            merge_meta(&mut entry, m);
        }
        match self.index.get(&entry.name) {
            Some(&i) => {
                self.params[i] = entry;
                false
            }
            None => {
                self.index.insert(entry.name.clone(), self.params.len());
                self.params.push(entry);
                true
            }
        }
    }

    /// Value report from the vehicle: keeps any descriptive fields already known.
    pub fn upsert_value(&mut self, name: &str, value: f32) -> bool {
        if self.set_value(name, value) {
            return false;
        }
        self.upsert(ParamEntry::new(name, value))
    }

    /// Optimistic local update. False if the name is unknown.
    pub fn set_value(&mut self, name: &str, value: f32) -> bool {
        match self.index.get(name) {
            Some(&i) => {
                self.params[i].value = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamEntry> {
        self.index.get(name).map(|&i| &self.params[i])
    }

    /// Case-insensitive match on name, description, options or value.
    /// An empty needle returns everything.
    pub fn filter(&self, needle: &str) -> Vec<&ParamEntry> {
        if needle.is_empty() {
            return self.params.iter().collect();
        }
        let needle = needle.to_lowercase();
        self.params
            .iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&needle)
                    || p.desc.to_lowercase().contains(&needle)
                    || p.options.to_lowercase().contains(&needle)
                    || p.value.to_string().contains(&needle)
            })
            .collect()
    }

    /// Installs metadata and merges it into entries already present.
    pub fn apply_metadata(&mut self, meta: HashMap<String, ParamMeta>) -> usize {
        let mut n = 0;
        for p in self.params.iter_mut() {
            if let Some(m) = meta.get(&p.name) {
                merge_meta(p, m);
                n += 1;
            }
        }
        self.meta = meta;
        n
    }

    pub fn clear(&mut self) {
        self.params.clear();
        self.index.clear();
        self.loaded = false;
    }

    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamEntry> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

fn merge_meta(p: &mut ParamEntry, m: &ParamMeta) {
    if m.default.is_some() {
        p.default_value = m.default;
    }
    if let Some(u) = &m.unit {
        p.unit = u.clone();
    }
    if let Some(o) = &m.options {
        p.options = o.clone();
    }
    if let Some(d) = &m.desc {
        p.desc = d.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ParamTable {
        let mut t = ParamTable::new();
        let mut rtl = ParamEntry::new("RTL_ALT", 1500.0);
        rtl.desc = "Return-to-Launch altitude".into();
        rtl.unit = "cm".into();
        t.set_all(vec![
            ParamEntry::new("ARMING_CHECK", 1.0),
            rtl,
            ParamEntry::new("FS_THR_ENABLE", 1.0),
        ]);
        t
    }

    #[test]
    fn set_all_collapses_duplicates() {
        let mut t = ParamTable::new();
        t.set_all(vec![
            ParamEntry::new("A", 1.0),
            ParamEntry::new("B", 2.0),
            ParamEntry::new("A", 3.0),
        ]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.get("A").unwrap().value, 3.0);
        assert!(t.is_loaded());
    }

    #[test]
    fn set_value_only_touches_known_names() {
        let mut t = table();
        assert!(t.set_value("RTL_ALT", 2000.0));
        assert!(!t.set_value("NOPE", 1.0));
        assert_eq!(t.get("RTL_ALT").unwrap().value, 2000.0);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn upsert_value_keeps_description() {
        let mut t = table();
        assert!(!t.upsert_value("RTL_ALT", 3000.0));
        let p = t.get("RTL_ALT").unwrap();
        assert_eq!(p.value, 3000.0);
        assert_eq!(p.unit, "cm");
        assert!(t.upsert_value("NEW_PARAM", 4.0));
        assert_eq!(t.iter().last().unwrap().name, "NEW_PARAM");
    }

    #[test]
    fn filter_matches_name_desc_and_value() {
        let t = table();
        assert_eq!(t.filter("").len(), 3);
        assert_eq!(t.filter("rtl").len(), 1);
        assert_eq!(t.filter("launch")[0].name, "RTL_ALT");
        assert_eq!(t.filter("1500").len(), 1);
        assert!(t.filter("compass").is_empty());
    }

    #[test]
    fn metadata_merges_now_and_later() {
        let mut t = table();
        let meta = parse_metadata(
            r#"
            [ARMING_CHECK]
            default = 1
            options = "0:Disabled,1:Enabled"

            [BATT_CAPACITY]
            unit = "mAh"
            "#,
        )
        .unwrap();
        assert_eq!(t.apply_metadata(meta), 1);
        assert_eq!(t.get("ARMING_CHECK").unwrap().default_value, Some(1.0));

        t.upsert_value("BATT_CAPACITY", 5200.0);
        assert_eq!(t.get("BATT_CAPACITY").unwrap().unit, "mAh");
    }

    #[test]
    fn clear_resets_loaded() {
        let mut t = table();
        t.clear();
        assert!(t.is_empty());
        assert!(!t.is_loaded());
        assert!(t.get("RTL_ALT").is_none());
    }
}
