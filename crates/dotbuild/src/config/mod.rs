use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "dotbuild.toml";

/// A loaded project document with `extends`/`imports` already inlined.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            value: Value::Table(Default::default()),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self> {
        let path = path.into();
        let value: Value = toml::from_str(text)
            .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;
        Ok(Self { path, value })
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::msg(format!("invalid config at [{}]: {e}", path)))?;
        Ok(Some(parsed))
    }

    /// Typed view of a section; an absent section yields its defaults.
    pub fn section<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T> {
        Ok(self.deserialize_path(path)?.unwrap_or_default())
    }

    /// Directory the document lives in; relative project paths resolve from here.
    pub fn base_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(over_tbl)) => {
            for (k, v) in over_tbl {
                if let Some(existing) = base_tbl.get_mut(&k) {
                    merge(existing, v);
                } else {
                    base_tbl.insert(k, v);
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn sibling_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        return p;
    }
    from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
}

fn take_imports(file: &Path, tbl: &mut toml::value::Table) -> Result<Vec<String>> {
    let Some(raw) = tbl.remove("imports") else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = raw else {
        return Err(Error::msg(format!(
            "'imports' in {} must be an array of strings",
            file.display()
        )));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Value::String(s) = item else {
            return Err(Error::msg(format!(
                "invalid imports entry in {} (expected string)",
                file.display()
            )));
        };
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

fn inline_imports(file: &Path, value: &mut Value, seen: &mut HashSet<PathBuf>) -> Result<()> {
    let Value::Table(tbl) = value else {
        return Ok(());
    };

    let imports = take_imports(file, tbl)?;
    if !imports.is_empty() {
        let mut acc = Value::Table(Default::default());
        for imp in imports {
            merge(&mut acc, load_file(&sibling_path(file, &imp), seen)?);
        }
        merge(&mut acc, Value::Table(std::mem::take(tbl)));
        if let Value::Table(merged) = acc {
            *tbl = merged;
        }
    }

    for (_, child) in tbl.iter_mut() {
        inline_imports(file, child, seen)?;
    }
    Ok(())
}

fn load_file(path: &Path, seen: &mut HashSet<PathBuf>) -> Result<Value> {
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(key.clone()) {
        return Err(Error::msg(format!(
            "config import cycle detected at {}",
            key.display()
        )));
    }

    let text = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&text)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

    let parent = match value.as_table_mut().and_then(|t| t.remove("extends")) {
        Some(Value::String(ext)) => load_file(&sibling_path(path, &ext), seen)?,
        Some(_) => {
            return Err(Error::msg(format!(
                "'extends' in {} must be a string",
                path.display()
            )));
        }
        None => Value::Table(Default::default()),
    };

    inline_imports(path, &mut value, seen)?;

    let mut out = parent;
    merge(&mut out, value);
    seen.remove(&key);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut seen = HashSet::new();
    let value = load_file(path, &mut seen)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

/// Like [`load`], but a missing file yields an empty document so every
/// section falls back to its defaults.
pub fn load_or_default(path: &Path) -> Result<ConfigDoc> {
    if path.exists() {
        load(path)
    } else {
        Ok(ConfigDoc::empty(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extends_and_imports_merge_with_local_keys_winning() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("base.toml"),
            "[build]\nname = \"Base\"\nvendor = \"Acme\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("firefox.toml"),
            "version = \"115.0\"\narchive_host = \"mirror.example\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("dotbuild.toml"),
            "extends = \"base.toml\"\n[build]\nname = \"Child\"\n[firefox]\nimports = [\"firefox.toml\"]\narchive_host = \"archive.mozilla.org\"\n",
        )
        .unwrap();

        let doc = load(&dir.path().join("dotbuild.toml")).expect("load");
        let name = doc.value_path("build.name").and_then(Value::as_str);
        let vendor = doc.value_path("build.vendor").and_then(Value::as_str);
        let version = doc.value_path("firefox.version").and_then(Value::as_str);
        let host = doc.value_path("firefox.archive_host").and_then(Value::as_str);
        assert_eq!(name, Some("Child"));
        assert_eq!(vendor, Some("Acme"));
        assert_eq!(version, Some("115.0"));
        assert_eq!(host, Some("archive.mozilla.org"));
        assert!(doc.value_path("firefox.imports").is_none());
    }

    #[test]
    fn import_cycles_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.toml"), "extends = \"b.toml\"\n").unwrap();
        fs::write(dir.path().join("b.toml"), "extends = \"a.toml\"\n").unwrap();

        let err = load(&dir.path().join("a.toml")).unwrap_err().to_string();
        assert!(err.contains("cycle"), "unexpected err: {err}");
    }

    #[test]
    fn missing_project_file_falls_back_to_empty_doc() {
        let dir = tempfile::tempdir().expect("tempdir");
        let doc = load_or_default(&dir.path().join(DEFAULT_CONFIG_FILE)).expect("doc");
        assert!(doc.value.as_table().is_some_and(|t| t.is_empty()));
        assert_eq!(doc.base_dir(), dir.path());
    }
}
