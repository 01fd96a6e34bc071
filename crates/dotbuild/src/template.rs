//! `{{key}}` placeholder substitution for configuration fragments.

use std::collections::BTreeMap;

/// Values substituted into fragment templates, built once per build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateOptions {
    values: BTreeMap<String, String>,
}

impl TemplateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Replace every `{{key}}` whose key is known. Unknown keys and malformed
/// braces are copied through untouched, and substituted text is never
/// scanned again.
pub fn render(template: &str, opts: &TemplateOptions) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = &after[..close];
        match opts.get(key) {
            Some(value) => {
                out.push_str(value);
                rest = &after[close + 2..];
            }
            None => {
                // Emit the opening braces literally and keep scanning after
                // them, so `{{{{name}}` still expands its inner placeholder.
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
