use std::collections::HashMap;

use crate::error::{Error, Result};

/// Key/value dictionary backing `{key}` expansion.
///
/// Two layers: a sealed base holding command-line pairs, dictionary-file
/// entries, and the synthesized `config`/`ccprefix` keys; and a growable
/// layer fed by `<dict>` elements while the document is traversed. Document
/// inserts never shadow a sealed key; the attempt is silently dropped and
/// the sealed value stays in force.
#[derive(Debug, Clone, Default)]
pub struct SubstMap {
    sealed: HashMap<String, String>,
    doc: HashMap<String, String>,
}

impl SubstMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert into the sealed base. Seeding happens in CLI order, so a
    /// later sealed insert replaces an earlier one.
    pub fn seal(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.sealed.insert(key.into(), value.into());
    }

    /// Insert a document-supplied entry. Returns false when the key is
    /// sealed and the insert was dropped.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.sealed.contains_key(&key) {
            return false;
        }
        self.doc.insert(key, value.into());
        true
    }

    /// Insert only when the key is not yet bound anywhere. Include-time
    /// dictionary folding uses this, which is what gives command-line and
    /// `-i` entries strict priority.
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if self.get(&key).is_none() {
            self.doc.insert(key, value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.doc
            .get(key)
            .or_else(|| self.sealed.get(key))
            .map(String::as_str)
    }

    /// Expand every `{key}` token in `input`. Unknown keys and unbalanced
    /// braces are substitution errors.
    pub fn expand(&self, input: &str) -> Result<String> {
        if !input.contains('{') && !input.contains('}') {
            return Ok(input.to_string());
        }
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        loop {
            match rest.find(|c| c == '{' || c == '}') {
                None => {
                    out.push_str(rest);
                    return Ok(out);
                }
                Some(pos) if rest.as_bytes()[pos] == b'}' => {
                    return Err(Error::Substitution(format!(
                        "unbalanced braces in `{input}`"
                    )));
                }
                Some(pos) => {
                    out.push_str(&rest[..pos]);
                    rest = &rest[pos + 1..];
                    let end = rest.find('}').ok_or_else(|| {
                        Error::Substitution(format!("unbalanced braces in `{input}`"))
                    })?;
                    let key = &rest[..end];
                    if key.is_empty() || key.contains('{') {
                        return Err(Error::Substitution(format!(
                            "malformed token in `{input}`"
                        )));
                    }
                    let value = self.get(key).ok_or_else(|| {
                        Error::Substitution(format!("key {{{key}}} not defined"))
                    })?;
                    out.push_str(value);
                    rest = &rest[end + 1..];
                }
            }
        }
    }

}
