//! Step-descriptor model shared by the engine and front ends.
//!
//! A playbook is an ordered list of step descriptors. Each descriptor is a
//! mapping from attribute name to YAML value; a fixed set of *reserved* keys
//! carries control flow (conditions, loops, concurrency, templates), and the
//! first non-reserved key with a defined value names the tag to construct.
//! Authoring order is preserved (via [`IndexMap`]) because the tag scan is an
//! ordered scan.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved descriptor keys that never name a tag.
///
/// `<-` merges previously exported template properties, `->` exports the
/// resolved properties for later inheritance. Everything else is a control
/// attribute consumed by the interpreter.
pub const RESERVED_KEYS: &[&str] = &[
    "<-",
    "->",
    "template",
    "if",
    "elseif",
    "else",
    "force",
    "debug",
    "vars",
    "globals",
    "async",
    "detach",
    "loop",
    "name",
    "id",
    "skip",
    "only",
    "include",
    "runs",
    "skip_next",
    "pre_vars",
    "post_vars",
];

/// Marker prefix meaning "run this key's step asynchronously".
pub const ASYNC_PREFIX: char = '~';

/// One step descriptor: an ordered attribute map parsed from the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct StepDescriptor(pub IndexMap<String, Value>);

impl StepDescriptor {
    /// Returns the attribute value for `key`, treating YAML `null` as present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true when `key` is present with a non-null value.
    pub fn has(&self, key: &str) -> bool {
        matches!(self.get(key), Some(value) if !value.is_null())
    }

    /// Removes and returns the attribute value for `key`.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    /// Rewrites `~key` shorthand to `key` plus `async: true`.
    ///
    /// The rewrite keeps the key at its original position so the tag scan
    /// still sees keys in authoring order.
    pub fn normalize_async_shorthand(&mut self) {
        let prefixed: Vec<String> = self
            .0
            .keys()
            .filter(|key| key.starts_with(ASYNC_PREFIX))
            .cloned()
            .collect();
        if prefixed.is_empty() {
            return;
        }
        for old_key in prefixed {
            let new_key = old_key[ASYNC_PREFIX.len_utf8()..].to_string();
            if let Some(index) = self.0.get_index_of(&old_key) {
                let value = self.0.shift_remove(&old_key).unwrap_or(Value::Null);
                self.0.shift_insert(index, new_key, value);
            }
        }
        self.0.insert("async".to_string(), Value::Bool(true));
    }

    /// Returns the first non-reserved key, in authoring order. This is the
    /// tag name; `None` means the step is a synthetic `vars` or `base` step.
    /// A null value still names a tag (`- exit:` is a valid step).
    pub fn tag_name(&self) -> Option<&str> {
        self.0
            .keys()
            .find(|key| !RESERVED_KEYS.contains(&key.as_str()))
            .map(String::as_str)
    }

    /// True when the descriptor is marked as a reusable template.
    pub fn is_template(&self) -> bool {
        matches!(self.get("template"), Some(Value::Bool(true)))
    }

    /// True when the descriptor opts into an `only`-filtered pass.
    pub fn is_only(&self) -> bool {
        matches!(self.get("only"), Some(Value::Bool(true)))
    }

    /// True when the descriptor is excluded from the pass.
    pub fn is_skipped(&self) -> bool {
        matches!(self.get("skip"), Some(Value::Bool(true)))
    }

    /// Merges `defaults` into this descriptor; existing keys win.
    pub fn merge_defaults(&mut self, defaults: &IndexMap<String, Value>) {
        for (key, value) in defaults {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }
}

/// A playbook document: either a bare step list or a manifest with metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PlaybookDocument {
    /// `- echo: hello` style documents.
    Steps(Vec<StepDescriptor>),
    /// Full manifest with name/password/vars around the run list.
    Manifest(PlaybookManifest),
}

impl PlaybookDocument {
    /// Normalizes either shape into a manifest.
    pub fn into_manifest(self) -> PlaybookManifest {
        match self {
            PlaybookDocument::Steps(runs) => PlaybookManifest {
                runs,
                ..PlaybookManifest::default()
            },
            PlaybookDocument::Manifest(manifest) => manifest,
        }
    }
}

/// Manifest wrapper around a run list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybookManifest {
    /// Optional display name for the playbook.
    #[serde(default)]
    pub name: Option<String>,
    /// Password gating the compiled artifact. Present means "compile after
    /// the first successful plain run".
    #[serde(default)]
    pub password: Option<String>,
    /// Variables declared inline; lowest bootstrap priority.
    #[serde(default)]
    pub vars: Option<Value>,
    /// Path to an external YAML/JSON variables file; overrides `vars`.
    #[serde(default)]
    pub vars_file: Option<String>,
    /// Ordered steps to interpret.
    #[serde(default)]
    pub runs: Vec<StepDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor_from_yaml(source: &str) -> StepDescriptor {
        serde_yaml::from_str(source).expect("descriptor parses")
    }

    #[test]
    fn tag_scan_skips_reserved_keys_in_order() {
        let descriptor = descriptor_from_yaml("{name: first, if: true, echo: hi, sleep: 1s}");
        assert_eq!(descriptor.tag_name(), Some("echo"));
    }

    #[test]
    fn tag_scan_accepts_null_valued_tags() {
        let descriptor = descriptor_from_yaml("{name: bare, echo: null}");
        assert_eq!(descriptor.tag_name(), Some("echo"));
    }

    #[test]
    fn async_shorthand_rewrites_key_and_sets_flag() {
        let mut descriptor = descriptor_from_yaml("{~echo: hi}");
        descriptor.normalize_async_shorthand();
        assert_eq!(descriptor.get("echo"), Some(&json!("hi")));
        assert_eq!(descriptor.get("async"), Some(&json!(true)));
        assert_eq!(descriptor.tag_name(), Some("echo"));
    }

    #[test]
    fn bare_list_and_manifest_both_parse() {
        let bare: PlaybookDocument = serde_yaml::from_str("- echo: hi\n- echo: there").expect("bare list");
        assert_eq!(bare.into_manifest().runs.len(), 2);

        let manifest: PlaybookDocument = serde_yaml::from_str("name: demo\nruns:\n  - echo: hi").expect("manifest");
        let manifest = manifest.into_manifest();
        assert_eq!(manifest.name.as_deref(), Some("demo"));
        assert_eq!(manifest.runs.len(), 1);
    }

    #[test]
    fn merge_defaults_prefers_own_keys() {
        let mut descriptor = descriptor_from_yaml("{echo: mine}");
        let mut defaults = IndexMap::new();
        defaults.insert("echo".to_string(), json!("theirs"));
        defaults.insert("name".to_string(), json!("inherited"));
        descriptor.merge_defaults(&defaults);
        assert_eq!(descriptor.get("echo"), Some(&json!("mine")));
        assert_eq!(descriptor.get("name"), Some(&json!("inherited")));
    }
}
