//! Per-type attribute allow-lists and identifier rules for generated scripts.

use crate::AttrValue;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use thiserror::Error;

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").ok());

/// Whether `value` is safe to interpolate as a node name or type.
pub fn is_identifier(value: &str) -> bool {
    IDENTIFIER.as_ref().is_some_and(|re| re.is_match(value))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Invalid {kind}: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },
    #[error("Attribute '{attr}' is not allowed on {class} nodes")]
    UnknownAttribute { class: String, attr: String },
    #[error("Attribute '{attr}' has a non-finite value")]
    NonFiniteValue { attr: String },
}

const BUILTIN: &[(&str, &[&str])] = &[
    (
        "Read",
        &["file", "first", "last", "origfirst", "origlast", "frame_mode", "frame"],
    ),
    ("Write", &["file", "file_type", "first", "last", "use_limit"]),
    ("Merge2", &["operation", "mix", "screen_alpha", "bbox"]),
    (
        "ColorCorrect",
        &["saturation", "contrast", "gamma", "gain", "offset"],
    ),
    (
        "Grade",
        &["whitepoint", "blackpoint", "white", "black", "multiply", "add", "gamma"],
    ),
    (
        "Transform",
        &["translate", "rotate", "scale", "skewX", "skewY", "center"],
    ),
    ("Blur", &["size", "filter", "quality", "crop"]),
    ("Constant", &["color", "format"]),
    ("Keyer", &["operation", "range"]),
    ("FilterErode", &["size", "filter"]),
    ("Premult", &["alpha"]),
    ("Gamma", &["value"]),
    ("Viewer", &[]),
];

const COMMON: &[&str] = &["label", "note", "selected", "xpos", "ypos"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeCatalog {
    types: BTreeMap<String, BTreeSet<String>>,
    common: BTreeSet<String>,
}

impl Default for AttributeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AttributeCatalog {
    pub fn builtin() -> Self {
        let types = BUILTIN
            .iter()
            .map(|(class, attrs)| {
                (
                    class.to_string(),
                    attrs.iter().map(|a| a.to_string()).collect(),
                )
            })
            .collect();
        Self {
            types,
            common: COMMON.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Extend or add a node type.
    pub fn with_type<I, S>(mut self, class: &str, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types
            .entry(class.to_string())
            .or_default()
            .extend(attrs.into_iter().map(Into::into));
        self
    }

    pub fn knows_type(&self, class: &str) -> bool {
        self.types.contains_key(class)
    }

    /// Unknown types only accept the common attributes.
    pub fn is_allowed(&self, class: &str, attr: &str) -> bool {
        self.common.contains(attr)
            || self
                .types
                .get(class)
                .is_some_and(|attrs| attrs.contains(attr))
    }

    pub fn allowed(&self, class: &str) -> Vec<&str> {
        let mut attrs: Vec<&str> = self
            .types
            .get(class)
            .into_iter()
            .flatten()
            .chain(self.common.iter())
            .map(String::as_str)
            .collect();
        attrs.sort_unstable();
        attrs.dedup();
        attrs
    }

    pub fn check_identifier(kind: &'static str, value: &str) -> Result<(), CatalogError> {
        if is_identifier(value) {
            Ok(())
        } else {
            Err(CatalogError::InvalidIdentifier {
                kind,
                value: value.to_string(),
            })
        }
    }

    /// Check every attribute of `attrs` against the allow-list for `class`.
    pub fn check(
        &self,
        class: &str,
        attrs: &BTreeMap<String, AttrValue>,
    ) -> Result<(), CatalogError> {
        Self::check_identifier("node type", class)?;
        for (attr, value) in attrs {
            if !self.is_allowed(class, attr) {
                return Err(CatalogError::UnknownAttribute {
                    class: class.to_string(),
                    attr: attr.clone(),
                });
            }
            let finite = match value {
                AttrValue::Float(v) => v.is_finite(),
                AttrValue::List(items) => items.iter().all(|v| v.is_finite()),
                _ => true,
            };
            if !finite {
                return Err(CatalogError::NonFiniteValue { attr: attr.clone() });
            }
        }
        Ok(())
    }
}
