//! The card layout document: the declarative description of a card's file
//! system that drives `read-all` and `markup`.
//!
//! Deserialization is handled entirely by `serde_json` — this module only
//! adds the structural validation the format needs beyond what a schema-less
//! JSON parse gives for free.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ReaderError;
use crate::hex;

/// The four elementary file types ISO 7816-4 distinguishes for our
/// purposes. `Cyclic` has no counterpart in the original traversal engine
/// but is accepted and read as a linear-fixed structure read oldest-first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EfType {
    Df,
    Transparent,
    LinearFixed,
    Cyclic,
}

/// How to derive the card's serial number: either a literal APDU to send,
/// or an EF to select and read.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerialSpec {
    /// Hex-encoded C-APDU. Takes priority over `ef_path` when both are set.
    pub apdu: Option<String>,
    pub ef_path: Vec<String>,
    pub ef_type: Option<EfType>,
    pub size: usize,
}

/// One node in the card's file-system tree.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Node {
    pub name: String,
    pub fid: String,
    #[serde(rename = "type")]
    pub node_type: EfType,
    pub size: usize,
    pub record_size: usize,
    pub record_count: usize,
    pub save_as: Option<String>,
    /// Hex-encoded APDUs run, in order, against a freshly-selected EF
    /// before `markup` re-selects it by FID.
    pub create_apdus: Vec<String>,
    pub children: Vec<Node>,
}

impl Default for Node {
    fn default() -> Self {
        Node {
            name: String::new(),
            fid: String::new(),
            node_type: EfType::Df,
            size: 0,
            record_size: 0,
            record_count: 0,
            save_as: None,
            create_apdus: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl Node {
    /// Decodes [`Node::fid`] into its 16-bit value.
    ///
    /// # Errors
    /// Propagates [`hex::parse_fid`]'s errors.
    pub fn fid_value(&self) -> Result<u16, ReaderError> {
        hex::parse_fid(&self.fid)
    }
}

/// The `card` object nested at the top of a layout document: its name, the
/// ATR it's expected to present, and how to resolve its serial number.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Card {
    pub name: String,
    pub atr_expected: Option<String>,
    pub serial: SerialSpec,
}

/// A fully parsed card layout document.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub schema: String,
    #[serde(default)]
    pub card: Card,
    pub root: Node,
}

impl Layout {
    /// Parses and validates a layout document from its JSON text.
    ///
    /// # Errors
    /// Returns [`ReaderError::LayoutInvalid`] for malformed JSON or a
    /// document that fails [`Layout::validate`].
    pub fn from_json(text: &str) -> Result<Self, ReaderError> {
        let layout: Layout = serde_json::from_str(text)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Reads, parses and validates a layout document from disk.
    ///
    /// # Errors
    /// Propagates [`std::io::Error`] via [`ReaderError::FileIo`], and
    /// [`Layout::from_json`]'s errors.
    pub fn from_path(path: &Path) -> Result<Self, ReaderError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Checks the structural invariants the traversal engine relies on:
    /// the root must be a DF, every FID (including the root's) must decode
    /// as two hex bytes, and every `Transparent`/`LinearFixed`/`Cyclic`
    /// node must declare a non-zero size.
    ///
    /// # Errors
    /// Returns [`ReaderError::LayoutInvalid`] describing the first
    /// violation found.
    pub fn validate(&self) -> Result<(), ReaderError> {
        if self.root.node_type != EfType::Df {
            return Err(ReaderError::LayoutInvalid(
                "layout root must be of type Df".to_string(),
            ));
        }
        self.root.fid_value()?;
        validate_node(&self.root)
    }
}

fn validate_node(node: &Node) -> Result<(), ReaderError> {
    node.fid_value()?;
    match node.node_type {
        EfType::Df => {
            for child in &node.children {
                validate_node(child)?;
            }
        }
        EfType::Transparent => {
            if node.size == 0 {
                return Err(ReaderError::LayoutInvalid(format!(
                    "EF '{}' (fid {}) is Transparent but declares size 0",
                    node.name, node.fid
                )));
            }
        }
        EfType::LinearFixed | EfType::Cyclic => {
            if node.record_size == 0 || node.record_count == 0 {
                return Err(ReaderError::LayoutInvalid(format!(
                    "EF '{}' (fid {}) declares recordSize/recordCount of 0",
                    node.name, node.fid
                )));
            }
        }
    }
    for apdu in &node.create_apdus {
        hex::hex_to_bytes(apdu)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(root_type: &str, size: usize) -> String {
        format!(
            r#"{{
                "schema": "rik2/1",
                "card": {{ "name": "test", "atrExpected": null, "serial": {{}} }},
                "root": {{
                    "name": "MF",
                    "fid": "3F00",
                    "type": "{root_type}",
                    "children": [
                        {{
                            "name": "EF.DATA",
                            "fid": "2F01",
                            "type": "transparent",
                            "size": {size}
                        }}
                    ]
                }}
            }}"#
        )
    }

    #[test]
    fn accepts_a_well_formed_layout() {
        let layout = Layout::from_json(&sample("df", 16)).unwrap();
        assert_eq!(layout.root.children.len(), 1);
    }

    #[test]
    fn rejects_non_df_root() {
        let err = Layout::from_json(&sample("transparent", 16)).unwrap_err();
        assert!(matches!(err, ReaderError::LayoutInvalid(_)));
    }

    #[test]
    fn rejects_zero_size_transparent_ef() {
        let err = Layout::from_json(&sample("df", 0)).unwrap_err();
        assert!(matches!(err, ReaderError::LayoutInvalid(_)));
    }
}
