//! Dotted-path attribute index (`masses.mass_200crit`, `ids.id`, ...).
//!
//! Member names of the properties shards are split on `.` into a tree so a
//! path can be resolved one segment at a time, and so a partial path (a
//! section such as `masses`) can list what lives under it.

use anyhow::{Result, bail};
use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::error::TraceError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Leaf,
    Section(BTreeMap<String, Node>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeIndex {
    root: BTreeMap<String, Node>,
}

type Segments<'a> = SmallVec<[&'a str; 4]>;

fn split_path(path: &str) -> Segments<'_> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

impl AttributeIndex {
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root: BTreeMap<String, Node> = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            let segs = split_path(name);
            let Some((last, parents)) = segs.split_last() else {
                continue;
            };
            let mut level = &mut root;
            for &seg in parents {
                let node = level
                    .entry(seg.to_string())
                    .or_insert_with(|| Node::Section(BTreeMap::new()));
                level = match node {
                    Node::Section(children) => children,
                    Node::Leaf => bail!(TraceError::config(format!(
                        "attribute {name:?} nests under a value attribute {seg:?}"
                    ))),
                };
            }
            if let Some(Node::Section(_)) = level.get(*last) {
                bail!(TraceError::config(format!(
                    "attribute {name:?} is also a section name"
                )));
            }
            level.insert(last.to_string(), Node::Leaf);
        }
        Ok(AttributeIndex { root })
    }

    /// Normalised member name for a leaf path.
    pub fn resolve(&self, path: &str) -> Result<String> {
        let segs = split_path(path);
        if segs.is_empty() {
            bail!(TraceError::config("empty attribute path"));
        }
        let mut level = &self.root;
        for (depth, &seg) in segs.iter().enumerate() {
            let last = depth + 1 == segs.len();
            match (level.get(seg), last) {
                (Some(Node::Leaf), true) => return Ok(segs.join(".")),
                (Some(Node::Section(children)), false) => level = children,
                (Some(Node::Section(children)), true) => bail!(TraceError::config(format!(
                    "{path:?} is a section, not a value (contains: {})",
                    children.keys().cloned().collect::<Vec<_>>().join(", ")
                ))),
                (Some(Node::Leaf), false) | (None, _) => bail!(TraceError::config(format!(
                    "no catalogue attribute {path:?} (unknown segment {seg:?})"
                ))),
            }
        }
        bail!(TraceError::config(format!("no catalogue attribute {path:?}")))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    /// Every leaf path, sorted.
    pub fn paths(&self) -> Vec<String> {
        fn walk(level: &BTreeMap<String, Node>, prefix: &str, out: &mut Vec<String>) {
            for (name, node) in level {
                let full = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                match node {
                    Node::Leaf => out.push(full),
                    Node::Section(children) => walk(children, &full, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, "", &mut out);
        out
    }
}
