//! Fixups: how shared and circular references travel over a tree format.
//!
//! A fixup `[target, source]` says "the node at `target` is the node already
//! found at `source`". Encoding emits them instead of writing a node twice (or
//! forever); decoding runs [`rewire`] over the incoming tree before any
//! structural decoding so the decoder then sees the shared nodes directly.

use crate::config::WireConfig;
use crate::error::FixupError;
use crate::wire::{WireArray, WireNode};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// One step of a path: a map key or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

impl PathStep {
    pub fn from_json(json: &serde_json::Value) -> Result<Self, FixupError> {
        PathStep::deserialize(json).map_err(|e| FixupError::InvalidStep {
            step: json.to_string(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Key(key) => write!(f, "{key:?}"),
            PathStep::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathStep {
    fn from(key: &str) -> Self {
        PathStep::Key(key.to_string())
    }
}

impl From<String> for PathStep {
    fn from(key: String) -> Self {
        PathStep::Key(key)
    }
}

impl From<usize> for PathStep {
    fn from(index: usize) -> Self {
        PathStep::Index(index)
    }
}

/// A path from the root of one tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(Vec<PathStep>);

impl Location {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, step: PathStep) {
        self.0.push(step);
    }

    pub fn pop(&mut self) -> Option<PathStep> {
        self.0.pop()
    }

    pub fn child(&self, step: PathStep) -> Location {
        let mut out = self.clone();
        out.push(step);
        out
    }

    /// True when `self` is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &Location) -> bool {
        other.0.starts_with(&self.0)
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self, FixupError> {
        let steps = json
            .as_array()
            .ok_or_else(|| FixupError::Malformed(format!("path is not an array: {json}")))?;
        steps
            .iter()
            .map(PathStep::from_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Location)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{step}")?;
        }
        f.write_str("]")
    }
}

impl<S: Into<PathStep>> FromIterator<S> for Location {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Location(iter.into_iter().map(Into::into).collect())
    }
}

/// `target` must end up holding the node found at `source`. Travels as the
/// pair `[fixupPath, originalPath]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Location, Location)", into = "(Location, Location)")]
pub struct Fixup {
    pub target: Location,
    pub source: Location,
}

impl Fixup {
    pub fn new(target: Location, source: Location) -> Self {
        Self { target, source }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self, FixupError> {
        match json.as_array().map(Vec::as_slice) {
            Some([target, source]) => Ok(Fixup {
                target: Location::from_json(target)?,
                source: Location::from_json(source)?,
            }),
            _ => Err(FixupError::Malformed(format!(
                "expected [fixupPath, originalPath], got {json}"
            ))),
        }
    }

    /// Parse the `fixups` member of a request or document.
    pub fn list_from_json(json: &serde_json::Value) -> Result<Vec<Self>, FixupError> {
        json.as_array()
            .ok_or_else(|| FixupError::Malformed(format!("fixups is not an array: {json}")))?
            .iter()
            .map(Fixup::from_json)
            .collect()
    }
}

impl From<(Location, Location)> for Fixup {
    fn from((target, source): (Location, Location)) -> Self {
        Fixup { target, source }
    }
}

impl From<Fixup> for (Location, Location) {
    fn from(fixup: Fixup) -> Self {
        (fixup.target, fixup.source)
    }
}

fn step_into(node: &WireNode, step: &PathStep, at: &Location) -> Result<WireNode, FixupError> {
    let found = match (node, step) {
        (WireNode::Object(obj), PathStep::Key(key)) => obj.get(key),
        (WireNode::Object(obj), PathStep::Index(index)) => obj.get(&index.to_string()),
        (WireNode::Array(arr), PathStep::Index(index)) => arr.get(*index),
        (WireNode::Array(arr), PathStep::Key(key)) => {
            let index = key.parse::<usize>().map_err(|_| FixupError::InvalidStep {
                step: key.clone(),
                reason: format!("{at} is an array"),
            })?;
            arr.get(index)
        }
        _ => {
            return Err(FixupError::NotAContainer {
                location: at.to_string(),
            })
        }
    };
    found.ok_or_else(|| FixupError::MissingNode {
        location: at.child(step.clone()).to_string(),
    })
}

/// Walk `path` from `root`.
pub fn traverse(root: &WireNode, path: &Location) -> Result<WireNode, FixupError> {
    let mut current = root.clone();
    let mut at = Location::new();
    for step in path.steps() {
        current = step_into(&current, step, &at)?;
        at.push(step.clone());
    }
    Ok(current)
}

fn set_slot(arr: &WireArray, index: usize, node: WireNode) -> Result<(), FixupError> {
    if arr.set(index, node) {
        Ok(())
    } else {
        Err(FixupError::InvalidStep {
            step: index.to_string(),
            reason: format!(
                "index is more than {} past the end of an array of {}",
                WireConfig::MAX_FIXUP_PADDING,
                arr.len()
            ),
        })
    }
}

/// Place the node found at `source` under the last step of `target`.
pub fn apply_fixup(root: &WireNode, target: &Location, source: &Location) -> Result<(), FixupError> {
    let (last, parents) = target.steps().split_last().ok_or(FixupError::EmptyPath)?;
    let shared = traverse(root, source)?;
    let parent_path: Location = parents.iter().cloned().collect();
    let parent = traverse(root, &parent_path)?;

    match (&parent, last) {
        (WireNode::Object(obj), PathStep::Key(key)) => obj.insert(key.clone(), shared),
        (WireNode::Object(obj), PathStep::Index(index)) => obj.insert(index.to_string(), shared),
        (WireNode::Array(arr), PathStep::Index(index)) => set_slot(arr, *index, shared)?,
        (WireNode::Array(arr), PathStep::Key(key)) => {
            let index = key.parse::<usize>().map_err(|_| FixupError::InvalidStep {
                step: key.clone(),
                reason: format!("{parent_path} is an array"),
            })?;
            set_slot(arr, index, shared)?;
        }
        _ => {
            return Err(FixupError::NotAContainer {
                location: parent_path.to_string(),
            })
        }
    }
    Ok(())
}

/// Apply every fixup in order, then hand the tree back for decoding.
pub fn rewire(root: WireNode, fixups: &[Fixup]) -> Result<WireNode, FixupError> {
    for fixup in fixups {
        debug!("Applying fixup {} <- {}", fixup.target, fixup.source);
        apply_fixup(&root, &fixup.target, &fixup.source)?;
    }
    Ok(root)
}
