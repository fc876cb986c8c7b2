//! Per-call identity tracker.
//!
//! Records every object (encode side) or container node (decode side) seen
//! during one marshal or unmarshal call. Encoding keeps a stack of the
//! current location so a repeated object can be classified as circular (its
//! record is on the open path) or merely duplicated, and so fixups can name
//! both ends. Records sit in an arena and point at their parent by index.

use crate::codec::ObjectMatch;
use crate::error::{MarshalError, UnmarshalError};
use crate::fixup::{Fixup, Location, PathStep};
use crate::value::{ObjectId, Value};
use crate::wire::NodeId;
use std::collections::HashMap;
use std::ops::DerefMut;
use tracing::warn;

/// Identity of something the tracker can see twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKey {
    Object(ObjectId),
    Node(NodeId),
}

/// Result attached to a record once decoding (or scoring) reached it.
#[derive(Debug, Clone)]
pub enum Resolved {
    Value(Value),
    Match(ObjectMatch),
}

/// Index of a record in the tracker's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitId(usize);

#[derive(Debug)]
pub struct VisitRecord {
    pub key: TrackKey,
    parent: Option<usize>,
    step: Option<PathStep>,
    resolved: Option<Resolved>,
}

#[derive(Debug, Default)]
pub struct SerializerState {
    records: Vec<VisitRecord>,
    index: HashMap<TrackKey, usize>,
    current: Location,
    fixups: Vec<Fixup>,
}

impl SerializerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record for `key`, if it has been seen in this call.
    pub fn visit(&self, key: TrackKey) -> Option<VisitId> {
        self.index.get(&key).copied().map(VisitId)
    }

    pub fn record(&self, id: VisitId) -> &VisitRecord {
        &self.records[id.0]
    }

    /// Where the record was first written: the steps up through its parents.
    pub fn location_of(&self, id: VisitId) -> Location {
        let mut steps = Vec::new();
        let mut cursor = Some(id.0);
        while let Some(index) = cursor {
            let record = &self.records[index];
            if let Some(step) = &record.step {
                steps.push(step.clone());
            }
            cursor = record.parent;
        }
        steps.into_iter().rev().collect()
    }

    /// True when `dup` sits on the chain of records from `parent` up to the
    /// root, i.e. reaching it again closes a cycle.
    pub fn is_ancestor(&self, dup: VisitId, parent: Option<TrackKey>) -> bool {
        let mut cursor = parent.and_then(|key| self.index.get(&key).copied());
        while let Some(index) = cursor {
            if index == dup.0 {
                return true;
            }
            cursor = self.records[index].parent;
        }
        false
    }

    /// Record `key` under `parent` and descend into `step`. A re-pushed key
    /// replaces its earlier record, so later lookups see the new location.
    pub fn push(
        &mut self,
        parent: Option<TrackKey>,
        key: TrackKey,
        step: PathStep,
    ) -> Result<VisitId, MarshalError> {
        let parent_index = match parent {
            Some(parent) => Some(*self.index.get(&parent).ok_or_else(|| {
                MarshalError::Scope(format!("parent {parent:?} was never recorded"))
            })?),
            None => None,
        };
        let index = self.records.len();
        self.records.push(VisitRecord {
            key,
            parent: parent_index,
            step: Some(step.clone()),
            resolved: None,
        });
        self.index.insert(key, index);
        self.current.push(step);
        Ok(VisitId(index))
    }

    /// Leave the current frame.
    pub fn pop(&mut self) -> Result<(), MarshalError> {
        self.current
            .pop()
            .map(|_| ())
            .ok_or_else(|| MarshalError::Scope("pop on an empty location stack".into()))
    }

    /// Push a frame that is popped again when the returned guard drops, on
    /// success and on error alike.
    pub fn enter<'a>(
        &'a mut self,
        parent: Option<TrackKey>,
        key: TrackKey,
        step: PathStep,
    ) -> Result<impl DerefMut<Target = &'a mut SerializerState> + 'a, MarshalError> {
        self.push(parent, key, step)?;
        Ok(scopeguard::guard(self, |state| {
            if let Err(e) = state.pop() {
                warn!("Unbalanced identity tracker: {}", e);
            }
        }))
    }

    pub fn current_location(&self) -> &Location {
        &self.current
    }

    /// Record that `current location + step` holds what sits at `original`.
    pub fn add_fixup(&mut self, original: Location, step: PathStep) {
        let target = self.current.child(step);
        self.fixups.push(Fixup::new(target, original));
    }

    pub fn fixups(&self) -> &[Fixup] {
        &self.fixups
    }

    pub fn into_fixups(self) -> Vec<Fixup> {
        self.fixups
    }

    /// Decode side: record a node without touching the location stack.
    pub fn store(&mut self, key: TrackKey) -> VisitId {
        if let Some(&index) = self.index.get(&key) {
            return VisitId(index);
        }
        let index = self.records.len();
        self.records.push(VisitRecord {
            key,
            parent: None,
            step: None,
            resolved: None,
        });
        self.index.insert(key, index);
        VisitId(index)
    }

    /// Attach the (possibly still incomplete) result for `key`. Container
    /// codecs call this before recursing so cycles resolve.
    pub fn set_serialized(&mut self, key: TrackKey, resolved: Resolved) -> Result<(), UnmarshalError> {
        let index = *self.index.get(&key).ok_or_else(|| {
            UnmarshalError::mismatch(format!("{key:?} was never stored"))
        })?;
        self.records[index].resolved = Some(resolved);
        Ok(())
    }

    pub fn serialized(&self, id: VisitId) -> Option<&Resolved> {
        self.records[id.0].resolved.as_ref()
    }
}
