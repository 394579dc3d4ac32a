//! Change detection.
//!
//! Pure partition of a fetched listing against the registry snapshot. The
//! caller decides what to do with each class; nothing here touches disk
//! except through the injected `is_missing` predicate.

use crate::domain::{parse_timestamp, Item};

use super::registry::Registry;

/// Classification of one fetched item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Updated,
    Unchanged,
}

/// Fetched items partitioned by change class
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub new: Vec<Item>,
    pub updated: Vec<Item>,
    pub unchanged: Vec<Item>,
}

impl ChangeSet {
    pub fn len(&self) -> usize {
        self.new.len() + self.updated.len() + self.unchanged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items that need materializing and a registry update
    pub fn changed(&self) -> impl Iterator<Item = &Item> {
        self.new.iter().chain(self.updated.iter())
    }
}

/// Classify one fetched item against its previous observation
pub fn classify_item<F>(previous: Option<&Item>, fetched: &Item, is_missing: F) -> Change
where
    F: Fn(&Item) -> bool,
{
    let Some(previous) = previous else {
        return Change::New;
    };

    if content_changed(previous, fetched) || is_missing(previous) {
        Change::Updated
    } else {
        Change::Unchanged
    }
}

/// Partition `fetched` into new / updated / unchanged.
///
/// Every fetched item lands in exactly one class. Items known only to the
/// snapshot are ignored.
pub fn classify<F>(snapshot: &Registry, fetched: Vec<Item>, is_missing: F) -> ChangeSet
where
    F: Fn(&Item) -> bool,
{
    let mut changes = ChangeSet::default();

    for item in fetched {
        match classify_item(snapshot.get(&item.key()), &item, &is_missing) {
            Change::New => changes.new.push(item),
            Change::Updated => changes.updated.push(item),
            Change::Unchanged => changes.unchanged.push(item),
        }
    }

    changes
}

fn content_changed(previous: &Item, fetched: &Item) -> bool {
    let parsed = (
        previous.updated_at.as_deref().and_then(parse_timestamp),
        fetched.updated_at.as_deref().and_then(parse_timestamp),
    );

    match parsed {
        (Some(old), Some(new)) => {
            let (old, new) = (old.as_instant(), new.as_instant());
            new > old || (new == old && hash_changed(previous, fetched))
        }
        _ => previous.updated_at != fetched.updated_at || hash_changed(previous, fetched),
    }
}

fn hash_changed(previous: &Item, fetched: &Item) -> bool {
    fetched.content_hash.is_some() && fetched.content_hash != previous.content_hash
}
