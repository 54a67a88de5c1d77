//! Ordered Index Module
//!
//! Doubly linked ordering over cache entries, backed by a slab arena.
//!
//! Entries live in an [`EntryArena`] and are addressed by generation-checked
//! [`EntryId`] handles. An [`OrderedIndex`] only stores `head`, `tail` and a
//! length; the `prev`/`next` links live in the arena nodes. Several indexes
//! may share one arena (the LFU engine keeps one index per frequency), and
//! each node records the tag of the index it is currently linked into so a
//! removal through the wrong index is rejected instead of corrupting both.
//!
//! ```text
//!   head ─► [id_1] ◄──► [id_2] ◄──► [id_3] ◄── tail
//!           (MRU)                   (eviction victim)
//! ```
//!
//! All operations are O(1) except `iter`.

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

// == Entry Handle ==
/// Stable handle to an arena slot. Stale after the slot is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Node {
    entry: CacheEntry,
    prev: Option<EntryId>,
    next: Option<EntryId>,
    /// Tag of the index this node is linked into, `None` when detached
    owner: Option<u64>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

// == Entry Arena ==
/// Slab of entry nodes with a free list for slot reuse.
#[derive(Debug, Default)]
pub struct EntryArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl EntryArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a detached entry and returns its handle.
    pub fn insert(&mut self, entry: CacheEntry) -> EntryId {
        let node = Node {
            entry,
            prev: None,
            next: None,
            owner: None,
        };
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            EntryId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            EntryId {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    /// Frees a detached entry and returns it.
    ///
    /// Fails if the handle is stale or the node is still linked into an
    /// index; callers must unlink first.
    pub fn remove(&mut self, id: EntryId) -> Result<CacheEntry> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or_else(|| CacheError::ForeignEntry(format!("stale handle {:?}", id)))?;

        match &slot.node {
            Some(node) if node.owner.is_some() => {
                return Err(CacheError::ForeignEntry(format!(
                    "entry '{}' is still linked",
                    node.entry.key
                )))
            }
            Some(_) => {}
            None => return Err(CacheError::ForeignEntry(format!("freed handle {:?}", id))),
        }

        let node = slot.node.take().map(|node| node.entry);
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        node.ok_or_else(|| CacheError::ForeignEntry(format!("freed handle {:?}", id)))
    }

    /// Returns the entry behind a live handle.
    pub fn get(&self, id: EntryId) -> Option<&CacheEntry> {
        self.node(id).map(|node| &node.entry)
    }

    /// Returns the entry behind a live handle, mutably.
    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut CacheEntry> {
        self.node_mut(id).map(|node| &mut node.entry)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, id: EntryId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: EntryId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn linked_node_mut(&mut self, id: EntryId) -> Result<&mut Node> {
        self.node_mut(id)
            .ok_or_else(|| CacheError::ForeignEntry(format!("stale handle {:?}", id)))
    }
}

// == Ordered Index ==
/// Head-to-tail ordering over arena entries.
#[derive(Debug)]
pub struct OrderedIndex {
    tag: u64,
    head: Option<EntryId>,
    tail: Option<EntryId>,
    len: usize,
}

impl OrderedIndex {
    /// Creates an empty index. `tag` must be unique among the indexes that
    /// share an arena.
    pub fn new(tag: u64) -> Self {
        Self {
            tag,
            head: None,
            tail: None,
            len: 0,
        }
    }

    // == Push Front ==
    /// Links a detached entry at the head.
    pub fn push_front(&mut self, arena: &mut EntryArena, id: EntryId) -> Result<()> {
        let old_head = self.head;
        let node = arena.linked_node_mut(id)?;
        if let Some(owner) = node.owner {
            return Err(CacheError::ForeignEntry(format!(
                "entry '{}' already linked into index {}",
                node.entry.key, owner
            )));
        }
        node.prev = None;
        node.next = old_head;
        node.owner = Some(self.tag);

        match old_head {
            Some(head) => arena.linked_node_mut(head)?.prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
        Ok(())
    }

    // == Remove ==
    /// Unlinks an entry from wherever it sits in this index.
    ///
    /// The entry stays allocated in the arena.
    pub fn remove(&mut self, arena: &mut EntryArena, id: EntryId) -> Result<()> {
        let tag = self.tag;
        let node = arena.linked_node_mut(id)?;
        if node.owner != Some(tag) {
            return Err(CacheError::ForeignEntry(format!(
                "entry '{}' is not linked into index {}",
                node.entry.key, tag
            )));
        }
        let (prev, next) = (node.prev, node.next);
        node.prev = None;
        node.next = None;
        node.owner = None;

        match prev {
            Some(prev) => arena.linked_node_mut(prev)?.next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => arena.linked_node_mut(next)?.prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
        Ok(())
    }

    // == Pop Back ==
    /// Unlinks and returns the tail entry.
    pub fn pop_back(&mut self, arena: &mut EntryArena) -> Result<EntryId> {
        let tail = self
            .tail
            .ok_or(CacheError::EmptyStructure("pop from empty ordered index"))?;
        self.remove(arena, tail)?;
        Ok(tail)
    }

    /// Moves a linked entry to the head.
    pub fn move_to_front(&mut self, arena: &mut EntryArena, id: EntryId) -> Result<()> {
        if self.head == Some(id) {
            return Ok(());
        }
        self.remove(arena, id)?;
        self.push_front(arena, id)
    }

    pub fn front(&self) -> Option<EntryId> {
        self.head
    }

    pub fn back(&self) -> Option<EntryId> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Iterates handles from head to tail.
    pub fn iter<'a>(&self, arena: &'a EntryArena) -> Iter<'a> {
        Iter {
            arena,
            current: self.head,
        }
    }
}

/// Head-to-tail handle iterator.
pub struct Iter<'a> {
    arena: &'a EntryArena,
    current: Option<EntryId>,
}

impl Iterator for Iter<'_> {
    type Item = EntryId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        self.current = self.arena.node(id).and_then(|node| node.next);
        Some(id)
    }
}
