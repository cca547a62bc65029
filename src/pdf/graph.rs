//! Indirect object graph and object-number allocation

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, trace};

use super::object::NULL;
use super::{Object, ObjectId};
use crate::error::{PDFError, PDFResult};

/// Highest generation a slot can reach; object 0 of the free list uses it
pub const MAX_GENERATION: u16 = u16::MAX;

/// Hands out strictly increasing object numbers.
///
/// Clones share the counter, so sessions composed on top of each other
/// (a stamper appending to a writer's output) never collide.
#[derive(Debug, Clone)]
pub struct ObjectAllocator {
    next: Arc<AtomicU32>,
}

impl Default for ObjectAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl ObjectAllocator {
    /// Allocator whose first number is `first` (at least 1)
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: Arc::new(AtomicU32::new(first.max(1))),
        }
    }

    /// Take the next number
    pub fn next_number(&self) -> u32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Number the next call would return
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::SeqCst)
    }

    /// Make sure numbers up to and including `number` are never handed out
    pub fn reserve_through(&self, number: u32) {
        self.next.fetch_max(number.saturating_add(1), Ordering::SeqCst);
    }
}

/// State of one object number in the graph
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Allocated but not yet given a value
    Reserved,
    /// Holds a value
    Live(Object),
    /// Released; the generation already points at the next version
    Free,
}

#[derive(Debug, Clone)]
struct Entry {
    generation: u16,
    slot: Slot,
}

/// Owner of every indirect object in a session, keyed by object number
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    entries: BTreeMap<u32, Entry>,
    allocator: ObjectAllocator,
}

impl ObjectGraph {
    /// Create new graph with its own allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph drawing numbers from a shared allocator
    pub fn with_allocator(allocator: ObjectAllocator) -> Self {
        Self {
            entries: BTreeMap::new(),
            allocator,
        }
    }

    pub fn allocator(&self) -> &ObjectAllocator {
        &self.allocator
    }

    /// Allocate a fresh id (generation 0)
    pub fn allocate(&mut self) -> ObjectId {
        let number = self.allocator.next_number();
        self.entries.insert(
            number,
            Entry {
                generation: 0,
                slot: Slot::Reserved,
            },
        );
        trace!("Allocated object {}", number);
        ObjectId::new(number, 0)
    }

    /// Allocate an id and store `object` under it
    pub fn add(&mut self, object: Object) -> ObjectId {
        let id = self.allocate();
        self.entries.insert(
            id.number,
            Entry {
                generation: 0,
                slot: Slot::Live(object),
            },
        );
        id
    }

    fn entry(&self, id: ObjectId) -> PDFResult<&Entry> {
        self.entries
            .get(&id.number)
            .filter(|entry| entry.generation == id.generation)
            .ok_or(PDFError::ObjectNotFound(id))
    }

    /// Give an allocated (or live) object a new value; the id stays the same
    pub fn set(&mut self, id: ObjectId, object: Object) -> PDFResult<()> {
        let entry = self
            .entries
            .get_mut(&id.number)
            .filter(|entry| entry.generation == id.generation && entry.slot != Slot::Free)
            .ok_or(PDFError::ObjectNotFound(id))?;
        entry.slot = Slot::Live(object);
        Ok(())
    }

    /// Store `object` under an explicit id, allocating the number if needed
    pub fn insert(&mut self, id: ObjectId, object: Object) {
        self.allocator.reserve_through(id.number);
        self.entries.insert(
            id.number,
            Entry {
                generation: id.generation,
                slot: Slot::Live(object),
            },
        );
    }

    /// Live value of `id`
    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        match self.entry(id) {
            Ok(Entry {
                slot: Slot::Live(object),
                ..
            }) => Some(object),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        match self.entries.get_mut(&id.number) {
            Some(Entry {
                generation,
                slot: Slot::Live(object),
            }) if *generation == id.generation => Some(object),
            _ => None,
        }
    }

    /// Follow a reference; anything that does not resolve becomes null
    pub fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        match object {
            Object::Reference(id) => self.get(*id).unwrap_or(&NULL),
            other => other,
        }
    }

    /// Release `id`; its number will be written as a free entry
    pub fn free(&mut self, id: ObjectId) -> PDFResult<()> {
        let entry = self
            .entries
            .get_mut(&id.number)
            .filter(|entry| entry.generation == id.generation && entry.slot != Slot::Free)
            .ok_or(PDFError::ObjectNotFound(id))?;
        entry.generation = entry.generation.saturating_add(1);
        entry.slot = Slot::Free;
        debug!("Freed object {}", id);
        Ok(())
    }

    /// Replace whatever lives under `number` with a new version.
    ///
    /// The generation is bumped, so references to the old id stop resolving.
    pub fn replace(&mut self, number: u32, object: Object) -> PDFResult<ObjectId> {
        let entry = self
            .entries
            .get_mut(&number)
            .ok_or(PDFError::ObjectNotFound(ObjectId::new(number, 0)))?;
        if entry.slot != Slot::Free {
            entry.generation = entry.generation.saturating_add(1);
        }
        if entry.generation == MAX_GENERATION {
            return Err(PDFError::malformed(format!(
                "object {} has no generations left",
                number
            )));
        }
        entry.slot = Slot::Live(object);
        Ok(ObjectId::new(number, entry.generation))
    }

    /// Record a free slot with a known generation (used when copying tables)
    pub fn mark_free(&mut self, id: ObjectId) {
        self.allocator.reserve_through(id.number);
        self.entries.insert(
            id.number,
            Entry {
                generation: id.generation,
                slot: Slot::Free,
            },
        );
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Every slot in ascending number order
    pub fn slots(&self) -> impl Iterator<Item = (ObjectId, &Slot)> {
        self.entries
            .iter()
            .map(|(&number, entry)| (ObjectId::new(number, entry.generation), &entry.slot))
    }

    /// Live objects in ascending number order
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Object)> {
        self.slots().filter_map(|(id, slot)| match slot {
            Slot::Live(object) => Some((id, object)),
            _ => None,
        })
    }

    /// Number of slots, live or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current id and state of `number`, whatever its generation
    pub fn slot(&self, number: u32) -> Option<(ObjectId, &Slot)> {
        self.entries
            .get(&number)
            .map(|entry| (ObjectId::new(number, entry.generation), &entry.slot))
    }

    /// Highest number known to the graph
    pub fn max_number(&self) -> u32 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }
}
