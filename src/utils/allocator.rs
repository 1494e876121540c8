use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, marker::PhantomData};

/// Slot index plus generation; a handle is live only while both match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    pub const NULL: EntityId = EntityId {
        index: u32::MAX,
        generation: 0,
    };

    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

/// Typed wrapper around [`EntityId`] so handles of different arenas can't be mixed up.
pub trait ArenaHandle: Copy + Eq {
    fn from_entity(id: EntityId) -> Self;
    fn entity(self) -> EntityId;
}

impl ArenaHandle for EntityId {
    fn from_entity(id: EntityId) -> Self {
        id
    }

    fn entity(self) -> EntityId {
        self
    }
}

/// Declares a newtype handle implementing [`ArenaHandle`].
#[macro_export]
macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub $crate::utils::allocator::EntityId);

        impl $crate::utils::allocator::ArenaHandle for $name {
            fn from_entity(id: $crate::utils::allocator::EntityId) -> Self {
                Self(id)
            }

            fn entity(self) -> $crate::utils::allocator::EntityId {
                self.0
            }
        }
    };
}

/// Generational arena that hands out stable typed handles and rejects stale ones.
pub struct Arena<T, H: ArenaHandle = EntityId> {
    items: Vec<Option<T>>,
    generations: Vec<u32>,
    free_list: VecDeque<u32>,
    live: usize,
    _handle: PhantomData<fn() -> H>,
}

impl<T, H: ArenaHandle> Default for Arena<T, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, H: ArenaHandle> Arena<T, H> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            generations: Vec::new(),
            free_list: VecDeque::new(),
            live: 0,
            _handle: PhantomData,
        }
    }

    pub fn insert(&mut self, item: T) -> H {
        self.live += 1;

        if let Some(index) = self.free_list.pop_front() {
            let generation = self.generations[index as usize];
            self.items[index as usize] = Some(item);
            return H::from_entity(EntityId::new(index, generation));
        }

        let index = self.items.len() as u32;
        self.items.push(Some(item));
        self.generations.push(0);
        H::from_entity(EntityId::new(index, 0))
    }

    pub fn get(&self, handle: H) -> Option<&T> {
        let id = handle.entity();
        if self.is_valid(handle) {
            self.items.get(id.index()).and_then(|slot| slot.as_ref())
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        let id = handle.entity();
        if self.is_valid(handle) {
            self.items.get_mut(id.index()).and_then(|slot| slot.as_mut())
        } else {
            None
        }
    }

    /// Borrows two distinct live entries mutably at once.
    pub fn get2_mut(&mut self, handle_a: H, handle_b: H) -> Option<(&mut T, &mut T)> {
        let (id_a, id_b) = (handle_a.entity(), handle_b.entity());
        if id_a.index() == id_b.index() {
            return None;
        }

        if !self.is_valid(handle_a) || !self.is_valid(handle_b) {
            return None;
        }

        let (first, second, flipped) = if id_a.index() < id_b.index() {
            (id_a, id_b, false)
        } else {
            (id_b, id_a, true)
        };

        let (left, right) = self.items.split_at_mut(second.index());
        let first_slot = left.get_mut(first.index()).and_then(|slot| slot.as_mut())?;
        let second_slot = right.get_mut(0).and_then(|slot| slot.as_mut())?;

        if flipped {
            Some((second_slot, first_slot))
        } else {
            Some((first_slot, second_slot))
        }
    }

    pub fn remove(&mut self, handle: H) -> Option<T> {
        if !self.is_valid(handle) {
            return None;
        }

        let index = handle.entity().index();
        let item = self.items.get_mut(index).and_then(|slot| slot.take())?;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.free_list.push_back(index as u32);
        self.live -= 1;
        Some(item)
    }

    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> + '_ {
        self.items.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref().map(|item| {
                (
                    H::from_entity(EntityId::new(index as u32, self.generations[index])),
                    item,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (H, &mut T)> + '_ {
        let generations = &self.generations;
        self.items.iter_mut().enumerate().filter_map(move |(index, slot)| {
            slot.as_mut().map(|item| {
                (
                    H::from_entity(EntityId::new(index as u32, generations[index])),
                    item,
                )
            })
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = H> + '_ {
        self.iter().map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn clear(&mut self) {
        for (index, slot) in self.items.iter_mut().enumerate() {
            if slot.take().is_some() {
                self.generations[index] = self.generations[index].wrapping_add(1);
                self.free_list.push_back(index as u32);
            }
        }
        self.live = 0;
    }

    pub fn is_valid(&self, handle: H) -> bool {
        let id = handle.entity();
        self.generations
            .get(id.index())
            .map(|generation| *generation == id.generation())
            .unwrap_or(false)
            && self.items.get(id.index()).is_some_and(|slot| slot.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    define_handle!(TestId);

    #[test]
    fn stale_handles_are_rejected_after_reuse() {
        let mut arena: Arena<u32, TestId> = Arena::new();
        let first = arena.insert(1);
        assert_eq!(arena.remove(first), Some(1));

        let second = arena.insert(2);
        assert_eq!(first.0.index(), second.0.index());
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second), Some(&2));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn get2_mut_returns_entries_in_argument_order() {
        let mut arena: Arena<u32> = Arena::new();
        let a = arena.insert(10);
        let b = arena.insert(20);

        let (second, first) = arena.get2_mut(b, a).expect("both entries are live");
        assert_eq!((*second, *first), (20, 10));
        assert!(arena.get2_mut(a, a).is_none());
    }
}
