//! Generational slab used for interactions.
//!
//! A [`Handle`] stays valid until its entry is removed; a reused slot bumps its
//! generation so stale handles miss instead of aliasing a newer entry. An entry
//! can be taken out temporarily (for processing with `&mut` access to the rest
//! of the engine) and restored under the same handle.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Taken { generation: u32 },
    Vacant { generation: u32 },
}

impl<T> Slot<T> {
    fn generation(&self) -> u32 {
        match self {
            Slot::Occupied { generation, .. }
            | Slot::Taken { generation }
            | Slot::Vacant { generation } => *generation,
        }
    }
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Live entries, including taken ones.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let generation = slot.generation().wrapping_add(1);
            *slot = Slot::Occupied { generation, value };
            return Handle { index, generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        Handle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove and return an occupied entry.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if !matches!(slot, Slot::Occupied { generation, .. } if *generation == handle.generation) {
            return None;
        }
        let old = std::mem::replace(
            slot,
            Slot::Vacant {
                generation: handle.generation,
            },
        );
        self.free.push(handle.index);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Move an entry out, reserving its slot until [`Arena::restore`] or [`Arena::discard`].
    pub fn take(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if !matches!(slot, Slot::Occupied { generation, .. } if *generation == handle.generation) {
            return None;
        }
        match std::mem::replace(
            slot,
            Slot::Taken {
                generation: handle.generation,
            },
        ) {
            Slot::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Put a taken entry back. Returns false if the handle was not taken.
    pub fn restore(&mut self, handle: Handle, value: T) -> bool {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot @ Slot::Taken { .. }) if slot.generation() == handle.generation => {
                *slot = Slot::Occupied {
                    generation: handle.generation,
                    value,
                };
                true
            }
            _ => false,
        }
    }

    /// Release a taken slot without restoring it.
    pub fn discard(&mut self, handle: Handle) {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot @ Slot::Taken { .. }) if slot.generation() == handle.generation => {
                *slot = Slot::Vacant {
                    generation: handle.generation,
                };
                self.free.push(handle.index);
                self.len -= 1;
            }
            _ => {}
        }
    }

    /// Occupied entries in slot order. Taken entries are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { generation, value } => Some((
                Handle {
                    index: i as u32,
                    generation: *generation,
                },
                value,
            )),
            _ => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Occupied { generation, value } => Some((
                    Handle {
                        index: i as u32,
                        generation: *generation,
                    },
                    value,
                )),
                _ => None,
            })
    }
}
