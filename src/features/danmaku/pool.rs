//! Object pool of reusable display objects
//!
//! The pool is an arena of slots plus two index lists:
//! - `free`: slots whose object is kept for reuse (at most `capacity`)
//! - `vacant`: slots whose object was destroyed
//!
//! Every borrow is identified by a `HandleToken` carrying the slot's
//! generation. Releasing a slot bumps its generation, so a token kept by a
//! late animation callback no longer resolves once the slot is reused.

use super::types::{Color, CommentId, CommentItem, CommentKind};

/// Borrow token for a pooled display object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleToken {
    index: u32,
    generation: u32,
}

impl HandleToken {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Renderable state for one comment, updated in place every frame
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayObject {
    pub comment: Option<CommentId>,
    pub text: String,
    pub kind: CommentKind,
    pub color: Color,
    pub font_size: f32,
    /// Measured text width in logical pixels
    pub width: f32,
    /// Left edge in logical pixels
    pub x: f32,
    /// Top edge in logical pixels
    pub y: f32,
    pub opacity: f32,
    pub visible: bool,
}

impl Default for DisplayObject {
    fn default() -> Self {
        Self {
            comment: None,
            text: String::new(),
            kind: CommentKind::Scroll,
            color: Color::WHITE,
            font_size: 0.0,
            width: 0.0,
            x: 0.0,
            y: 0.0,
            opacity: 0.0,
            visible: false,
        }
    }
}

impl DisplayObject {
    /// Attach an item, reusing the text buffer
    pub fn bind(&mut self, item: &CommentItem, font_size: f32, width: f32) {
        self.comment = Some(item.id);
        self.text.clear();
        self.text.push_str(&item.text);
        self.kind = item.kind;
        self.color = item.color;
        self.font_size = font_size;
        self.width = width;
    }

    /// Clear visual state before the object goes back to the free list
    pub fn reset(&mut self) {
        self.comment = None;
        self.text.clear();
        self.x = 0.0;
        self.y = 0.0;
        self.width = 0.0;
        self.opacity = 0.0;
        self.visible = false;
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    borrowed: bool,
    object: Option<DisplayObject>,
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Handles currently lent out
    pub borrowed: usize,
    /// Objects waiting for reuse
    pub free: usize,
    /// Objects constructed
    pub created: u64,
    /// Objects dropped because the free list was full
    pub destroyed: u64,
    /// Acquisitions served from the free list
    pub recycled: u64,
}

/// Bounded pool of `DisplayObject`s
#[derive(Debug)]
pub struct ObjectPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    vacant: Vec<u32>,
    max_concurrent: usize,
    capacity: usize,
    borrowed: usize,
    created: u64,
    destroyed: u64,
    recycled: u64,
}

impl ObjectPool {
    pub fn new(max_concurrent: usize, capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max_concurrent.min(1024)),
            free: Vec::with_capacity(capacity.min(1024)),
            vacant: Vec::new(),
            max_concurrent: max_concurrent.max(1),
            capacity,
            borrowed: 0,
            created: 0,
            destroyed: 0,
            recycled: 0,
        }
    }

    /// Whether `acquire` would succeed
    pub fn can_acquire(&self) -> bool {
        self.borrowed < self.max_concurrent
    }

    /// Borrow an object, recycling one when available
    ///
    /// Returns `None` once `max_concurrent` handles are lent out.
    pub fn acquire(&mut self) -> Option<HandleToken> {
        if !self.can_acquire() {
            return None;
        }

        let index = if let Some(index) = self.free.pop() {
            self.recycled += 1;
            index
        } else if let Some(index) = self.vacant.pop() {
            self.slots[index as usize].object = Some(DisplayObject::default());
            self.created += 1;
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                borrowed: false,
                object: Some(DisplayObject::default()),
            });
            self.created += 1;
            index
        };

        let slot = &mut self.slots[index as usize];
        slot.borrowed = true;
        self.borrowed += 1;
        Some(HandleToken {
            index,
            generation: slot.generation,
        })
    }

    /// Return a borrowed object
    ///
    /// Stale or unknown tokens are ignored and return `false`.
    pub fn release(&mut self, token: HandleToken) -> bool {
        let Some(slot) = self.slots.get_mut(token.index as usize) else {
            return false;
        };
        if !slot.borrowed || slot.generation != token.generation {
            return false;
        }

        slot.borrowed = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.borrowed -= 1;

        if self.free.len() < self.capacity {
            if let Some(object) = slot.object.as_mut() {
                object.reset();
            }
            self.free.push(token.index);
        } else {
            slot.object = None;
            self.destroyed += 1;
            self.vacant.push(token.index);
        }
        true
    }

    /// Release every borrowed handle
    pub fn release_all(&mut self) -> usize {
        let tokens: Vec<HandleToken> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.borrowed)
            .map(|(index, slot)| HandleToken {
                index: index as u32,
                generation: slot.generation,
            })
            .collect();
        tokens.into_iter().filter(|t| self.release(*t)).count()
    }

    /// Whether the token still refers to a live borrow
    pub fn is_live(&self, token: HandleToken) -> bool {
        self.slots
            .get(token.index as usize)
            .is_some_and(|slot| slot.borrowed && slot.generation == token.generation)
    }

    pub fn get(&self, token: HandleToken) -> Option<&DisplayObject> {
        let slot = self.slots.get(token.index as usize)?;
        if slot.borrowed && slot.generation == token.generation {
            slot.object.as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, token: HandleToken) -> Option<&mut DisplayObject> {
        let slot = self.slots.get_mut(token.index as usize)?;
        if slot.borrowed && slot.generation == token.generation {
            slot.object.as_mut()
        } else {
            None
        }
    }

    /// Change the borrow limit; existing borrows are kept
    pub fn set_max_concurrent(&mut self, max_concurrent: usize) {
        self.max_concurrent = max_concurrent.max(1);
    }

    /// Change the free-list bound, destroying surplus idle objects
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.free.len() > self.capacity {
            if let Some(index) = self.free.pop() {
                self.slots[index as usize].object = None;
                self.destroyed += 1;
                self.vacant.push(index);
            }
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn borrowed(&self) -> usize {
        self.borrowed
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            borrowed: self.borrowed,
            free: self.free.len(),
            created: self.created,
            destroyed: self.destroyed,
            recycled: self.recycled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_respects_max_concurrent() {
        let mut pool = ObjectPool::new(2, 4);
        let a = pool.acquire();
        let b = pool.acquire();
        assert!(a.is_some() && b.is_some());
        assert!(pool.acquire().is_none());
        assert_eq!(pool.borrowed(), 2);
    }

    #[test]
    fn test_release_recycles() {
        let mut pool = ObjectPool::new(4, 4);
        let a = pool.acquire().unwrap();
        assert!(pool.release(a));
        let b = pool.acquire().unwrap();
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.recycled, 1);
    }

    #[test]
    fn test_stale_token_cannot_touch_reused_slot() {
        let mut pool = ObjectPool::new(4, 4);
        let old = pool.acquire().unwrap();
        pool.release(old);
        let new = pool.acquire().unwrap();
        pool.get_mut(new).unwrap().text.push_str("fresh");

        assert!(pool.get_mut(old).is_none());
        assert!(!pool.release(old));
        assert!(pool.is_live(new));
        assert_eq!(pool.get(new).unwrap().text, "fresh");
    }

    #[test]
    fn test_free_list_bounded_by_capacity() {
        let mut pool = ObjectPool::new(8, 2);
        let tokens: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        for t in tokens {
            pool.release(t);
        }
        let stats = pool.stats();
        assert_eq!(stats.free, 2);
        assert_eq!(stats.destroyed, 3);
        assert_eq!(stats.borrowed, 0);
    }

    #[test]
    fn test_shrinking_capacity_trims_free_list() {
        let mut pool = ObjectPool::new(8, 8);
        let tokens: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        for t in tokens {
            pool.release(t);
        }
        assert_eq!(pool.free_len(), 4);
        pool.set_capacity(1);
        assert_eq!(pool.free_len(), 1);
        // Vacant slots are reused before the arena grows
        let _ = (0..4).map(|_| pool.acquire().unwrap()).count();
        assert_eq!(pool.slots.len(), 4);
    }

    #[test]
    fn test_release_resets_object() {
        let mut pool = ObjectPool::new(1, 1);
        let t = pool.acquire().unwrap();
        let item = CommentItem::new("hello", 1.0);
        pool.get_mut(t).unwrap().bind(&item, 25.0, 60.0);
        pool.release(t);
        let t = pool.acquire().unwrap();
        let object = pool.get(t).unwrap();
        assert!(object.text.is_empty());
        assert!(object.comment.is_none());
        assert!(!object.visible);
    }

    #[test]
    fn test_acquire_release_sequence_invariants() {
        let mut pool = ObjectPool::new(3, 2);
        let mut live = Vec::new();
        for step in 0..200u32 {
            if step % 3 == 2 || live.len() == 3 {
                if let Some(t) = live.pop() {
                    assert!(pool.release(t));
                }
            } else if let Some(t) = pool.acquire() {
                live.push(t);
            }
            assert!(pool.borrowed() <= 3);
            assert!(pool.free_len() <= 2);
            assert_eq!(pool.borrowed(), live.len());
        }
    }

    #[test]
    fn test_release_all() {
        let mut pool = ObjectPool::new(4, 4);
        for _ in 0..3 {
            pool.acquire();
        }
        assert_eq!(pool.release_all(), 3);
        assert_eq!(pool.borrowed(), 0);
        assert_eq!(pool.release_all(), 0);
    }
}
