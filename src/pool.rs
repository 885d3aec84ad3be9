use crate::path::PathBuffer;
use crate::result::ValidateResult;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};

/// State that can be cleared and handed to the next borrower.
pub trait Reusable: Default {
    fn reset(&mut self);
}

impl Reusable for PathBuffer {
    fn reset(&mut self) {
        PathBuffer::reset(self)
    }
}

impl Reusable for ValidateResult {
    fn reset(&mut self) {
        ValidateResult::reset(self)
    }
}

/// A caller-scoped pool of reusable buffers.
///
/// Each [`acquire`][Pool::acquire] hands out exactly one instance, reset
/// before use, to exactly one borrower; it returns to the pool when the
/// guard drops.
#[derive(Debug, Default)]
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
}

impl<T: Reusable> Pool<T> {
    pub fn new() -> Self {
        Pool {
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn acquire(&self) -> Pooled<'_, T> {
        let mut item = self.idle.lock().pop().unwrap_or_default();
        item.reset();
        Pooled { pool: self, item }
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

/// A borrowed pool item. Dereferences to the item.
pub struct Pooled<'a, T: Reusable> {
    pool: &'a Pool<T>,
    item: T,
}

impl<T: Reusable> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T: Reusable> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<T: Reusable> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        let item = std::mem::take(&mut self.item);
        self.pool.idle.lock().push(item);
    }
}
