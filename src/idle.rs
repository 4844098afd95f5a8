//! LIFO storage for idle pooled connections.

const MIN_CAPACITY: usize = 10;

/// A stack whose backing storage doubles when full and halves once it is
/// only a quarter used, so idle memory follows the number of idle entries.
#[derive(Debug)]
pub struct IdleStack<T> {
    items: Vec<T>,
}

impl<T> IdleStack<T> {
    pub fn new() -> Self {
        IdleStack {
            items: Vec::with_capacity(MIN_CAPACITY),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.items.capacity() {
            let grow_to = (self.items.capacity() * 2).max(MIN_CAPACITY);
            self.items.reserve_exact(grow_to - self.items.len());
        }
        self.items.push(item);
    }

    /// Removes and returns the most recently pushed entry.
    pub fn pop(&mut self) -> Option<T> {
        let item = self.items.pop()?;
        let capacity = self.items.capacity();
        if capacity > MIN_CAPACITY && !self.items.is_empty() && self.items.len() <= capacity / 4 {
            self.items.shrink_to((capacity / 2).max(MIN_CAPACITY));
        }
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.items.capacity()
    }
}

impl<T> Default for IdleStack<T> {
    fn default() -> Self {
        Self::new()
    }
}
