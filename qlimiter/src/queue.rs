use std::collections::VecDeque;

/// First-in first-out holding area for calls waiting on admission.
#[derive(Debug)]
pub struct WaitQueue<T> {
    items: VecDeque<T>,
}

impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// The oldest item, left in place.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Removes and returns the oldest item.
    pub fn shift(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_is_first_in_first_out() {
        let mut queue = WaitQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.shift(), None::<u32>);

        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek(), Some(&1));

        assert_eq!(queue.shift(), Some(1));
        assert_eq!(queue.shift(), Some(2));
        queue.push(4);
        assert_eq!(queue.shift(), Some(3));
        assert_eq!(queue.shift(), Some(4));
        assert!(queue.is_empty());
        assert_eq!(queue.peek(), None);
    }
}
