use std::sync::Arc;

/// One cell of a persistent singly-linked list.
#[derive(Debug)]
pub struct Node<T> {
    pub car: T,
    pub cdr: NodePtr<T>,
}

pub type NodePtr<T> = Option<Arc<Node<T>>>;

/// A persistent stack with structural sharing.
///
/// Cells are shared and never mutated in place, so two diverging stacks
/// (a captured continuation and the live machine, say) reference common
/// suffixes by identity. `clone` is O(1).
#[derive(Debug)]
pub struct PList<T>(NodePtr<T>);

impl<T> Clone for PList<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for PList<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> PList<T> {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn push(&mut self, value: T) {
        self.0 = Some(Arc::new(Node {
            car: value,
            cdr: self.0.take(),
        }));
    }

    pub fn peek(&self) -> Option<&T> {
        self.0.as_ref().map(|node| &node.car)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// The head cell, exposed for identity comparison between stacks
    /// that may share structure.
    pub fn head(&self) -> &NodePtr<T> {
        &self.0
    }

    /// True when both stacks currently share the same head cell (or are
    /// both empty). This is identity, not value equality.
    pub fn same_head(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter { next: &self.0 }
    }
}

impl<T: Clone> PList<T> {
    /// Pop the head. Shared cells are cloned out rather than unwrapped
    /// since other stacks may still reference them.
    pub fn pop(&mut self) -> Option<T> {
        let node = self.0.take()?;
        let value = node.car.clone();
        self.0 = node.cdr.clone();
        Some(value)
    }
}

pub struct Iter<'a, T> {
    next: &'a NodePtr<T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node = self.next.as_ref()?;
        self.next = &node.cdr;
        Some(&node.car)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_is_lifo() {
        let mut list = PList::new();
        list.push(1);
        list.push(2);
        list.push(3);
        assert_eq!(list.len(), 3);
        assert_eq!(list.pop(), Some(3));
        assert_eq!(list.pop(), Some(2));
        assert_eq!(list.pop(), Some(1));
        assert_eq!(list.pop(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn clones_share_suffixes_by_identity() {
        let mut a = PList::new();
        a.push("w1");
        let shared = a.clone();
        a.push("w2");

        let mut b = shared.clone();
        b.push("w3");

        assert!(!a.same_head(&b));
        // Popping the divergent heads exposes the shared cell.
        a.pop();
        b.pop();
        assert!(a.same_head(&b));
        assert!(a.same_head(&shared));
    }

    #[test]
    fn popping_a_shared_cell_leaves_other_readers_intact() {
        let mut a = PList::new();
        a.push(10);
        a.push(20);
        let b = a.clone();
        assert_eq!(a.pop(), Some(20));
        assert_eq!(b.iter().copied().collect::<Vec<_>>(), vec![20, 10]);
    }
}
