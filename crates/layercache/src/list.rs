//! Recency list
//!
//! Slab-backed doubly linked list ordered from most to least recently
//! promoted. Slots are plain indices, so the worker can keep an item's
//! handle in the item itself. The worker is the only owner.

/// Node in the recency list
struct Node<V> {
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked list addressed by slot index
pub(crate) struct RecencyList<V> {
    nodes: Vec<Option<Node<V>>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
    len: usize,
}

impl<V> RecencyList<V> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            head: None,
            tail: None,
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Insert `value` at the most recent end and return its slot
    pub(crate) fn push_front(&mut self, value: V) -> usize {
        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            value,
            prev: None,
            next: self.head,
        });

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.len += 1;
        idx
    }

    pub(crate) fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) || self.get(idx).is_none() {
            return;
        }

        self.unlink(idx);

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = self.head;
        }

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    /// Remove the node at `idx` and return its value
    pub(crate) fn remove(&mut self, idx: usize) -> Option<V> {
        self.get(idx)?;
        self.unlink(idx);
        self.free_list.push(idx);
        self.len -= 1;
        self.nodes[idx].take().map(|node| node.value)
    }

    /// Swap the value stored at `idx`, keeping its position
    pub(crate) fn replace(&mut self, idx: usize, value: V) -> Option<V> {
        let node = self.nodes.get_mut(idx)?.as_mut()?;
        Some(std::mem::replace(&mut node.value, value))
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&V> {
        self.nodes.get(idx)?.as_ref().map(|node| &node.value)
    }

    /// Least recently promoted slot
    pub(crate) fn back(&self) -> Option<usize> {
        self.tail
    }

    /// Slot one step towards the most recent end
    pub(crate) fn prev(&self, idx: usize) -> Option<usize> {
        self.nodes.get(idx)?.as_ref()?.prev
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Empty the list, handing back every value
    pub(crate) fn drain(&mut self) -> Vec<V> {
        let values = self.nodes.drain(..).flatten().map(|node| node.value).collect();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
        values
    }

    /// Values from most to least recent
    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &V> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.nodes[cursor?].as_ref()?;
            cursor = node.next;
            Some(&node.value)
        })
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = if let Some(node) = &self.nodes[idx] {
            (node.prev, node.next)
        } else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => {
                self.head = next;
            }
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => {
                self.tail = prev;
            }
        }
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(list: &RecencyList<&'static str>) -> Vec<&'static str> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_push_front() {
        let mut list = RecencyList::new();
        list.push_front("a");
        list.push_front("b");
        list.push_front("c");

        assert_eq!(order(&list), ["c", "b", "a"]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(list.back().unwrap()), Some(&"a"));
    }

    #[test]
    fn test_move_to_front() {
        let mut list = RecencyList::new();
        let a = list.push_front("a");
        list.push_front("b");
        let c = list.push_front("c");

        list.move_to_front(a);
        assert_eq!(order(&list), ["a", "c", "b"]);

        list.move_to_front(a);
        assert_eq!(order(&list), ["a", "c", "b"]);

        list.move_to_front(c);
        assert_eq!(order(&list), ["c", "a", "b"]);
        assert_eq!(list.get(list.back().unwrap()), Some(&"b"));
    }

    #[test]
    fn test_remove_and_reuse() {
        let mut list = RecencyList::new();
        list.push_front("a");
        let b = list.push_front("b");
        list.push_front("c");

        assert_eq!(list.remove(b), Some("b"));
        assert_eq!(list.remove(b), None);
        assert_eq!(order(&list), ["c", "a"]);
        assert_eq!(list.len(), 2);

        let d = list.push_front("d");
        assert_eq!(d, b);
        assert_eq!(order(&list), ["d", "c", "a"]);
    }

    #[test]
    fn test_walk_from_back() {
        let mut list = RecencyList::new();
        for value in ["a", "b", "c"] {
            list.push_front(value);
        }

        let mut seen = Vec::new();
        let mut cursor = list.back();
        while let Some(idx) = cursor {
            seen.push(*list.get(idx).unwrap());
            cursor = list.prev(idx);
        }
        assert_eq!(seen, ["a", "b", "c"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut list = RecencyList::new();
        let a = list.push_front("a");
        list.push_front("b");

        assert_eq!(list.replace(a, "z"), Some("a"));
        assert_eq!(order(&list), ["b", "z"]);
        assert_eq!(list.replace(99, "x"), None);
    }

    #[test]
    fn test_drain() {
        let mut list = RecencyList::new();
        list.push_front("a");
        let b = list.push_front("b");
        list.remove(b);
        list.push_front("c");

        let mut drained = list.drain();
        drained.sort();
        assert_eq!(drained, ["a", "c"]);
        assert_eq!(list.len(), 0);
        assert!(list.back().is_none());
        assert!(list.iter().next().is_none());
    }

    #[test]
    fn test_single_node_remove() {
        let mut list = RecencyList::new();
        let a = list.push_front("a");
        assert_eq!(list.remove(a), Some("a"));
        assert!(list.back().is_none());
        assert_eq!(list.len(), 0);
    }
}
