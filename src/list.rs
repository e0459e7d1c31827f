//! # Intrusive List
//!
//! Doubly-linked list whose links are embedded in the elements themselves.
//! Ready queues, semaphore wait queues, the delayed-task queue and the timer
//! queue are all `List` heads threaded through nodes stored in fixed tables
//! (the TCB table, the timer table).
//!
//! Links are table indices rather than pointers: a `List` never owns its
//! nodes and every operation takes the backing table explicitly. Insertion,
//! removal and rotation are O(1); sorted insertion is O(n) in the list
//! length.

/// Index of a node within the table that owns it.
pub type NodeIndex = u16;

/// Link fields embedded in every list element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    prev: Option<NodeIndex>,
    next: Option<NodeIndex>,
    linked: bool,
}

impl Link {
    /// An unlinked node.
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
        }
    }

    /// Whether the node currently belongs to a list.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Successor of this node in its list.
    #[inline]
    pub fn next(&self) -> Option<NodeIndex> {
        self.next
    }

    /// Predecessor of this node in its list.
    #[inline]
    pub fn prev(&self) -> Option<NodeIndex> {
        self.prev
    }
}

/// Implemented by table elements that embed a [`Link`].
pub trait Linked {
    fn link(&self) -> &Link;
    fn link_mut(&mut self) -> &mut Link;
}

/// Head of an intrusive list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct List {
    head: Option<NodeIndex>,
    tail: Option<NodeIndex>,
    len: u16,
}

impl List {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn head(&self) -> Option<NodeIndex> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<NodeIndex> {
        self.tail
    }

    /// Append `idx` at the tail.
    pub fn push_back<T: Linked>(&mut self, nodes: &mut [T], idx: NodeIndex) {
        debug_assert!(!nodes[idx as usize].link().linked, "node already linked");
        {
            let link = nodes[idx as usize].link_mut();
            link.prev = self.tail;
            link.next = None;
            link.linked = true;
        }
        match self.tail {
            Some(tail) => nodes[tail as usize].link_mut().next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    /// Insert `idx` at the head.
    pub fn push_front<T: Linked>(&mut self, nodes: &mut [T], idx: NodeIndex) {
        match self.head {
            Some(head) => self.insert_before(nodes, head, idx),
            None => self.push_back(nodes, idx),
        }
    }

    /// Insert `idx` immediately before `before`, which must be in this list.
    pub fn insert_before<T: Linked>(&mut self, nodes: &mut [T], before: NodeIndex, idx: NodeIndex) {
        debug_assert!(!nodes[idx as usize].link().linked, "node already linked");
        let prev = nodes[before as usize].link().prev;
        {
            let link = nodes[idx as usize].link_mut();
            link.prev = prev;
            link.next = Some(before);
            link.linked = true;
        }
        nodes[before as usize].link_mut().prev = Some(idx);
        match prev {
            Some(p) => nodes[p as usize].link_mut().next = Some(idx),
            None => self.head = Some(idx),
        }
        self.len += 1;
    }

    /// Insert `idx` before the first node `n` for which `goes_before(new, n)`
    /// holds, or at the tail if there is none. With a strict comparison this
    /// keeps insertion order among equal keys.
    pub fn insert_sorted_by<T, F>(&mut self, nodes: &mut [T], idx: NodeIndex, mut goes_before: F)
    where
        T: Linked,
        F: FnMut(&T, &T) -> bool,
    {
        let mut cursor = self.head;
        while let Some(i) = cursor {
            if goes_before(&nodes[idx as usize], &nodes[i as usize]) {
                self.insert_before(nodes, i, idx);
                return;
            }
            cursor = nodes[i as usize].link().next;
        }
        self.push_back(nodes, idx);
    }

    /// Unlink `idx`, which must be in this list.
    pub fn remove<T: Linked>(&mut self, nodes: &mut [T], idx: NodeIndex) {
        let Link { prev, next, linked } = *nodes[idx as usize].link();
        debug_assert!(linked, "removing an unlinked node");
        match prev {
            Some(p) => nodes[p as usize].link_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => nodes[n as usize].link_mut().prev = prev,
            None => self.tail = prev,
        }
        *nodes[idx as usize].link_mut() = Link::new();
        self.len -= 1;
    }

    /// Unlink and return the head.
    pub fn pop_front<T: Linked>(&mut self, nodes: &mut [T]) -> Option<NodeIndex> {
        let head = self.head?;
        self.remove(nodes, head);
        Some(head)
    }

    /// Move the head to the tail.
    pub fn rotate<T: Linked>(&mut self, nodes: &mut [T]) {
        if self.len > 1 {
            if let Some(head) = self.pop_front(nodes) {
                self.push_back(nodes, head);
            }
        }
    }

    /// Iterate over the node indices from head to tail.
    pub fn iter<'a, T: Linked>(&self, nodes: &'a [T]) -> Iter<'a, T> {
        Iter {
            nodes,
            cursor: self.head,
        }
    }
}

/// Iterator over the indices of a [`List`].
pub struct Iter<'a, T> {
    nodes: &'a [T],
    cursor: Option<NodeIndex>,
}

impl<'a, T: Linked> Iterator for Iter<'a, T> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let current = self.cursor?;
        self.cursor = self.nodes[current as usize].link().next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, Copy)]
    struct Node {
        link: Link,
        key: u8,
    }

    impl Linked for Node {
        fn link(&self) -> &Link {
            &self.link
        }
        fn link_mut(&mut self) -> &mut Link {
            &mut self.link
        }
    }

    fn collect(list: &List, nodes: &[Node]) -> ([u16; 8], usize) {
        let mut out = [0u16; 8];
        let mut n = 0;
        for idx in list.iter(nodes) {
            out[n] = idx;
            n += 1;
        }
        (out, n)
    }

    #[test]
    fn test_push_and_pop_order() {
        let mut nodes = [Node::default(); 4];
        let mut list = List::new();
        list.push_back(&mut nodes, 0);
        list.push_back(&mut nodes, 1);
        list.push_front(&mut nodes, 2);
        assert_eq!(list.len(), 3);
        assert_eq!(list.pop_front(&mut nodes), Some(2));
        assert_eq!(list.pop_front(&mut nodes), Some(0));
        assert_eq!(list.pop_front(&mut nodes), Some(1));
        assert_eq!(list.pop_front(&mut nodes), None);
        assert!(list.is_empty());
        assert!(!nodes[1].link.is_linked());
    }

    #[test]
    fn test_remove_middle_head_tail() {
        let mut nodes = [Node::default(); 5];
        let mut list = List::new();
        for i in 0..5 {
            list.push_back(&mut nodes, i);
        }
        list.remove(&mut nodes, 2);
        list.remove(&mut nodes, 0);
        list.remove(&mut nodes, 4);
        let (order, n) = collect(&list, &nodes);
        assert_eq!(&order[..n], &[1, 3]);
        assert_eq!(list.head(), Some(1));
        assert_eq!(list.tail(), Some(3));
    }

    #[test]
    fn test_rotate() {
        let mut nodes = [Node::default(); 3];
        let mut list = List::new();
        for i in 0..3 {
            list.push_back(&mut nodes, i);
        }
        list.rotate(&mut nodes);
        let (order, n) = collect(&list, &nodes);
        assert_eq!(&order[..n], &[1, 2, 0]);
    }

    #[test]
    fn test_sorted_insert_is_stable() {
        let mut nodes = [Node::default(); 5];
        let keys = [3, 1, 3, 2, 1];
        for (i, k) in keys.iter().enumerate() {
            nodes[i].key = *k;
        }
        let mut list = List::new();
        for i in 0..5 {
            list.insert_sorted_by(&mut nodes, i, |new, cur| new.key < cur.key);
        }
        let (order, n) = collect(&list, &nodes);
        // Equal keys keep their insertion order.
        assert_eq!(&order[..n], &[1, 4, 3, 0, 2]);
    }
}
