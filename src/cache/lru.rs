use crate::pages::Address;

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Default)]
struct Links {
    prev: Option<Address>,
    next: Option<Address>,
}

/// Doubly linked recency list over page addresses.
///
/// The links live in a map keyed by address instead of inside the pages, so
/// the resident index keeps sole ownership of the page entries.
/// Head is the most recently used page, tail the eviction candidate.
#[derive(Debug, Default)]
pub struct RecencyList {
    links: HashMap<Address, Links>,
    head: Option<Address>,
    tail: Option<Address>,
}

impl RecencyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.links.contains_key(&addr)
    }

    pub fn head(&self) -> Option<Address> {
        self.head
    }

    pub fn tail(&self) -> Option<Address> {
        self.tail
    }

    pub fn push_front(&mut self, addr: Address) {
        assert!(!self.links.contains_key(&addr), "page already in recency list");

        let links = Links {
            prev: None,
            next: self.head,
        };
        match self.head {
            Some(old_head) => self.link_mut(old_head).prev = Some(addr),
            None => self.tail = Some(addr),
        }
        self.head = Some(addr);
        self.links.insert(addr, links);
    }

    pub fn remove(&mut self, addr: Address) -> bool {
        let Some(links) = self.links.remove(&addr) else {
            return false;
        };

        match links.prev {
            Some(prev) => self.link_mut(prev).next = links.next,
            None => self.head = links.next,
        }
        match links.next {
            Some(next) => self.link_mut(next).prev = links.prev,
            None => self.tail = links.prev,
        }
        true
    }

    /// Moves `addr` to the head. Returns false if it is not in the list.
    pub fn touch(&mut self, addr: Address) -> bool {
        if self.head == Some(addr) {
            return true;
        }
        if !self.remove(addr) {
            return false;
        }
        self.push_front(addr);
        true
    }

    /// Most recently used first.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
            from_tail: false,
        }
    }

    /// Least recently used first.
    pub fn iter_from_tail(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.tail,
            from_tail: true,
        }
    }

    fn link_mut(&mut self, addr: Address) -> &mut Links {
        self.links
            .get_mut(&addr)
            .expect("recency list links are corrupted")
    }
}

pub struct Iter<'a> {
    list: &'a RecencyList,
    cursor: Option<Address>,
    from_tail: bool,
}

impl Iterator for Iter<'_> {
    type Item = Address;

    fn next(&mut self) -> Option<Self::Item> {
        let addr = self.cursor?;
        let links = self.list.links.get(&addr)?;
        self.cursor = if self.from_tail {
            links.prev
        } else {
            links.next
        };
        Some(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(list: &RecencyList) -> Vec<Address> {
        list.iter().collect()
    }

    #[test]
    fn recency_order() {
        let mut lru = RecencyList::new();
        lru.push_front(0);
        lru.push_front(4096);
        lru.push_front(8192);
        assert_eq!(order(&lru), vec![8192, 4096, 0]);
        assert_eq!(lru.tail(), Some(0));

        assert!(lru.touch(0));
        assert_eq!(order(&lru), vec![0, 8192, 4096]);
        assert_eq!(lru.tail(), Some(4096));
        assert_eq!(
            lru.iter_from_tail().collect::<Vec<_>>(),
            vec![4096, 8192, 0]
        );
    }

    #[test]
    fn remove_middle_head_and_tail() {
        let mut lru = RecencyList::new();
        for addr in [1, 2, 3, 4] {
            lru.push_front(addr);
        }

        assert!(lru.remove(3));
        assert_eq!(order(&lru), vec![4, 2, 1]);
        assert!(lru.remove(4));
        assert_eq!(lru.head(), Some(2));
        assert!(lru.remove(1));
        assert_eq!(lru.tail(), Some(2));
        assert!(!lru.remove(1));
        assert_eq!(lru.len(), 1);

        assert!(lru.remove(2));
        assert!(lru.is_empty());
        assert_eq!(lru.head(), None);
        assert_eq!(lru.tail(), None);
    }

    #[test]
    fn touch_unknown_page() {
        let mut lru = RecencyList::new();
        lru.push_front(7);
        assert!(!lru.touch(8));
        assert!(lru.touch(7));
        assert_eq!(order(&lru), vec![7]);
    }

    #[test]
    #[should_panic]
    fn double_insert_panics() {
        let mut lru = RecencyList::new();
        lru.push_front(7);
        lru.push_front(7);
    }
}
