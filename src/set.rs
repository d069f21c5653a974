//! Hash-consed sets of addresses.
//!
//! Every register and every set-valued store cell holds a set of addresses: abstraction means "the
//! location may be any one of these". Sets are immutable and interned in a [`SetPool`], and are
//! passed around as lightweight [`SetRef`] handles. Since structurally equal sets are interned
//! once, set equality is handle equality.
//!
//! The hash of a set is the wrapping sum of the hashes of its elements, seeded with
//! [`EMPTY_HASH`]. It therefore does not depend on insertion order and can be updated in constant
//! time when a single element is added.

use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use log::debug;

use crate::address::Address;
use crate::cache::Cache;
use crate::table::Table;
use crate::utils::{pairing2, MyHash};

/// Hash of the empty set.
pub const EMPTY_HASH: u64 = 0x9c7c_ba63;

/// Handle of an interned set. Only meaningful together with the [`SetPool`] that issued it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SetRef(u32);

impl SetRef {
    /// Return the index of the set in its pool.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl MyHash for (SetRef, SetRef) {
    fn hash(&self) -> u64 {
        pairing2(self.0 .0 as u64, self.1 .0 as u64)
    }
}

impl Display for SetRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "set@{}", self.0)
    }
}

#[derive(Debug, Clone, Eq)]
struct SetNode {
    /// Sorted, duplicate-free.
    elements: Rc<[Address]>,
    hash: u64,
}

impl SetNode {
    fn new(elements: Vec<Address>) -> Self {
        debug_assert!(elements.windows(2).all(|w| w[0] < w[1]));
        let hash = elements
            .iter()
            .fold(EMPTY_HASH, |h, a| h.wrapping_add(MyHash::hash(a)));
        Self {
            elements: elements.into(),
            hash,
        }
    }
}

impl Default for SetNode {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PartialEq for SetNode {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.elements == other.elements
    }
}

impl MyHash for SetNode {
    fn hash(&self) -> u64 {
        self.hash
    }
}

/// Restartable iterator over the elements of a set, in address order.
#[derive(Debug, Clone)]
pub struct SetIter {
    elements: Rc<[Address]>,
    position: usize,
}

impl SetIter {
    /// Rewind to the first element.
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for SetIter {
    type Item = Address;

    fn next(&mut self) -> Option<Address> {
        let item = self.elements.get(self.position).copied();
        if item.is_some() {
            self.position += 1;
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.elements.len() - self.position;
        (n, Some(n))
    }
}

impl ExactSizeIterator for SetIter {}

/// Manager of interned address sets.
pub struct SetPool {
    table: RefCell<Table<SetNode>>,
    union_cache: RefCell<Cache<(SetRef, SetRef), SetRef>>,
    empty: SetRef,
}

impl SetPool {
    pub fn new(bits: usize) -> Self {
        let mut table = Table::new(bits);
        let empty = SetRef(table.put(SetNode::default()) as u32);
        Self {
            table: RefCell::new(table),
            union_cache: RefCell::new(Cache::new(bits)),
            empty,
        }
    }
}

impl Default for SetPool {
    fn default() -> Self {
        SetPool::new(10)
    }
}

impl std::fmt::Debug for SetPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let table = self.table.borrow();
        let cache = self.union_cache.borrow();
        f.debug_struct("SetPool")
            .field("sets", &table.len())
            .field("buckets", &table.buckets())
            .field("union_hits", &cache.hits())
            .field("union_misses", &cache.misses())
            .finish()
    }
}

impl SetPool {
    fn intern(&self, node: SetNode) -> SetRef {
        let index = self.table.borrow_mut().put(node);
        SetRef(index as u32)
    }

    fn elements(&self, set: SetRef) -> Rc<[Address]> {
        Rc::clone(&self.table.borrow().value(set.index()).elements)
    }

    /// Number of distinct sets interned so far.
    pub fn size(&self) -> usize {
        self.table.borrow().len()
    }

    /// The canonical empty set.
    pub fn empty(&self) -> SetRef {
        self.empty
    }

    pub fn singleton(&self, addr: Address) -> SetRef {
        self.insert(self.empty, addr)
    }

    /// Build a set from arbitrary addresses; duplicates are dropped.
    pub fn from_addresses(&self, addrs: impl IntoIterator<Item = Address>) -> SetRef {
        let mut elements: Vec<Address> = addrs.into_iter().collect();
        elements.sort_unstable();
        elements.dedup();
        self.intern(SetNode::new(elements))
    }

    /// Add an address. Returns the same handle if the address is already present.
    pub fn insert(&self, set: SetRef, addr: Address) -> SetRef {
        let table = self.table.borrow();
        let node = table.value(set.index());
        let position = match node.elements.binary_search(&addr) {
            Ok(_) => return set,
            Err(position) => position,
        };
        let mut elements = Vec::with_capacity(node.elements.len() + 1);
        elements.extend_from_slice(&node.elements[..position]);
        elements.push(addr);
        elements.extend_from_slice(&node.elements[position..]);
        let new = SetNode {
            elements: elements.into(),
            hash: node.hash.wrapping_add(MyHash::hash(&addr)),
        };
        drop(table);
        self.intern(new)
    }

    pub fn union(&self, a: SetRef, b: SetRef) -> SetRef {
        if a == b || b == self.empty {
            return a;
        }
        if a == self.empty {
            return b;
        }

        let key = if a < b { (a, b) } else { (b, a) };
        if let Some(result) = self.union_cache.borrow_mut().get(&key) {
            return result;
        }

        let xs = self.elements(a);
        let ys = self.elements(b);
        let mut elements = Vec::with_capacity(xs.len() + ys.len());
        let (mut i, mut j) = (0, 0);
        while i < xs.len() && j < ys.len() {
            match xs[i].cmp(&ys[j]) {
                std::cmp::Ordering::Less => {
                    elements.push(xs[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    elements.push(ys[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    elements.push(xs[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        elements.extend_from_slice(&xs[i..]);
        elements.extend_from_slice(&ys[j..]);

        let result = self.intern(SetNode::new(elements));
        debug!("union(a = {}, b = {}) -> {}", a, b, result);
        self.union_cache.borrow_mut().insert(key, result);
        result
    }

    pub fn contains(&self, set: SetRef, addr: Address) -> bool {
        self.table.borrow().value(set.index()).elements.binary_search(&addr).is_ok()
    }

    pub fn len(&self, set: SetRef) -> usize {
        self.table.borrow().value(set.index()).elements.len()
    }

    pub fn is_empty(&self, set: SetRef) -> bool {
        set == self.empty
    }

    pub fn iter(&self, set: SetRef) -> SetIter {
        SetIter {
            elements: self.elements(set),
            position: 0,
        }
    }

    /// Structural equality; sets are hash-consed, so this is handle equality.
    pub fn equal(&self, a: SetRef, b: SetRef) -> bool {
        a == b
    }

    /// Cached hash of the set.
    pub fn hash(&self, set: SetRef) -> u64 {
        self.table.borrow().value(set.index()).hash
    }

    /// Hash recomputed from the elements, bypassing the cached value.
    pub fn compute_hash(&self, set: SetRef) -> u64 {
        self.elements(set)
            .iter()
            .fold(EMPTY_HASH, |h, a| h.wrapping_add(MyHash::hash(a)))
    }

    /// Adapter to print a set as `{a, b, ...}`.
    pub fn display(&self, set: SetRef) -> SetDisplay {
        SetDisplay {
            elements: self.elements(set),
        }
    }
}

pub struct SetDisplay {
    elements: Rc<[Address]>,
}

impl Display for SetDisplay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, addr) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", addr)?;
        }
        write!(f, "}}")
    }
}
