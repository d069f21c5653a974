//! Block-allocated store with copy-on-write forks.
//!
//! Cells are grouped in blocks of [`BLOCK_SIZE`] offsets. A store holds its blocks through [`Rc`],
//! so [`Store::fork`] only copies the block list; a block is copied the first time one of the two
//! stores writes into it.
//!
//! A cell created by the relocation protocol remembers its [`AllocSite`]. The site hash picks the
//! preferred offset, and [`ALLOC_ATTEMPT`] consecutive offsets of every block are probed before a
//! new block is opened.

use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;

use crate::address::{Address, MAX_BLOCKS, OFFSET_BITS};
use crate::error::{Error, Result};
use crate::reloc::AllocSite;
use crate::set::SetPool;
use crate::utils::{pairing2, MyHash};
use crate::value::Value;

/// Number of cells in a block.
pub const BLOCK_SIZE: u32 = 1 << OFFSET_BITS;
/// Number of offsets probed per block when placing an allocation site.
pub const ALLOC_ATTEMPT: u32 = 5;
/// Hash of a store without cells.
pub const EMPTY_HASH: u64 = 0x547f_6a73;

#[derive(Debug, Clone)]
pub struct Cell {
    pub value: Rc<Value>,
    pub site: Option<AllocSite>,
}

#[derive(Debug, Clone, Default)]
struct Block {
    cells: BTreeMap<u32, Cell>,
}

/// Where an allocation site lives in a store.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Slot {
    /// A cell created by the same site already exists.
    Existing(Address),
    /// Free cell to place the site in.
    Fresh(Address),
}

impl Slot {
    pub fn address(self) -> Address {
        match self {
            Slot::Existing(addr) | Slot::Fresh(addr) => addr,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Store {
    blocks: Vec<Rc<Block>>,
}

fn locate(addr: Address) -> Result<(usize, u32)> {
    match addr {
        Address::Heap { block, offset } => Ok((block as usize, offset)),
        _ => Err(Error::InvalidAddress(addr)),
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// New store sharing every block with this one.
    pub fn fork(&self) -> Store {
        debug!("fork store with {} blocks", self.blocks.len());
        self.clone()
    }

    /// Number of allocated blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.cells.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.cells.is_empty())
    }

    fn cell(&self, addr: Address) -> Result<&Cell> {
        let (block, offset) = locate(addr)?;
        self.blocks
            .get(block)
            .ok_or(Error::InvalidAddress(addr))?
            .cells
            .get(&offset)
            .ok_or(Error::Unoccupied(addr))
    }

    /// Read-only access to the value at `addr`.
    pub fn get_ro(&self, addr: Address) -> Result<&Rc<Value>> {
        self.cell(addr).map(|cell| &cell.value)
    }

    /// Writable access to the value at `addr`. Copies the block and the value if they are shared.
    pub fn get_rw(&mut self, addr: Address) -> Result<&mut Value> {
        let (block, offset) = locate(addr)?;
        let block = self.blocks.get_mut(block).ok_or(Error::InvalidAddress(addr))?;
        if !block.cells.contains_key(&offset) {
            return Err(Error::Unoccupied(addr));
        }
        let cell = Rc::make_mut(block)
            .cells
            .get_mut(&offset)
            .ok_or(Error::Unoccupied(addr))?;
        Ok(Rc::make_mut(&mut cell.value))
    }

    /// Allocation site of the cell at `addr`.
    pub fn site(&self, addr: Address) -> Option<AllocSite> {
        self.cell(addr).ok()?.site
    }

    /// Store a value, replacing the previous one. Returns the replaced value.
    pub fn put(&mut self, addr: Address, value: Rc<Value>, site: Option<AllocSite>) -> Result<Option<Rc<Value>>> {
        let (block, offset) = locate(addr)?;
        if block >= MAX_BLOCKS as usize {
            return Err(Error::InvalidAddress(addr));
        }
        while self.blocks.len() <= block {
            self.blocks.push(Rc::default());
        }
        let old = Rc::make_mut(&mut self.blocks[block])
            .cells
            .insert(offset, Cell { value, site });
        Ok(old.map(|cell| cell.value))
    }

    /// Find the cell of an allocation site, or a free cell for it.
    ///
    /// All blocks are searched for an existing cell of the site first. Otherwise the first free
    /// probed offset wins, and if every probed offset is taken the slot lands in a new block.
    pub fn reserve(&self, site: &AllocSite) -> Result<Slot> {
        let base = (site.hash() % BLOCK_SIZE as u64) as u32;
        let mut free = None;
        for (block, b) in self.blocks.iter().enumerate() {
            for attempt in 0..ALLOC_ATTEMPT {
                let offset = (base + attempt) % BLOCK_SIZE;
                match b.cells.get(&offset) {
                    Some(cell) if cell.site.as_ref() == Some(site) => {
                        return Ok(Slot::Existing(Address::heap(block as u32, offset)));
                    }
                    None if free.is_none() => free = Some(Address::heap(block as u32, offset)),
                    _ => {}
                }
            }
        }
        if let Some(addr) = free {
            return Ok(Slot::Fresh(addr));
        }
        let block = self.blocks.len() as u32;
        if block >= MAX_BLOCKS {
            return Err(Error::Exhausted("store"));
        }
        Ok(Slot::Fresh(Address::heap(block, base)))
    }

    /// Iterate over occupied cells in address order.
    pub fn iter(&self) -> impl Iterator<Item = (Address, &Cell)> {
        self.blocks.iter().enumerate().flat_map(|(block, b)| {
            b.cells
                .iter()
                .map(move |(&offset, cell)| (Address::heap(block as u32, offset), cell))
        })
    }

    /// Order-independent hash over all cells.
    pub fn hash(&self, pool: &SetPool) -> u64 {
        self.iter().fold(EMPTY_HASH, |h, (addr, cell)| {
            h.wrapping_add(pairing2(addr.hash(), cell.value.hash(pool)))
        })
    }

    /// Whether both stores hold equal values at the same addresses.
    pub fn equal(&self, other: &Store) -> bool {
        let nonempty = |s: &Store| s.blocks.iter().rposition(|b| !b.cells.is_empty()).map_or(0, |i| i + 1);
        let n = nonempty(self);
        if n != nonempty(other) {
            return false;
        }
        self.blocks[..n].iter().zip(&other.blocks[..n]).all(|(a, b)| {
            Rc::ptr_eq(a, b)
                || (a.cells.len() == b.cells.len()
                    && a.cells.iter().zip(&b.cells).all(|((oa, ca), (ob, cb))| {
                        oa == ob && ca.site == cb.site && Value::equal(&ca.value, &cb.value)
                    }))
        })
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::address::Sign;

    fn site(instruction: u32) -> AllocSite {
        AllocSite {
            instruction,
            parent: Address::Null,
            field: 0,
        }
    }

    #[test]
    fn test_put_get() -> Result<()> {
        let pool = SetPool::default();
        let mut store = Store::new();
        let addr = Address::heap(0, 7);
        let set = pool.singleton(Address::Const(Sign::ZERO));
        assert!(store.put(addr, Value::set(set), None)?.is_none());
        assert_eq!(store.get_ro(addr)?.as_set(), Some(set));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn test_addressing_errors() {
        let pool = SetPool::default();
        let mut store = Store::new();
        assert_eq!(store.get_ro(Address::Null).err(), Some(Error::InvalidAddress(Address::Null)));
        let c = Address::Const(Sign::TOP);
        assert_eq!(store.get_ro(c).err(), Some(Error::InvalidAddress(c)));
        assert_eq!(store.get_rw(Address::Reloc(1)).err(), Some(Error::InvalidAddress(Address::Reloc(1))));
        let far = Address::heap(3, 0);
        assert_eq!(store.get_ro(far).err(), Some(Error::InvalidAddress(far)));
        store.put(Address::heap(0, 0), Value::empty_set(&pool), None).unwrap();
        let hole = Address::heap(0, 1);
        assert_eq!(store.get_ro(hole).err(), Some(Error::Unoccupied(hole)));
        assert_eq!(store.get_rw(hole).err(), Some(Error::Unoccupied(hole)));
    }

    #[test]
    fn test_fork_isolation() -> Result<()> {
        let pool = SetPool::default();
        let addr = Address::heap(0, 1);
        let a = pool.singleton(Address::Const(Sign::POSITIVE));
        let b = pool.singleton(Address::Const(Sign::NEGATIVE));

        let mut store1 = Store::new();
        store1.put(addr, Value::set(a), None)?;
        let mut store2 = store1.fork();
        assert!(store1.equal(&store2));

        *store2.get_rw(addr)? = Value::Set(b);
        assert_eq!(store1.get_ro(addr)?.as_set(), Some(a));
        assert_eq!(store2.get_ro(addr)?.as_set(), Some(b));

        store1.put(Address::heap(0, 2), Value::set(b), None)?;
        assert!(store2.get_ro(Address::heap(0, 2)).is_err());
        assert!(!store1.equal(&store2));
        Ok(())
    }

    #[test]
    fn test_untouched_blocks_shared() -> Result<()> {
        let pool = SetPool::default();
        let mut store1 = Store::new();
        store1.put(Address::heap(0, 0), Value::empty_set(&pool), None)?;
        store1.put(Address::heap(1, 0), Value::empty_set(&pool), None)?;
        let mut store2 = store1.fork();
        store2.put(Address::heap(1, 1), Value::empty_set(&pool), None)?;
        assert!(Rc::ptr_eq(&store1.blocks[0], &store2.blocks[0]));
        assert!(!Rc::ptr_eq(&store1.blocks[1], &store2.blocks[1]));
        Ok(())
    }

    #[test]
    fn test_reserve() -> Result<()> {
        let pool = SetPool::default();
        let mut store = Store::new();
        let s = site(3);

        let slot = store.reserve(&s)?;
        assert!(matches!(slot, Slot::Fresh(Address::Heap { block: 0, .. })));
        store.put(slot.address(), Value::empty_set(&pool), Some(s))?;
        assert_eq!(store.reserve(&s)?, Slot::Existing(slot.address()));
        assert_eq!(store.site(slot.address()), Some(s));

        let other = store.reserve(&site(4))?;
        assert!(matches!(other, Slot::Fresh(_)));
        assert_ne!(other.address(), slot.address());
        Ok(())
    }

    #[test]
    fn test_reserve_opens_block_when_probes_taken() -> Result<()> {
        let pool = SetPool::default();
        let mut store = Store::new();
        let s = site(9);
        let base = (s.hash() % BLOCK_SIZE as u64) as u32;
        for attempt in 0..ALLOC_ATTEMPT {
            let offset = (base + attempt) % BLOCK_SIZE;
            store.put(Address::heap(0, offset), Value::empty_set(&pool), None)?;
        }
        assert_eq!(store.reserve(&s)?, Slot::Fresh(Address::heap(1, base)));
        Ok(())
    }

    #[test]
    fn test_hash_order_independent() -> Result<()> {
        let pool = SetPool::default();
        let x = pool.singleton(Address::Const(Sign::ZERO));
        let mut s1 = Store::new();
        let mut s2 = Store::new();
        assert_eq!(s1.hash(&pool), EMPTY_HASH);
        s1.put(Address::heap(0, 1), Value::set(x), None)?;
        s1.put(Address::heap(2, 5), Value::empty_set(&pool), None)?;
        s2.put(Address::heap(2, 5), Value::empty_set(&pool), None)?;
        s2.put(Address::heap(0, 1), Value::set(x), None)?;
        assert_eq!(s1.hash(&pool), s2.hash(&pool));
        assert!(s1.equal(&s2));
        Ok(())
    }
}
