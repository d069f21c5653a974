//! Relocation of freshly allocated values.
//!
//! While one instruction is interpreted, new values are appended to a [`ValueTable`] and named by
//! relocation addresses ([`Address::Reloc`]). [`ValueTable::install`] later commits them into a
//! store: a value whose allocation site already owns a cell is joined into that cell, otherwise
//! it gets a fresh cell. All concrete allocations of one site thus collapse into one abstract
//! object.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use log::debug;

use crate::address::{Address, MAX_RELOC};
use crate::error::{Error, Result};
use crate::program::InstIndex;
use crate::set::SetPool;
use crate::store::{Slot, Store};
use crate::utils::{pairing3, MyHash};
use crate::value::Value;

/// Identity of an allocation: the instruction, and for field values the owning object and slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AllocSite {
    pub instruction: InstIndex,
    pub parent: Address,
    pub field: u32,
}

impl MyHash for AllocSite {
    fn hash(&self) -> u64 {
        pairing3(self.instruction as u64, self.parent.hash(), self.field as u64)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Rc<Value>,
    site: AllocSite,
}

#[derive(Debug, Default)]
pub struct ValueTable {
    entries: Vec<Entry>,
}

fn reloc_id(addr: Address) -> Result<usize> {
    match addr {
        Address::Reloc(id) => Ok(id as usize),
        _ => Err(Error::InvalidAddress(addr)),
    }
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every pending value.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Append a value and return its relocation address.
    pub fn allocate(
        &mut self,
        instruction: InstIndex,
        parent: Address,
        field: u32,
        value: Rc<Value>,
    ) -> Result<Address> {
        let id = self.entries.len() as u32;
        if id >= MAX_RELOC {
            return Err(Error::Exhausted("relocation"));
        }
        self.entries.push(Entry {
            value,
            site: AllocSite {
                instruction,
                parent,
                field,
            },
        });
        Ok(Address::Reloc(id))
    }

    fn entry(&self, addr: Address) -> Result<&Entry> {
        let id = reloc_id(addr)?;
        self.entries.get(id).ok_or(Error::InvalidAddress(addr))
    }

    pub fn get(&self, addr: Address) -> Result<&Rc<Value>> {
        self.entry(addr).map(|e| &e.value)
    }

    pub fn get_rw(&mut self, addr: Address) -> Result<&mut Value> {
        let id = reloc_id(addr)?;
        let entry = self.entries.get_mut(id).ok_or(Error::InvalidAddress(addr))?;
        Ok(Rc::make_mut(&mut entry.value))
    }

    pub fn site(&self, addr: Address) -> Result<AllocSite> {
        self.entry(addr).map(|e| e.site)
    }

    /// Commit a relocated value into the store and return its heap address.
    ///
    /// Any other address is returned as is. Relocation addresses the value refers to, in its
    /// elements, its fields, or as its parent, are installed first.
    pub fn install(&self, store: &mut Store, pool: &SetPool, addr: Address) -> Result<Address> {
        Installer {
            table: self,
            store,
            pool,
            done: HashMap::new(),
            parents: HashSet::new(),
        }
        .install(addr)
    }
}

struct Installer<'a> {
    table: &'a ValueTable,
    store: &'a mut Store,
    pool: &'a SetPool,
    /// Already installed relocations.
    done: HashMap<usize, Address>,
    /// Relocations whose parent is being resolved.
    parents: HashSet<usize>,
}

impl Installer<'_> {
    fn install(&mut self, addr: Address) -> Result<Address> {
        let id = match addr {
            Address::Reloc(id) => id as usize,
            _ => return Ok(addr),
        };
        if let Some(&installed) = self.done.get(&id) {
            return Ok(installed);
        }
        let entry = self.table.entry(addr)?.clone();

        if !self.parents.insert(id) {
            return Err(Error::InvalidAddress(addr));
        }
        let parent = self.install(entry.site.parent);
        self.parents.remove(&id);
        let site = AllocSite {
            parent: parent?,
            ..entry.site
        };

        let slot = self.store.reserve(&site)?;
        let target = slot.address();
        self.done.insert(id, target);
        if let Slot::Fresh(_) = slot {
            // Claim the cell so that nested installs can not reserve it for another site.
            self.store.put(target, Value::empty_set(self.pool), Some(site))?;
        }

        let pool = self.pool;
        let value = entry.value.map_addresses(pool, |a| self.install(a))?;
        match slot {
            Slot::Existing(_) => {
                let changed = self.store.get_rw(target)?.join(&value, pool)?;
                debug!("install {} by joining into {} (changed: {})", addr, target, changed);
            }
            Slot::Fresh(_) => {
                self.store.put(target, Rc::new(value), Some(site))?;
                debug!("install {} into fresh cell {}", addr, target);
            }
        }
        Ok(target)
    }
}
