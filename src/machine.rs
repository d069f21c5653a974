//! Shared context of one analysis.
//!
//! ```
//! use cesk_rs::address::{Address, Sign};
//! use cesk_rs::class::ClassTable;
//! use cesk_rs::machine::Machine;
//!
//! let classes = ClassTable::new();
//! let m = Machine::new(&classes);
//! let zero = m.sets().singleton(Address::Const(Sign::ZERO));
//! assert_eq!(m.sets().len(zero), 1);
//! assert!(m.values().is_empty());
//! ```

use std::cell::{RefCell, RefMut};
use std::fmt;

use crate::class::ClassRegistry;
use crate::reloc::ValueTable;
use crate::set::SetPool;

/// Shared state of one analysis: the set pool, the relocation table of the step in progress and
/// the class metadata.
///
/// Frames and stores only hold handles ([`SetRef`][crate::set::SetRef]s and addresses) and are
/// meaningless without the machine that issued them.
pub struct Machine<'c> {
    classes: &'c dyn ClassRegistry,
    sets: SetPool,
    values: RefCell<ValueTable>,
}

impl<'c> Machine<'c> {
    pub fn new(classes: &'c dyn ClassRegistry) -> Self {
        Self::with_pool_bits(classes, 10)
    }

    /// Machine with `2^bits` initial buckets in the set pool.
    pub fn with_pool_bits(classes: &'c dyn ClassRegistry, bits: usize) -> Self {
        Self {
            classes,
            sets: SetPool::new(bits),
            values: RefCell::new(ValueTable::new()),
        }
    }

    pub fn classes(&self) -> &'c dyn ClassRegistry {
        self.classes
    }

    pub fn sets(&self) -> &SetPool {
        &self.sets
    }

    /// Relocation table of the step in progress.
    pub fn values(&self) -> RefMut<'_, ValueTable> {
        self.values.borrow_mut()
    }
}

impl fmt::Debug for Machine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("sets", &self.sets)
            .field("pending", &self.values.borrow().len())
            .finish()
    }
}
