//! One state of the abstract machine: a register file over a store.
//!
//! Every register holds a [`SetRef`]. Two registers past the method's own registers are reserved:
//! the result register written by invocations and the exception register.

use std::fmt;

use log::debug;

use crate::address::{Address, Sign};
use crate::error::{Error, Result};
use crate::machine::Machine;
use crate::program::InstIndex;
use crate::set::SetRef;
use crate::store::Store;
use crate::utils::pairing2;
use crate::value::Value;

/// Seed of [`Frame::hash`].
pub const INIT_HASH: u64 = 0xa3ef_ab97;

#[derive(Debug, Clone)]
pub struct Frame {
    registers: Vec<SetRef>,
    store: Store,
}

impl Frame {
    /// Frame with `nregs` general registers, all empty, over an empty store.
    pub fn new(nregs: usize, m: &Machine) -> Self {
        Self {
            registers: vec![m.sets().empty(); nregs + 2],
            store: Store::new(),
        }
    }

    /// Number of registers, reserved ones included.
    pub fn size(&self) -> usize {
        self.registers.len()
    }

    /// Number of general registers.
    pub fn nregs(&self) -> usize {
        self.registers.len() - 2
    }

    pub fn result_register(&self) -> usize {
        self.nregs()
    }

    pub fn exception_register(&self) -> usize {
        self.nregs() + 1
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Independent copy: the register file is copied, the store is forked.
    pub fn fork(&self) -> Frame {
        Frame {
            registers: self.registers.clone(),
            store: self.store.fork(),
        }
    }

    fn check(&self, reg: usize) -> Result<usize> {
        if reg < self.registers.len() {
            Ok(reg)
        } else {
            Err(Error::RegisterOutOfRange {
                register: reg,
                size: self.registers.len(),
            })
        }
    }

    pub fn register(&self, reg: usize) -> Result<SetRef> {
        Ok(self.registers[self.check(reg)?])
    }

    /// Iterate over the registers in index order.
    pub fn registers(&self) -> impl Iterator<Item = SetRef> + '_ {
        self.registers.iter().copied()
    }

    /// Replace the register with the set of a single address. Null and the empty sign constant
    /// clear the register.
    pub fn register_load(&mut self, m: &Machine, inst: InstIndex, reg: usize, addr: Address) -> Result<()> {
        let reg = self.check(reg)?;
        if addr.is_reloc() {
            return Err(Error::InvalidAddress(addr));
        }
        debug!("#{}: load {} into register {}", inst, addr, reg);
        self.registers[reg] = if addr.is_null() || addr == Address::Const(Sign::EMPTY) {
            m.sets().empty()
        } else {
            m.sets().singleton(addr)
        };
        Ok(())
    }

    /// Replace the register directly with a set.
    pub fn register_set(&mut self, reg: usize, set: SetRef) -> Result<()> {
        let reg = self.check(reg)?;
        self.registers[reg] = set;
        Ok(())
    }

    fn stored_set(&self, addr: Address) -> Result<SetRef> {
        self.store
            .get_ro(addr)?
            .as_set()
            .ok_or(Error::UnexpectedValue {
                address: addr,
                expected: "set",
            })
    }

    /// Replace the register with the set stored at `addr`.
    pub fn register_load_from_store(&mut self, inst: InstIndex, reg: usize, addr: Address) -> Result<()> {
        let reg = self.check(reg)?;
        let set = self.stored_set(addr)?;
        debug!("#{}: load set at {} into register {}", inst, addr, reg);
        self.registers[reg] = set;
        Ok(())
    }

    /// Add the addresses of the set stored at `addr` to the register.
    pub fn register_append_from_store(
        &mut self,
        m: &Machine,
        inst: InstIndex,
        reg: usize,
        addr: Address,
    ) -> Result<()> {
        let reg = self.check(reg)?;
        let set = self.stored_set(addr)?;
        debug!("#{}: append set at {} to register {}", inst, addr, reg);
        self.registers[reg] = m.sets().union(self.registers[reg], set);
        Ok(())
    }

    pub fn register_move(&mut self, inst: InstIndex, dest: usize, src: usize) -> Result<()> {
        let dest = self.check(dest)?;
        let src = self.check(src)?;
        debug!("#{}: move register {} to register {}", inst, src, dest);
        self.registers[dest] = self.registers[src];
        Ok(())
    }

    pub fn register_clear(&mut self, m: &Machine, inst: InstIndex, reg: usize) -> Result<()> {
        let reg = self.check(reg)?;
        debug!("#{}: clear register {}", inst, reg);
        self.registers[reg] = m.sets().empty();
        Ok(())
    }

    /// Allocate an object of the class at the allocation site of `inst`.
    ///
    /// If the site already owns a cell, the fresh object is joined into it and the existing
    /// address is returned.
    pub fn store_new_object(&mut self, m: &Machine, inst: InstIndex, classpath: &str) -> Result<Address> {
        let value = Value::new_object(m.classes(), classpath)?;
        let mut values = m.values();
        let reloc = values.allocate(inst, Address::Null, 0, value)?;
        let installed = values.install(&mut self.store, m.sets(), reloc);
        values.clear();
        let addr = installed?;
        debug!("#{}: new object of {} at {}", inst, classpath, addr);
        Ok(addr)
    }

    /// Address of the set held by field `classpath/field` of the object at `obj_addr`.
    /// Null if the field has never been written.
    pub fn store_object_get(&self, obj_addr: Address, classpath: &str, field: &str) -> Result<Address> {
        self.store
            .get_ro(obj_addr)?
            .as_object()
            .ok_or(Error::UnexpectedValue {
                address: obj_addr,
                expected: "object",
            })?
            .get(classpath, field)
    }

    /// Add the set of `src_reg` to field `classpath/field` of the object at `obj_addr`.
    ///
    /// The field is never overwritten: the object may stand for many concrete objects. The first
    /// write creates the field's set cell at the allocation site `(inst, obj_addr, slot)`.
    pub fn store_object_put(
        &mut self,
        m: &Machine,
        inst: InstIndex,
        obj_addr: Address,
        classpath: &str,
        field: &str,
        src_reg: usize,
    ) -> Result<()> {
        let src = self.register(src_reg)?;
        let not_object = Error::UnexpectedValue {
            address: obj_addr,
            expected: "object",
        };
        let obj = self.store.get_ro(obj_addr)?.as_object().ok_or(not_object.clone())?;
        let slot = obj.slot(classpath, field)?;
        let field_addr = obj.field(slot).unwrap_or_default();

        if field_addr.is_null() {
            let mut values = m.values();
            let reloc = values.allocate(inst, obj_addr, slot, Value::set(src))?;
            let installed = values.install(&mut self.store, m.sets(), reloc);
            values.clear();
            let installed = installed?;
            debug!("#{}: field {}/{} of {} created at {}", inst, classpath, field, obj_addr, installed);
            self.store
                .get_rw(obj_addr)?
                .as_object_mut()
                .ok_or(not_object)?
                .set_field(slot, installed)
        } else {
            debug!("#{}: field {}/{} of {} joined at {}", inst, classpath, field, obj_addr, field_addr);
            self.store.get_rw(field_addr)?.join(&Value::Set(src), m.sets())?;
            Ok(())
        }
    }

    /// Hash over the register sets and the store.
    pub fn hash(&self, m: &Machine) -> u64 {
        let h = self
            .registers
            .iter()
            .fold(INIT_HASH, |h, &set| pairing2(h, m.sets().hash(set)));
        pairing2(h, self.store.hash(m.sets()))
    }

    pub fn equal(&self, other: &Frame) -> bool {
        self.registers == other.registers && self.store.equal(&other.store)
    }

    pub fn display<'a>(&'a self, m: &'a Machine) -> FrameDisplay<'a> {
        FrameDisplay { frame: self, m }
    }
}

pub struct FrameDisplay<'a> {
    frame: &'a Frame,
    m: &'a Machine<'a>,
}

impl fmt::Display for FrameDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sets = self.m.sets();
        for (i, &set) in self.frame.registers.iter().enumerate() {
            if sets.is_empty(set) {
                continue;
            }
            let name = if i == self.frame.result_register() {
                "result".to_string()
            } else if i == self.frame.exception_register() {
                "exception".to_string()
            } else {
                format!("v{}", i)
            };
            writeln!(f, "{} = {}", name, sets.display(set))?;
        }
        for (addr, cell) in self.frame.store.iter() {
            writeln!(f, "{} = {}", addr, cell.value.display(sets))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::class::ClassTable;

    fn classes() -> ClassTable {
        let mut classes = ClassTable::new();
        classes.define("a/Foo", Some("java/lang/Object"), &["x", "y"]);
        classes
    }

    #[test]
    fn test_reserved_registers() {
        let classes = classes();
        let m = Machine::new(&classes);
        let frame = Frame::new(3, &m);
        assert_eq!(frame.size(), 5);
        assert_eq!(frame.result_register(), 3);
        assert_eq!(frame.exception_register(), 4);
        assert_eq!(
            frame.register(5),
            Err(Error::RegisterOutOfRange { register: 5, size: 5 })
        );
    }

    #[test]
    fn test_register_load() -> Result<()> {
        let classes = classes();
        let m = Machine::new(&classes);
        let mut frame = Frame::new(2, &m);
        let c = Address::Const(Sign::POSITIVE);
        frame.register_load(&m, 0, 0, c)?;
        assert_eq!(frame.register(0)?, m.sets().singleton(c));
        frame.register_move(0, 1, 0)?;
        assert_eq!(frame.register(1)?, frame.register(0)?);
        frame.register_load(&m, 0, 0, Address::Null)?;
        assert!(m.sets().is_empty(frame.register(0)?));
        frame.register_clear(&m, 0, 1)?;
        assert!(m.sets().is_empty(frame.register(1)?));
        assert!(frame.register_load(&m, 0, 0, Address::Reloc(0)).is_err());
        assert!(frame.register_move(0, 7, 0).is_err());
        Ok(())
    }

    #[test]
    fn test_register_load_empty_constant() -> Result<()> {
        let classes = classes();
        let m = Machine::new(&classes);
        let mut frame = Frame::new(1, &m);
        frame.register_load(&m, 0, 0, Address::Const(Sign::ZERO))?;
        frame.register_load(&m, 1, 0, Address::Const(Sign::EMPTY))?;
        assert!(m.sets().is_empty(frame.register(0)?));
        assert!(!m.sets().contains(frame.register(0)?, Address::Const(Sign::EMPTY)));
        Ok(())
    }

    #[test]
    fn test_new_object_summarized() -> Result<()> {
        let classes = classes();
        let m = Machine::new(&classes);
        let mut frame = Frame::new(2, &m);
        let a = frame.store_new_object(&m, 4, "a/Foo")?;
        let b = frame.store_new_object(&m, 4, "a/Foo")?;
        let c = frame.store_new_object(&m, 5, "a/Foo")?;
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(frame.store().len(), 2);
        assert!(m.values().is_empty());
        assert_eq!(
            frame.store_new_object(&m, 6, "a/Nope"),
            Err(Error::UnknownClass("a/Nope".to_string()))
        );
        Ok(())
    }

    #[test]
    fn test_object_put_joins() -> Result<()> {
        let classes = classes();
        let m = Machine::new(&classes);
        let mut frame = Frame::new(2, &m);
        let obj = frame.store_new_object(&m, 0, "a/Foo")?;
        let pos = Address::Const(Sign::POSITIVE);
        let neg = Address::Const(Sign::NEGATIVE);

        assert!(frame.store_object_get(obj, "a/Foo", "x")?.is_null());
        frame.register_load(&m, 1, 1, pos)?;
        frame.store_object_put(&m, 1, obj, "a/Foo", "x", 1)?;
        let field = frame.store_object_get(obj, "a/Foo", "x")?;
        assert!(field.is_heap());

        frame.register_load(&m, 2, 1, neg)?;
        frame.store_object_put(&m, 2, obj, "a/Foo", "x", 1)?;
        assert_eq!(frame.store_object_get(obj, "a/Foo", "x")?, field);

        frame.register_load_from_store(3, 0, field)?;
        assert_eq!(frame.register(0)?, m.sets().from_addresses([pos, neg]));
        Ok(())
    }

    #[test]
    fn test_object_put_errors() -> Result<()> {
        let classes = classes();
        let m = Machine::new(&classes);
        let mut frame = Frame::new(2, &m);
        let obj = frame.store_new_object(&m, 0, "a/Foo")?;
        assert!(matches!(
            frame.store_object_put(&m, 1, obj, "a/Foo", "z", 0),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(
            frame.store_object_put(&m, 1, Address::Null, "a/Foo", "x", 0),
            Err(Error::InvalidAddress(Address::Null))
        ));
        assert!(frame.store_object_put(&m, 1, obj, "a/Foo", "x", 9).is_err());
        Ok(())
    }

    #[test]
    fn test_append_from_store() -> Result<()> {
        let classes = classes();
        let m = Machine::new(&classes);
        let mut frame = Frame::new(1, &m);
        let a = Address::heap(0, 1);
        let b = Address::heap(0, 2);
        let x = Address::Const(Sign::ZERO);
        let y = Address::Const(Sign::POSITIVE);
        frame.store_mut().put(a, Value::set(m.sets().singleton(x)), None)?;
        frame.store_mut().put(b, Value::set(m.sets().singleton(y)), None)?;
        frame.register_append_from_store(&m, 0, 0, a)?;
        frame.register_append_from_store(&m, 0, 0, b)?;
        assert_eq!(frame.register(0)?, m.sets().from_addresses([x, y]));

        let obj = frame.store_new_object(&m, 0, "a/Foo")?;
        assert_eq!(
            frame.register_append_from_store(&m, 0, 0, obj),
            Err(Error::UnexpectedValue {
                address: obj,
                expected: "set"
            })
        );
        Ok(())
    }

    #[test]
    fn test_fork_independence() -> Result<()> {
        let classes = classes();
        let m = Machine::new(&classes);
        let mut f1 = Frame::new(2, &m);
        let obj = f1.store_new_object(&m, 0, "a/Foo")?;
        f1.register_load(&m, 0, 0, obj)?;

        let mut f2 = f1.fork();
        assert!(f1.equal(&f2));
        assert_eq!(f1.hash(&m), f2.hash(&m));

        f2.register_load(&m, 1, 1, Address::Const(Sign::TOP))?;
        f2.store_object_put(&m, 2, obj, "a/Foo", "y", 1)?;

        assert!(m.sets().is_empty(f1.register(1)?));
        assert!(f1.store_object_get(obj, "a/Foo", "y")?.is_null());
        assert!(!f2.store_object_get(obj, "a/Foo", "y")?.is_null());
        assert!(!f1.equal(&f2));
        assert_ne!(f1.hash(&m), f2.hash(&m));
        Ok(())
    }
}
