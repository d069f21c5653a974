//! Abstract heap objects.
//!
//! An object is laid out as the chain of its class and all superclasses, each contributing the
//! fields it declares. Every field holds one [`Address`]: the store cell of the set of values the
//! field may hold, or [`Address::Null`] while the field has never been written. Fields are
//! numbered by a flat slot index across the chain, most derived class first.

use std::fmt;
use std::rc::Rc;

use log::{debug, warn};

use crate::address::Address;
use crate::class::{supertypes, ClassRegistry};
use crate::error::{Error, Result};
use crate::utils::{hash_str, pairing2, MyHash};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ClassStruct {
    classpath: Rc<str>,
    fields: Vec<(Rc<str>, Address)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    classpath: Rc<str>,
    chain: Vec<ClassStruct>,
}

impl Object {
    /// Lay out a fresh object of the class, every field null.
    pub fn new(classes: &dyn ClassRegistry, classpath: &str) -> Result<Self> {
        if classes.fields(classpath).is_none() {
            return Err(Error::UnknownClass(classpath.to_string()));
        }

        let chain = supertypes(classes, classpath)
            .into_iter()
            .map(|class| ClassStruct {
                classpath: class.into(),
                fields: classes
                    .fields(class)
                    .unwrap_or_default()
                    .iter()
                    .map(|name| (Rc::clone(name), Address::Null))
                    .collect(),
            })
            .collect();

        debug!("an object is built from class {}", classpath);
        Ok(Self {
            classpath: classpath.into(),
            chain,
        })
    }

    pub fn classpath(&self) -> &str {
        &self.classpath
    }

    /// Total number of field slots.
    pub fn num_fields(&self) -> usize {
        self.chain.iter().map(|s| s.fields.len()).sum()
    }

    /// Resolve `classpath/field` to a slot.
    ///
    /// The lookup starts at the struct of `classpath` and continues towards the root, the way a
    /// field reference is resolved against a superclass that declares it.
    pub fn slot(&self, classpath: &str, field: &str) -> Result<u32> {
        let unknown = || Error::UnknownField {
            classpath: classpath.to_string(),
            field: field.to_string(),
        };

        let start = self
            .chain
            .iter()
            .position(|s| &*s.classpath == classpath)
            .ok_or_else(unknown)?;
        let mut base: usize = self.chain[..start].iter().map(|s| s.fields.len()).sum();
        for s in &self.chain[start..] {
            if let Some(i) = s.fields.iter().position(|(name, _)| &**name == field) {
                return Ok((base + i) as u32);
            }
            base += s.fields.len();
        }
        Err(unknown())
    }

    fn slot_mut(&mut self, slot: u32) -> Option<&mut (Rc<str>, Address)> {
        self.chain.iter_mut().flat_map(|s| s.fields.iter_mut()).nth(slot as usize)
    }

    /// Address held by a field slot.
    pub fn field(&self, slot: u32) -> Option<Address> {
        self.fields().nth(slot as usize).map(|(_, _, addr)| addr)
    }

    pub fn set_field(&mut self, slot: u32, addr: Address) -> Result<()> {
        let classpath = self.classpath.to_string();
        let (_, target) = self.slot_mut(slot).ok_or_else(|| Error::UnknownField {
            classpath,
            field: format!("#{}", slot),
        })?;
        *target = addr;
        Ok(())
    }

    /// Address held by `classpath/field`.
    pub fn get(&self, classpath: &str, field: &str) -> Result<Address> {
        let slot = self.slot(classpath, field)?;
        Ok(self.field(slot).unwrap_or_default())
    }

    /// Iterate `(declaring class, field name, address)` over all slots.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str, Address)> {
        self.chain.iter().flat_map(|s| {
            s.fields
                .iter()
                .map(move |(name, addr)| (&*s.classpath, &**name, *addr))
        })
    }

    /// Whether the object is an instance of `classpath`, according to the current supertype
    /// chain of its class.
    pub fn instance_of(&self, classes: &dyn ClassRegistry, classpath: &str) -> bool {
        supertypes(classes, &self.classpath).contains(&classpath)
    }

    /// Merge the fields of another object of the same class into this one.
    ///
    /// A null field takes the other side's address. Two different non-null addresses cannot be
    /// merged at this level; the existing one is kept. Returns whether anything changed.
    pub fn join(&mut self, other: &Object) -> bool {
        if self.classpath != other.classpath {
            warn!(
                "can not join an object of {} into an object of {}",
                other.classpath, self.classpath
            );
            return false;
        }
        let mut changed = false;
        let theirs = other.fields().map(|(_, _, addr)| addr);
        for ((_, mine), theirs) in self.chain.iter_mut().flat_map(|s| s.fields.iter_mut()).zip(theirs) {
            match (*mine, theirs) {
                (_, Address::Null) => {}
                (Address::Null, addr) => {
                    *mine = addr;
                    changed = true;
                }
                (a, b) if a != b => {
                    warn!("conflicting field addresses {} and {}, keeping {}", a, b, a);
                }
                _ => {}
            }
        }
        changed
    }
}

impl MyHash for Object {
    fn hash(&self) -> u64 {
        self.fields()
            .fold(hash_str(&self.classpath), |h, (_, _, addr)| pairing2(h, addr.hash()))
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.classpath)?;
        for (i, (class, name, addr)) in self.fields().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}/{}={}", class, name, addr)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::class::ClassTable;

    fn classes() -> ClassTable {
        let mut classes = ClassTable::new();
        classes
            .define("a/Base", Some("java/lang/Object"), &["id"])
            .define("a/Foo", Some("a/Base"), &["x", "y"]);
        classes
    }

    #[test]
    fn test_layout() -> Result<()> {
        let obj = Object::new(&classes(), "a/Foo")?;
        assert_eq!(obj.num_fields(), 3);
        assert_eq!(obj.slot("a/Foo", "x")?, 0);
        assert_eq!(obj.slot("a/Foo", "y")?, 1);
        assert_eq!(obj.slot("a/Base", "id")?, 2);
        // Inherited field referenced through the subclass.
        assert_eq!(obj.slot("a/Foo", "id")?, 2);
        assert!(obj.fields().all(|(_, _, addr)| addr.is_null()));
        Ok(())
    }

    #[test]
    fn test_unknown() {
        assert_eq!(
            Object::new(&classes(), "a/Nope"),
            Err(Error::UnknownClass("a/Nope".to_string()))
        );
        let obj = Object::new(&classes(), "a/Foo").unwrap();
        assert!(matches!(obj.slot("a/Foo", "z"), Err(Error::UnknownField { .. })));
        assert!(matches!(obj.slot("a/Bar", "x"), Err(Error::UnknownField { .. })));
        // A field of the subclass is not visible through the superclass.
        assert!(obj.slot("a/Base", "x").is_err());
    }

    #[test]
    fn test_set_get() -> Result<()> {
        let mut obj = Object::new(&classes(), "a/Foo")?;
        let slot = obj.slot("a/Foo", "y")?;
        obj.set_field(slot, Address::heap(0, 9))?;
        assert_eq!(obj.get("a/Foo", "y")?, Address::heap(0, 9));
        assert!(obj.set_field(42, Address::Null).is_err());
        Ok(())
    }

    #[test]
    fn test_instance_of() -> Result<()> {
        let classes = classes();
        let obj = Object::new(&classes, "a/Foo")?;
        assert!(obj.instance_of(&classes, "a/Foo"));
        assert!(obj.instance_of(&classes, "a/Base"));
        assert!(obj.instance_of(&classes, "java/lang/Object"));
        assert!(!obj.instance_of(&classes, "a/Other"));
        Ok(())
    }

    #[test]
    fn test_join() -> Result<()> {
        let mut a = Object::new(&classes(), "a/Foo")?;
        let mut b = a.clone();
        b.set_field(0, Address::heap(0, 1))?;
        assert!(a.join(&b));
        assert_eq!(a.field(0), Some(Address::heap(0, 1)));
        assert!(!a.join(&b));
        assert_eq!(a.hash(), b.hash());
        Ok(())
    }
}
