//! Abstract values held by store cells.
//!
//! A [`Value`] is shared through [`Rc`]: cloning the `Rc` takes a reference, dropping it releases
//! one, and the payload is torn down when the last reference goes away. Mutation goes through
//! [`Rc::make_mut`], so a value reachable from two stores is copied before either of them changes
//! it.

use std::fmt;
use std::rc::Rc;

use crate::address::Address;
use crate::class::ClassRegistry;
use crate::error::{Error, Result};
use crate::object::Object;
use crate::set::{SetPool, SetRef};
use crate::utils::{pairing2, MyHash};

/// Hash of a cell without a value.
pub const NULL_HASH: u64 = 0x3c4f_ab47;

const OBJECT_TAG: u64 = 1;
const SET_TAG: u64 = 2;
const ARRAY_TAG: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Heap object: class chain and field addresses.
    Object(Object),
    /// Set of addresses.
    Set(SetRef),
    /// Array; element tracking is not modelled.
    Array,
}

impl Value {
    pub fn new_object(classes: &dyn ClassRegistry, classpath: &str) -> Result<Rc<Value>> {
        Ok(Rc::new(Value::Object(Object::new(classes, classpath)?)))
    }

    pub fn empty_set(pool: &SetPool) -> Rc<Value> {
        Rc::new(Value::Set(pool.empty()))
    }

    pub fn set(set: SetRef) -> Rc<Value> {
        Rc::new(Value::Set(set))
    }

    /// Independent copy of a value. Mutating the copy never affects the original.
    pub fn fork(value: &Rc<Value>) -> Result<Rc<Value>> {
        match **value {
            Value::Array => Err(Error::Unsupported("fork of an array value".to_string())),
            ref v => Ok(Rc::new(v.clone())),
        }
    }

    /// Number of owners (registers do not own values; store cells and value tables do).
    pub fn refcount(value: &Rc<Value>) -> usize {
        Rc::strong_count(value)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Object(_) => "object",
            Value::Set(_) => "set",
            Value::Array => "array",
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<SetRef> {
        match self {
            Value::Set(set) => Some(*set),
            _ => None,
        }
    }

    pub fn equal(a: &Rc<Value>, b: &Rc<Value>) -> bool {
        Rc::ptr_eq(a, b) || a == b
    }

    /// Hash of the value, using the cached hash of sets.
    pub fn hash(&self, pool: &SetPool) -> u64 {
        match self {
            Value::Object(obj) => pairing2(OBJECT_TAG, obj.hash()),
            Value::Set(set) => pairing2(SET_TAG, pool.hash(*set)),
            Value::Array => pairing2(ARRAY_TAG, NULL_HASH),
        }
    }

    /// Hash of the value computed from scratch. Always equal to [`Value::hash`].
    pub fn compute_hash(&self, pool: &SetPool) -> u64 {
        match self {
            Value::Object(obj) => pairing2(OBJECT_TAG, obj.hash()),
            Value::Set(set) => pairing2(SET_TAG, pool.compute_hash(*set)),
            Value::Array => pairing2(ARRAY_TAG, NULL_HASH),
        }
    }

    /// Merge another value of the same kind into this one. Returns whether this value changed.
    pub fn join(&mut self, other: &Value, pool: &SetPool) -> Result<bool> {
        match (self, other) {
            (Value::Set(mine), Value::Set(theirs)) => {
                let joined = pool.union(*mine, *theirs);
                let changed = joined != *mine;
                *mine = joined;
                Ok(changed)
            }
            (Value::Object(mine), Value::Object(theirs)) => Ok(mine.join(theirs)),
            (mine, theirs) => Err(Error::Unsupported(format!(
                "join of {} into {}",
                theirs.kind(),
                mine.kind()
            ))),
        }
    }

    /// Rewrite every address the value refers to.
    pub fn map_addresses(
        &self,
        pool: &SetPool,
        mut f: impl FnMut(Address) -> Result<Address>,
    ) -> Result<Value> {
        match self {
            Value::Set(set) => {
                let addrs = pool.iter(*set).map(&mut f).collect::<Result<Vec<_>>>()?;
                Ok(Value::Set(pool.from_addresses(addrs)))
            }
            Value::Object(obj) => {
                let mut obj = obj.clone();
                for slot in 0..obj.num_fields() as u32 {
                    if let Some(addr) = obj.field(slot) {
                        if !addr.is_null() {
                            obj.set_field(slot, f(addr)?)?;
                        }
                    }
                }
                Ok(Value::Object(obj))
            }
            Value::Array => Ok(Value::Array),
        }
    }

    /// Addresses the value refers to.
    pub fn addresses(&self, pool: &SetPool) -> Vec<Address> {
        match self {
            Value::Set(set) => pool.iter(*set).collect(),
            Value::Object(obj) => obj.fields().map(|(_, _, addr)| addr).filter(|a| !a.is_null()).collect(),
            Value::Array => Vec::new(),
        }
    }

    pub fn display<'a>(&'a self, pool: &'a SetPool) -> ValueDisplay<'a> {
        ValueDisplay { value: self, pool }
    }
}

pub struct ValueDisplay<'a> {
    value: &'a Value,
    pool: &'a SetPool,
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Object(obj) => write!(f, "{}", obj),
            Value::Set(set) => write!(f, "{}", self.pool.display(*set)),
            Value::Array => write!(f, "[array]"),
        }
    }
}
