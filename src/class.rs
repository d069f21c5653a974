//! Class metadata consumed by the abstract machine.
//!
//! The loader that reads class definitions is not part of this crate; the machine only needs to
//! know, for a class path, its direct superclass and the instance fields it declares.

use std::collections::HashMap;
use std::rc::Rc;

/// Read-only view on class definitions.
pub trait ClassRegistry {
    /// Direct superclass, `None` for a root class or a class with no known definition.
    fn superclass(&self, classpath: &str) -> Option<&str>;

    /// Instance fields declared by the class itself (not by its superclasses).
    /// `None` if the class is not known.
    fn fields(&self, classpath: &str) -> Option<&[Rc<str>]>;
}

#[derive(Debug, Clone)]
struct ClassDef {
    superclass: Option<Rc<str>>,
    fields: Vec<Rc<str>>,
}

/// In-memory [`ClassRegistry`].
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    classes: HashMap<Rc<str>, ClassDef>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) a class.
    pub fn define(&mut self, classpath: &str, superclass: Option<&str>, fields: &[&str]) -> &mut Self {
        self.classes.insert(
            classpath.into(),
            ClassDef {
                superclass: superclass.map(Rc::from),
                fields: fields.iter().map(|&f| Rc::from(f)).collect(),
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassRegistry for ClassTable {
    fn superclass(&self, classpath: &str) -> Option<&str> {
        self.classes.get(classpath)?.superclass.as_deref()
    }

    fn fields(&self, classpath: &str) -> Option<&[Rc<str>]> {
        self.classes.get(classpath).map(|c| c.fields.as_slice())
    }
}

/// Supertype chain of a class, starting with the class itself.
///
/// The walk stops at the first class without a superclass. Cycles in malformed metadata are cut
/// at the first repeated class.
pub fn supertypes<'a>(classes: &'a dyn ClassRegistry, classpath: &'a str) -> Vec<&'a str> {
    let mut chain = vec![classpath];
    let mut current = classpath;
    while let Some(parent) = classes.superclass(current) {
        if chain.contains(&parent) {
            break;
        }
        chain.push(parent);
        current = parent;
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ClassTable {
        let mut classes = ClassTable::new();
        classes
            .define("a/Base", Some("java/lang/Object"), &["id"])
            .define("a/Derived", Some("a/Base"), &["x", "y"])
            .define("a/Loop", Some("a/Loop"), &[]);
        classes
    }

    #[test]
    fn test_lookup() {
        let classes = table();
        assert_eq!(classes.superclass("a/Derived"), Some("a/Base"));
        assert_eq!(classes.fields("a/Derived").map(|f| f.len()), Some(2));
        assert_eq!(classes.fields("java/lang/Object"), None);
        assert_eq!(classes.len(), 3);
    }

    #[test]
    fn test_supertypes() {
        let classes = table();
        assert_eq!(
            supertypes(&classes, "a/Derived"),
            vec!["a/Derived", "a/Base", "java/lang/Object"]
        );
        assert_eq!(supertypes(&classes, "x/Unknown"), vec!["x/Unknown"]);
        assert_eq!(supertypes(&classes, "a/Loop"), vec!["a/Loop"]);
    }
}
