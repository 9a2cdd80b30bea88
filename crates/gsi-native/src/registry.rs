//! Class Registry
//!
//! Name-indexed collection of class descriptors, in registration order.

use std::rc::Rc;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::class::ClassDecl;
use crate::error::{NativeError, NativeResult};

#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: IndexMap<SmolStr, Rc<ClassDecl>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Base classes must be registered first.
    pub fn register(&mut self, class: Rc<ClassDecl>) -> NativeResult<()> {
        if self.classes.contains_key(class.name()) {
            return Err(NativeError::duplicate_class(class.name().clone()));
        }
        if let Some(base) = class.base() {
            if !self.contains(base.name()) {
                return Err(NativeError::unknown_class(base.name().clone()));
            }
        }
        self.classes.insert(class.name().clone(), class);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Rc<ClassDecl>> {
        self.classes.get(name)
    }

    pub fn require(&self, name: &str) -> NativeResult<&Rc<ClassDecl>> {
        self.get(name).ok_or_else(|| NativeError::unknown_class(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<ClassDecl>> {
        self.classes.values()
    }

    /// Classes deriving directly from `name`
    pub fn subclasses<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Rc<ClassDecl>> + 'a {
        self.classes
            .values()
            .filter(move |cls| cls.base().is_some_and(|b| b.name() == name))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ClassRegistry::new();
        let shape = ClassDecl::builder("Shape").build();
        let circle = ClassDecl::builder("Circle").base(&shape).build();

        registry.register(shape.clone()).unwrap();
        registry.register(circle).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("Circle").is_some());
        assert_eq!(registry.subclasses("Shape").count(), 1);
        assert!(matches!(registry.require("Square"), Err(NativeError::UnknownClass { .. })));
        assert!(matches!(registry.register(shape), Err(NativeError::DuplicateClass { .. })));
    }

    #[test]
    fn test_base_must_be_registered_first() {
        let mut registry = ClassRegistry::new();
        let shape = ClassDecl::builder("Shape").build();
        let circle = ClassDecl::builder("Circle").base(&shape).build();

        assert!(registry.register(circle).is_err());
        assert!(registry.is_empty());
    }
}
