//! Class Callback Cache
//!
//! Finding the native callback methods a script class overrides means
//! walking the native class hierarchy and looking every callback name up
//! on the script class. The result only depends on the script class, so it
//! is computed once per class and reused for every instance.
//!
//! A method counts as overridden when the script class attribute of that
//! name is a script function rather than one of the builtin stubs that
//! expose the native implementation.
//!
//! Script class identities do not survive an interpreter reset;
//! [`CallbackCache::invalidate`] has to run on reset.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use gsi_native::{ClassDecl, MethodDecl};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::script::ScriptClass;

/// Overridden callback methods of one script class
pub type Overrides = Rc<[Rc<MethodDecl>]>;

/// Per-class cache of overridden callback methods.
pub struct CallbackCache {
    enabled: bool,
    entries: RefCell<FxHashMap<u64, Overrides>>,
    walks: Cell<u64>,
}

impl CallbackCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: RefCell::new(FxHashMap::default()),
            walks: Cell::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Callback methods of `native` (and its bases) overridden by `class`,
    /// most derived declaration first.
    pub fn overridden(&self, class: &ScriptClass, native: &ClassDecl) -> Overrides {
        if self.enabled {
            let cached = self.entries.borrow().get(&class.id()).cloned();
            if let Some(methods) = cached {
                return methods;
            }
        }

        let methods: Overrides = self.walk(class, native).into();
        if self.enabled {
            debug!(class = %class.name(), overrides = methods.len(), "caching callback overrides");
            self.entries.borrow_mut().insert(class.id(), Rc::clone(&methods));
        }
        methods
    }

    fn walk(&self, class: &ScriptClass, native: &ClassDecl) -> Vec<Rc<MethodDecl>> {
        self.walks.set(self.walks.get() + 1);

        let mut found: Vec<Rc<MethodDecl>> = Vec::new();
        for method in native.ancestors().flat_map(|cls| cls.callbacks()) {
            if found.iter().any(|m| m.name() == method.name()) {
                continue;
            }
            if class.lookup(method.name()).is_some_and(|f| !f.is_builtin()) {
                found.push(Rc::clone(method));
            }
        }
        found
    }

    /// Drop every entry
    pub fn invalidate(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        debug!(classes = entries.len(), "callback cache invalidated");
        drop(entries);
    }

    pub fn contains(&self, class: &ScriptClass) -> bool {
        self.entries.borrow().contains_key(&class.id())
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Number of hierarchy walks performed so far
    pub fn hierarchy_walks(&self) -> u64 {
        self.walks.get()
    }
}

impl fmt::Debug for CallbackCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackCache")
            .field("enabled", &self.enabled)
            .field("classes", &self.len())
            .field("walks", &self.walks.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptValue;
    use crate::testing::fixture;
    use gsi_native::NativeType;
    use pretty_assertions::assert_eq;

    fn names(methods: &Overrides) -> Vec<String> {
        methods.iter().map(|m| m.name().to_string()).collect()
    }

    #[test]
    fn test_walk_once_per_class() {
        let fx = fixture();
        let cache = CallbackCache::new(true);
        let cls = ScriptClass::builder("Square")
            .extends(&fx.interp.class_for(&fx.shape))
            .def("area", 1, |_| Ok(ScriptValue::Int(4)))
            .build();

        assert_eq!(names(&cache.overridden(&cls, &fx.shape)), vec!["area"]);
        assert_eq!(names(&cache.overridden(&cls, &fx.shape)), vec!["area"]);
        assert_eq!(cache.hierarchy_walks(), 1);
        assert!(cache.contains(&cls));

        cache.invalidate();
        assert!(cache.is_empty());
        cache.overridden(&cls, &fx.shape);
        assert_eq!(cache.hierarchy_walks(), 2);
    }

    #[test]
    fn test_disabled_cache_walks_every_time() {
        let fx = fixture();
        let cache = CallbackCache::new(false);
        let cls = fx.interp.class_for(&fx.shape);

        cache.overridden(&cls, &fx.shape);
        cache.overridden(&cls, &fx.shape);
        assert_eq!(cache.hierarchy_walks(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_builtin_stubs_are_not_overrides() {
        let fx = fixture();
        let cache = CallbackCache::new(true);
        let generic = fx.interp.class_for(&fx.shape);
        assert!(cache.overridden(&generic, &fx.shape).is_empty());
    }

    #[test]
    fn test_base_class_callbacks_are_found() {
        let fx = fixture();
        let circle = ClassDecl::builder("Circle")
            .base(&fx.shape)
            .callback("radius", [], NativeType::Float)
            .build();
        let cls = ScriptClass::builder("Ring")
            .extends(&fx.interp.class_for(&circle))
            .def("area", 1, |_| Ok(ScriptValue::Int(3)))
            .def("radius", 1, |_| Ok(ScriptValue::Float(1.0)))
            .build();

        let cache = CallbackCache::new(true);
        assert_eq!(names(&cache.overridden(&cls, &circle)), vec!["radius", "area"]);
    }
}
