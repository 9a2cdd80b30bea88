//! Class Descriptors
//!
//! A `ClassDecl` describes one native class: its base class, whether it is
//! *managed* (its destruction is observable through the ownership ledger),
//! its methods, and how instances are created and destroyed.
//!
//! ## Example
//!
//! ```
//! use gsi_native::{ArgDecl, ClassDecl, NativeType, NativeValue};
//!
//! let shape = ClassDecl::builder("Shape")
//!     .managed(true)
//!     .callback("area", [], NativeType::Int)
//!     .event("moved", [ArgDecl::new("dx", NativeType::Int)], NativeType::Void)
//!     .build();
//!
//! let handle = shape.create();
//! assert_eq!(handle.call("area", &[]).unwrap(), NativeValue::Int(0));
//! shape.destroy(&handle).unwrap();
//! assert!(handle.is_destroyed());
//! ```

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::error::{NativeError, NativeResult};
use crate::method::{ArgDecl, MethodDecl, MethodId, MethodKind, NativeImpl};
use crate::object::NativeHandle;
use crate::types::{NativeType, NativeValue};

/// Creates the payload of a new instance.
pub type Factory = Rc<dyn Fn() -> Box<dyn Any>>;

/// Native destructor hook, run before the object is marked destroyed.
pub type Destructor = Rc<dyn Fn(&NativeHandle)>;

/// Descriptor of a native class.
pub struct ClassDecl {
    name: SmolStr,
    base: Option<Rc<ClassDecl>>,
    managed: bool,
    methods: Vec<Rc<MethodDecl>>,
    factory: Option<Factory>,
    destructor: Option<Destructor>,
    created: Cell<usize>,
    destroyed: Cell<usize>,
}

impl ClassDecl {
    pub fn builder(name: impl Into<SmolStr>) -> ClassBuilder {
        ClassBuilder::new(name)
    }

    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    pub fn base(&self) -> Option<&Rc<ClassDecl>> {
        self.base.as_ref()
    }

    /// Check if instances carry an ownership ledger
    pub fn is_managed(&self) -> bool {
        self.managed
    }

    /// Methods declared directly on this class
    pub fn methods(&self) -> &[Rc<MethodDecl>] {
        &self.methods
    }

    /// Overridable methods declared directly on this class
    pub fn callbacks(&self) -> impl Iterator<Item = &Rc<MethodDecl>> {
        self.methods.iter().filter(|m| m.is_callback())
    }

    /// Events declared directly on this class
    pub fn events(&self) -> impl Iterator<Item = &Rc<MethodDecl>> {
        self.methods.iter().filter(|m| m.is_event())
    }

    /// This class followed by its base classes, most derived first
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    /// Find a method by name, searching base classes too
    pub fn find_method(&self, name: &str) -> Option<Rc<MethodDecl>> {
        self.ancestors()
            .flat_map(|cls| cls.methods.iter())
            .find(|m| m.name() == name)
            .cloned()
    }

    /// Find a method by id, searching base classes too
    pub fn method_by_id(&self, id: MethodId) -> Option<Rc<MethodDecl>> {
        self.ancestors()
            .flat_map(|cls| cls.methods.iter())
            .find(|m| m.id() == id)
            .cloned()
    }

    /// Like `find_method`, but reports a missing method as an error
    pub fn require_method(&self, name: &str) -> NativeResult<Rc<MethodDecl>> {
        self.find_method(name)
            .ok_or_else(|| NativeError::unknown_method(self.name.clone(), name))
    }

    /// Check if this class is `other` or derives from it
    pub fn is_a(&self, other: &ClassDecl) -> bool {
        self.ancestors().any(|cls| std::ptr::eq(cls, other))
    }

    /// Check if this class or one of its bases has the given name
    pub fn is_a_named(&self, name: &str) -> bool {
        self.ancestors().any(|cls| cls.name == name)
    }

    /// Create a new native instance.
    pub fn create(self: &Rc<Self>) -> NativeHandle {
        let data = self
            .ancestors()
            .find_map(|cls| cls.factory.as_ref())
            .map(|factory| factory())
            .unwrap_or_else(|| Box::new(()));
        self.created.set(self.created.get() + 1);
        NativeHandle::new(Rc::clone(self), data)
    }

    /// Destroy a native instance.
    ///
    /// Runs the destructor hooks of the object's dynamic class (most derived
    /// first) and then marks the object destroyed, which notifies the
    /// listeners of its ownership ledger.
    pub fn destroy(&self, handle: &NativeHandle) -> NativeResult<()> {
        if handle.is_destroyed() {
            return Err(NativeError::destroyed(handle.class().name().clone()));
        }

        let class = Rc::clone(handle.class());
        for hook in class.ancestors().filter_map(|cls| cls.destructor.as_ref()) {
            hook(handle);
        }

        class.destroyed.set(class.destroyed.get() + 1);
        handle.mark_destroyed();
        Ok(())
    }

    /// Number of instances created and not yet destroyed
    pub fn live_instances(&self) -> usize {
        self.created.get().saturating_sub(self.destroyed.get())
    }
}

impl fmt::Debug for ClassDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDecl")
            .field("name", &self.name)
            .field("base", &self.base.as_ref().map(|b| b.name.clone()))
            .field("managed", &self.managed)
            .field("methods", &self.methods)
            .finish()
    }
}

/// Iterator over a class and its bases
pub struct Ancestors<'a> {
    next: Option<&'a ClassDecl>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a ClassDecl;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.base.as_deref();
        Some(current)
    }
}

/// Builder for `ClassDecl`
pub struct ClassBuilder {
    name: SmolStr,
    base: Option<Rc<ClassDecl>>,
    managed: bool,
    methods: Vec<Rc<MethodDecl>>,
    factory: Option<Factory>,
    destructor: Option<Destructor>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            base: None,
            managed: false,
            methods: Vec::new(),
            factory: None,
            destructor: None,
        }
    }

    /// Derive from `base`. A class deriving from a managed class is managed.
    pub fn base(mut self, base: &Rc<ClassDecl>) -> Self {
        self.base = Some(Rc::clone(base));
        self
    }

    pub fn managed(mut self, managed: bool) -> Self {
        self.managed = managed;
        self
    }

    /// Declare a regular method with a native body
    pub fn method<F>(
        self,
        name: impl Into<SmolStr>,
        args: impl IntoIterator<Item = ArgDecl>,
        ret: NativeType,
        body: F,
    ) -> Self
    where
        F: Fn(&NativeHandle, &[NativeValue]) -> NativeResult<NativeValue> + 'static,
    {
        self.declare(name, MethodKind::Regular, args, ret, Some(Rc::new(body)))
    }

    /// Declare an overridable method without native body
    pub fn callback(
        self,
        name: impl Into<SmolStr>,
        args: impl IntoIterator<Item = ArgDecl>,
        ret: NativeType,
    ) -> Self {
        self.declare(name, MethodKind::Callback, args, ret, None)
    }

    /// Declare an overridable method with a native body used when no
    /// override is installed
    pub fn callback_with<F>(
        self,
        name: impl Into<SmolStr>,
        args: impl IntoIterator<Item = ArgDecl>,
        ret: NativeType,
        body: F,
    ) -> Self
    where
        F: Fn(&NativeHandle, &[NativeValue]) -> NativeResult<NativeValue> + 'static,
    {
        self.declare(name, MethodKind::Callback, args, ret, Some(Rc::new(body)))
    }

    /// Declare an event
    pub fn event(
        self,
        name: impl Into<SmolStr>,
        args: impl IntoIterator<Item = ArgDecl>,
        ret: NativeType,
    ) -> Self {
        self.declare(name, MethodKind::Event, args, ret, None)
    }

    /// Payload factory for new instances
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Any> + 'static,
    {
        self.factory = Some(Rc::new(factory));
        self
    }

    /// Hook run when an instance is destroyed
    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NativeHandle) + 'static,
    {
        self.destructor = Some(Rc::new(hook));
        self
    }

    pub fn build(self) -> Rc<ClassDecl> {
        let managed = self.managed || self.base.as_ref().is_some_and(|b| b.is_managed());
        Rc::new(ClassDecl {
            name: self.name,
            base: self.base,
            managed,
            methods: self.methods,
            factory: self.factory,
            destructor: self.destructor,
            created: Cell::new(0),
            destroyed: Cell::new(0),
        })
    }

    fn declare(
        mut self,
        name: impl Into<SmolStr>,
        kind: MethodKind,
        args: impl IntoIterator<Item = ArgDecl>,
        ret: NativeType,
        body: Option<NativeImpl>,
    ) -> Self {
        let method = MethodDecl::new(name.into(), kind, args.into_iter().collect(), ret, body);
        self.methods.push(Rc::new(method));
        self
    }
}
