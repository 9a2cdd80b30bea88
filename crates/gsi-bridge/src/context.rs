//! Interpreter Service and Execution Context
//!
//! The `Interpreter` is the explicit service every bound object refers to
//! (weakly). It owns the process-wide state of one embedded runtime:
//!
//! - the configuration
//! - the callback cache
//! - the generic script class created for each native class
//! - the liveness flag consulted by native-side notifications
//!
//! ## Execution Context
//!
//! Code that calls into script from native code enters the interpreter
//! through an [`ExecGuard`]. Guards nest; entering a finalized interpreter
//! fails with `InterpreterFinalized`.
//!
//! ## Reset and Finalization
//!
//! `reset()` drops every cached class identity. `finalize()` additionally
//! marks the interpreter torn down; from then on native destruction of a
//! bound object only flags the wrapper and skips all script-side cleanup.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use gsi_native::{ClassDecl, ClassRegistry, NativeHandle};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::cache::CallbackCache;
use crate::error::{BridgeError, BridgeResult};
use crate::script::{ScriptClass, ScriptObject, ScriptRef};
use crate::BridgeConfig;

// ============================================================================
// Interpreter
// ============================================================================

/// One embedded script runtime.
pub struct Interpreter {
    config: BridgeConfig,
    registry: ClassRegistry,
    cache: CallbackCache,
    /// Generic script class per native class, keyed by descriptor address
    classes: RefCell<FxHashMap<usize, Rc<ScriptClass>>>,
    depth: Cell<usize>,
    entries: Cell<u64>,
    finalized: Cell<bool>,
}

impl Interpreter {
    pub fn new(config: BridgeConfig, registry: ClassRegistry) -> Rc<Self> {
        info!(
            name = %config.name,
            classes = registry.len(),
            callback_cache = config.callback_cache,
            "initializing script interpreter"
        );
        Rc::new(Self {
            cache: CallbackCache::new(config.callback_cache),
            config,
            registry,
            classes: RefCell::new(FxHashMap::default()),
            depth: Cell::new(0),
            entries: Cell::new(0),
            finalized: Cell::new(false),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn callback_cache(&self) -> &CallbackCache {
        &self.cache
    }

    // ------------------------------------------------------------------------
    // Execution context
    // ------------------------------------------------------------------------

    /// Enter the interpreter
    pub fn enter(&self) -> BridgeResult<ExecGuard<'_>> {
        if self.finalized.get() {
            return Err(BridgeError::InterpreterFinalized);
        }

        let nested = self.depth.get() > 0;
        self.depth.set(self.depth.get() + 1);
        self.entries.set(self.entries.get() + 1);

        Ok(ExecGuard { interp: self, nested })
    }

    /// Check if script code is running
    pub fn is_active(&self) -> bool {
        self.depth.get() > 0
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    /// Forget all cached class identities.
    pub fn reset(&self) {
        let classes = std::mem::take(&mut *self.classes.borrow_mut());
        self.cache.invalidate();
        info!(name = %self.config.name, classes = classes.len(), "interpreter reset");
        drop(classes);
    }

    /// Tear the interpreter down.
    pub fn finalize(&self) {
        if self.finalized.replace(true) {
            return;
        }
        self.reset();
        info!(name = %self.config.name, "interpreter finalized");
    }

    // ------------------------------------------------------------------------
    // Classes and objects
    // ------------------------------------------------------------------------

    /// The generic script class of a native class
    pub fn class_for(&self, decl: &Rc<ClassDecl>) -> Rc<ScriptClass> {
        let key = Rc::as_ptr(decl) as usize;
        if let Some(class) = self.classes.borrow().get(&key) {
            return Rc::clone(class);
        }

        let class = ScriptClass::for_native(decl);
        debug!(class = %decl.name(), "created script class for native class");
        self.classes.borrow_mut().insert(key, Rc::clone(&class));
        class
    }

    /// The generic script class of a registered native class
    pub fn class_named(&self, name: &str) -> BridgeResult<Rc<ScriptClass>> {
        let decl = Rc::clone(self.registry.require(name)?);
        Ok(self.class_for(&decl))
    }

    /// Create a script instance. Its native object is created on first use.
    pub fn instantiate(self: &Rc<Self>, class: &Rc<ScriptClass>) -> ScriptRef {
        ScriptObject::new(self, class)
    }

    /// The script object for a native object handed out by native code.
    ///
    /// Returns the attached wrapper if there is one; otherwise a new
    /// wrapper of the generic class is attached as a native-owned, non
    /// destroyable reference.
    pub fn wrap(self: &Rc<Self>, handle: NativeHandle) -> BridgeResult<ScriptRef> {
        if let Some(peer) = handle.peer() {
            if let Ok(obj) = peer.downcast::<ScriptObject>() {
                return Ok(obj);
            }
        }

        let class = self.class_for(handle.class());
        let obj = ScriptObject::new(self, &class);
        obj.binding().attach(handle, false, false, false)?;
        Ok(obj)
    }

    /// Get execution statistics
    pub fn stats(&self) -> ExecStats {
        ExecStats {
            total_entries: self.entries.get(),
            current_depth: self.depth.get(),
            cached_classes: self.cache.len(),
            hierarchy_walks: self.cache.hierarchy_walks(),
            finalized: self.finalized.get(),
        }
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("name", &self.config.name)
            .field("depth", &self.depth.get())
            .field("finalized", &self.finalized.get())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ExecGuard
// ============================================================================

/// RAII guard for running script code.
#[derive(Debug)]
pub struct ExecGuard<'a> {
    interp: &'a Interpreter,
    nested: bool,
}

impl ExecGuard<'_> {
    /// Check if the interpreter was already entered
    pub fn is_nested(&self) -> bool {
        self.nested
    }
}

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        let depth = self.interp.depth.get().saturating_sub(1);
        self.interp.depth.set(depth);
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Interpreter statistics for debugging and profiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStats {
    /// Total interpreter entries
    pub total_entries: u64,
    /// Current nesting depth
    pub current_depth: usize,
    /// Script classes in the callback cache
    pub cached_classes: usize,
    /// Class hierarchy walks done to find overrides
    pub hierarchy_walks: u64,
    /// Whether the interpreter was finalized
    pub finalized: bool,
}

impl fmt::Display for ExecStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entries={}, depth={}, cached_classes={}, walks={}, finalized={}",
            self.total_entries, self.current_depth, self.cached_classes, self.hierarchy_walks, self.finalized
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exec_guard_nesting() {
        let fx = fixture();
        assert!(!fx.interp.is_active());
        {
            let outer = fx.interp.enter().unwrap();
            assert!(!outer.is_nested());
            let inner = fx.interp.enter().unwrap();
            assert!(inner.is_nested());
            assert_eq!(fx.interp.depth(), 2);
        }
        assert_eq!(fx.interp.depth(), 0);
        assert_eq!(fx.interp.stats().total_entries, 2);
    }

    #[test]
    fn test_finalized_interpreter_rejects_entry() {
        let fx = fixture();
        fx.interp.finalize();
        assert!(fx.interp.is_finalized());
        assert!(matches!(fx.interp.enter(), Err(BridgeError::InterpreterFinalized)));
    }

    #[test]
    fn test_class_for_is_stable_until_reset() {
        let fx = fixture();
        let a = fx.interp.class_for(&fx.shape);
        let b = fx.interp.class_named("Shape").unwrap();
        assert!(Rc::ptr_eq(&a, &b));

        fx.interp.reset();
        let c = fx.interp.class_for(&fx.shape);
        assert!(!Rc::ptr_eq(&a, &c));
        assert!(fx.interp.class_named("Hexagon").is_err());
    }

    #[test]
    fn test_wrap_returns_attached_peer() {
        let fx = fixture();
        let obj = fx.interp.instantiate(&fx.interp.class_for(&fx.shape));
        let handle = obj.binding().handle().unwrap();

        let again = fx.interp.wrap(handle).unwrap();
        assert!(Rc::ptr_eq(&obj, &again));
    }

    #[test]
    fn test_wrap_foreign_object_is_native_owned() {
        let fx = fixture();
        let handle = fx.shape.create();
        let obj = fx.interp.wrap(handle.clone()).unwrap();

        assert!(!obj.binding().is_owned());
        assert!(!obj.binding().can_destroy());
        assert!(obj.binding().is_retained());
        assert!(matches!(obj.binding().destroy(), Err(BridgeError::PermissionDenied { .. })));

        fx.shape.destroy(&handle).unwrap();
        assert!(obj.binding().is_destroyed());
        assert!(!obj.binding().is_retained());
    }

    #[test]
    fn test_stats_display() {
        let fx = fixture();
        let stats = fx.interp.stats();
        assert_eq!(
            stats.to_string(),
            "entries=0, depth=0, cached_classes=0, walks=0, finalized=false"
        );
    }
}
