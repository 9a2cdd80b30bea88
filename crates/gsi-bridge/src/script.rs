//! Script Runtime Representations
//!
//! This module provides the bridge's view of the embedded scripting runtime.
//!
//! ## Type Hierarchy
//!
//! - `ScriptValue`: enum covering all script values
//! - `Function`: a script function with a declared positional arity
//! - `Callable`: a plain function or a method bound to a receiver
//! - `ScriptClass`: a script class, optionally backed by a native class
//! - `ScriptObject`: a script instance carrying its `BoundObject`
//! - `WeakRef`: a weak reference to a script instance
//!
//! ## Reference Counting
//!
//! Script references are `Rc` strong references. An instance is finalized
//! when its last strong reference goes away; finalization detaches the
//! native object and frees it if the script side owned it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use gsi_native::{ClassDecl, MethodDecl, MethodKind};
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::context::Interpreter;
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::{self, Heap};
use crate::object::BoundObject;
use crate::signal::SignalRelay;

/// Strong reference to a script instance
pub type ScriptRef = Rc<ScriptObject>;

/// Body of a script function
pub type FunctionBody = Rc<dyn Fn(&[ScriptValue]) -> BridgeResult<ScriptValue>>;

fn next_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// ScriptValue
// ============================================================================

/// Any value of the scripting runtime.
#[derive(Clone, Default)]
pub enum ScriptValue {
    /// `None`
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(SmolStr),
    /// Instance (compared by identity)
    Object(ScriptRef),
    /// Function or bound method (compared by identity)
    Callable(Callable),
}

impl ScriptValue {
    /// Get the script type name for this value
    pub fn type_name(&self) -> &str {
        match self {
            ScriptValue::None => "NoneType",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Int(_) => "int",
            ScriptValue::Float(_) => "float",
            ScriptValue::Str(_) => "str",
            ScriptValue::Object(obj) => obj.class().name(),
            ScriptValue::Callable(Callable::Function(_)) => "function",
            ScriptValue::Callable(Callable::Method(_)) => "method",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ScriptValue::None)
    }

    /// Truthiness as used by boolean conversion
    pub fn is_truthy(&self) -> bool {
        match self {
            ScriptValue::None => false,
            ScriptValue::Bool(b) => *b,
            ScriptValue::Int(n) => *n != 0,
            ScriptValue::Float(f) => *f != 0.0 && !f.is_nan(),
            ScriptValue::Str(s) => !s.is_empty(),
            ScriptValue::Object(_) | ScriptValue::Callable(_) => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(n) => Some(*n),
            ScriptValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ScriptValue::Float(f) => Some(*f),
            ScriptValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ScriptRef> {
        match self {
            ScriptValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            ScriptValue::Callable(c) => Some(c),
            _ => None,
        }
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScriptValue::None, ScriptValue::None) => true,
            (ScriptValue::Bool(a), ScriptValue::Bool(b)) => a == b,
            (ScriptValue::Int(a), ScriptValue::Int(b)) => a == b,
            (ScriptValue::Float(a), ScriptValue::Float(b)) => a == b,
            (ScriptValue::Str(a), ScriptValue::Str(b)) => a == b,
            (ScriptValue::Object(a), ScriptValue::Object(b)) => Rc::ptr_eq(a, b),
            (ScriptValue::Callable(a), ScriptValue::Callable(b)) => a.is(b),
            _ => false,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::None => write!(f, "None"),
            ScriptValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            ScriptValue::Int(n) => write!(f, "{}", n),
            ScriptValue::Float(x) => write!(f, "{}", x),
            ScriptValue::Str(s) => write!(f, "'{}'", s),
            ScriptValue::Object(obj) => write!(f, "<{} object #{}>", obj.class().name(), obj.id()),
            ScriptValue::Callable(c) => write!(f, "{}", c),
        }
    }
}

impl fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<i64> for ScriptValue {
    fn from(n: i64) -> Self {
        ScriptValue::Int(n)
    }
}

impl From<f64> for ScriptValue {
    fn from(x: f64) -> Self {
        ScriptValue::Float(x)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::Str(SmolStr::new(s))
    }
}

impl From<ScriptRef> for ScriptValue {
    fn from(obj: ScriptRef) -> Self {
        ScriptValue::Object(obj)
    }
}

impl From<Callable> for ScriptValue {
    fn from(c: Callable) -> Self {
        ScriptValue::Callable(c)
    }
}

// ============================================================================
// Functions and Callables
// ============================================================================

/// A script function.
///
/// `arg_count` is the declared number of positional parameters, including
/// the receiver for functions used as methods. Variadic functions declare
/// none. Builtin functions are stubs forwarding to native code.
pub struct Function {
    id: u64,
    name: SmolStr,
    arg_count: Option<usize>,
    builtin: bool,
    body: FunctionBody,
}

impl Function {
    pub fn new<F>(name: impl Into<SmolStr>, arg_count: usize, body: F) -> Rc<Self>
    where
        F: Fn(&[ScriptValue]) -> BridgeResult<ScriptValue> + 'static,
    {
        Rc::new(Self {
            id: next_id(),
            name: name.into(),
            arg_count: Some(arg_count),
            builtin: false,
            body: Rc::new(body),
        })
    }

    pub fn variadic<F>(name: impl Into<SmolStr>, body: F) -> Rc<Self>
    where
        F: Fn(&[ScriptValue]) -> BridgeResult<ScriptValue> + 'static,
    {
        Rc::new(Self {
            id: next_id(),
            name: name.into(),
            arg_count: None,
            builtin: false,
            body: Rc::new(body),
        })
    }

    pub(crate) fn builtin<F>(name: impl Into<SmolStr>, body: F) -> Rc<Self>
    where
        F: Fn(&[ScriptValue]) -> BridgeResult<ScriptValue> + 'static,
    {
        Rc::new(Self {
            id: next_id(),
            name: name.into(),
            arg_count: None,
            builtin: true,
            body: Rc::new(body),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    /// Declared positional parameter count, `None` if unknown
    pub fn arg_count(&self) -> Option<usize> {
        self.arg_count
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    pub fn call(&self, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        if let Some(expected) = self.arg_count {
            if expected != args.len() {
                return Err(BridgeError::wrong_argument_count(
                    self.name.as_str(),
                    expected,
                    args.len(),
                ));
            }
        }
        (self.body)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("arg_count", &self.arg_count)
            .field("builtin", &self.builtin)
            .finish()
    }
}

/// A function bound to a receiver.
#[derive(Clone)]
pub struct BoundMethod {
    receiver: ScriptRef,
    function: Rc<Function>,
    class: Option<Rc<ScriptClass>>,
}

impl BoundMethod {
    pub fn new(receiver: ScriptRef, function: Rc<Function>, class: Option<Rc<ScriptClass>>) -> Self {
        Self {
            receiver,
            function,
            class,
        }
    }

    pub fn receiver(&self) -> &ScriptRef {
        &self.receiver
    }

    pub fn function(&self) -> &Rc<Function> {
        &self.function
    }

    /// Class the function was looked up on
    pub fn class(&self) -> Option<&Rc<ScriptClass>> {
        self.class.as_ref()
    }

    pub fn call(&self, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(ScriptValue::Object(Rc::clone(&self.receiver)));
        argv.extend_from_slice(args);
        self.function.call(&argv)
    }
}

/// Anything that can be called from the bridge.
#[derive(Clone)]
pub enum Callable {
    Function(Rc<Function>),
    Method(BoundMethod),
}

impl Callable {
    pub fn call(&self, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        match self {
            Callable::Function(f) => f.call(args),
            Callable::Method(m) => m.call(args),
        }
    }

    /// Number of positional arguments a caller has to supply. The receiver
    /// of a bound method is not counted.
    pub fn declared_arg_count(&self) -> Option<usize> {
        match self {
            Callable::Function(f) => f.arg_count(),
            Callable::Method(m) => m.function.arg_count().map(|n| n.saturating_sub(1)),
        }
    }

    pub fn name(&self) -> &SmolStr {
        match self {
            Callable::Function(f) => f.name(),
            Callable::Method(m) => m.function.name(),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Callable::Method(_))
    }

    /// Identity comparison
    pub fn is(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Function(a), Callable::Function(b)) => Rc::ptr_eq(a, b),
            (Callable::Method(a), Callable::Method(b)) => {
                Rc::ptr_eq(&a.receiver, &b.receiver) && Rc::ptr_eq(&a.function, &b.function)
            }
            _ => false,
        }
    }
}

impl From<Rc<Function>> for Callable {
    fn from(f: Rc<Function>) -> Self {
        Callable::Function(f)
    }
}

impl From<BoundMethod> for Callable {
    fn from(m: BoundMethod) -> Self {
        Callable::Method(m)
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Function(func) if func.is_builtin() => write!(f, "<built-in method {}>", func.name()),
            Callable::Function(func) => write!(f, "<function {}>", func.name()),
            Callable::Method(m) => write!(f, "<bound method {}.{}>", m.receiver.class().name(), m.function.name()),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// ScriptClass
// ============================================================================

/// A script class.
///
/// Classes backed by a native class either are the generic class the
/// interpreter creates for a native class (exposing its methods as builtin
/// stubs) or derive from one.
pub struct ScriptClass {
    id: u64,
    name: SmolStr,
    base: Option<Rc<ScriptClass>>,
    native: Option<Rc<ClassDecl>>,
    attrs: IndexMap<SmolStr, Rc<Function>>,
}

impl ScriptClass {
    pub fn builder(name: impl Into<SmolStr>) -> ScriptClassBuilder {
        ScriptClassBuilder {
            name: name.into(),
            base: None,
            attrs: IndexMap::new(),
        }
    }

    /// Generic class exposing the regular and callback methods of a native
    /// class hierarchy as builtin stubs.
    pub(crate) fn for_native(decl: &Rc<ClassDecl>) -> Rc<Self> {
        let mut attrs = IndexMap::new();
        for method in decl.ancestors().flat_map(|cls| cls.methods().iter()) {
            if method.kind() == MethodKind::Event || attrs.contains_key(method.name()) {
                continue;
            }
            attrs.insert(method.name().clone(), native_stub(decl.name(), method));
        }

        Rc::new(Self {
            id: next_id(),
            name: decl.name().clone(),
            base: None,
            native: Some(Rc::clone(decl)),
            attrs,
        })
    }

    /// Identity of the class; never reused within a process
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    pub fn base(&self) -> Option<&Rc<ScriptClass>> {
        self.base.as_ref()
    }

    /// Native class backing instances of this class, if any
    pub fn native_class(&self) -> Option<&Rc<ClassDecl>> {
        self.native.as_ref()
    }

    /// Look up a class attribute, searching base classes too
    pub fn lookup(&self, name: &str) -> Option<Rc<Function>> {
        let mut cls = Some(self);
        while let Some(c) = cls {
            if let Some(f) = c.attrs.get(name) {
                return Some(Rc::clone(f));
            }
            cls = c.base.as_deref();
        }
        None
    }

    /// Check if the attribute is defined on this very class
    pub fn defines(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn is_subclass_of(&self, other: &ScriptClass) -> bool {
        let mut cls = Some(self);
        while let Some(c) = cls {
            if c.id == other.id {
                return true;
            }
            cls = c.base.as_deref();
        }
        false
    }
}

impl fmt::Debug for ScriptClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptClass")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base", &self.base.as_ref().map(|b| b.name.clone()))
            .field("native", &self.native.as_ref().map(|n| n.name().clone()))
            .field("attrs", &self.attrs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for script classes
pub struct ScriptClassBuilder {
    name: SmolStr,
    base: Option<Rc<ScriptClass>>,
    attrs: IndexMap<SmolStr, Rc<Function>>,
}

impl ScriptClassBuilder {
    /// Derive from `base`, inheriting its native class
    pub fn extends(mut self, base: &Rc<ScriptClass>) -> Self {
        self.base = Some(Rc::clone(base));
        self
    }

    /// Define a method taking `arg_count` positional arguments, receiver
    /// included
    pub fn def<F>(self, name: impl Into<SmolStr>, arg_count: usize, body: F) -> Self
    where
        F: Fn(&[ScriptValue]) -> BridgeResult<ScriptValue> + 'static,
    {
        let name = name.into();
        let function = Function::new(name.clone(), arg_count, body);
        self.attr(name, function)
    }

    /// Store an existing function as class attribute
    pub fn attr(mut self, name: impl Into<SmolStr>, function: Rc<Function>) -> Self {
        self.attrs.insert(name.into(), function);
        self
    }

    pub fn build(self) -> Rc<ScriptClass> {
        let native = self.base.as_ref().and_then(|b| b.native.clone());
        Rc::new(ScriptClass {
            id: next_id(),
            name: self.name,
            base: self.base,
            native,
            attrs: self.attrs,
        })
    }
}

fn native_stub(class: &SmolStr, method: &Rc<MethodDecl>) -> Rc<Function> {
    let class = class.clone();
    let method = Rc::clone(method);
    Function::builtin(method.name().clone(), move |args: &[ScriptValue]| {
        let receiver = args.first().and_then(ScriptValue::as_object).ok_or_else(|| {
            BridgeError::exception(
                "TypeError",
                format!("{}.{}() needs a {} receiver", class, method.name(), class),
            )
        })?;
        receiver.invoke_native(&method, &args[1..])
    })
}

// ============================================================================
// ScriptObject
// ============================================================================

/// A script instance.
pub struct ScriptObject {
    id: u64,
    class: Rc<ScriptClass>,
    attrs: RefCell<IndexMap<SmolStr, ScriptValue>>,
    binding: BoundObject,
}

impl ScriptObject {
    pub(crate) fn new(interp: &Rc<Interpreter>, class: &Rc<ScriptClass>) -> ScriptRef {
        Rc::new_cyclic(|owner: &Weak<ScriptObject>| ScriptObject {
            id: next_id(),
            class: Rc::clone(class),
            attrs: RefCell::new(IndexMap::new()),
            binding: BoundObject::new(owner.clone(), Rc::clone(class), Rc::downgrade(interp)),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn class(&self) -> &Rc<ScriptClass> {
        &self.class
    }

    /// The native binding of this instance
    pub fn binding(&self) -> &BoundObject {
        &self.binding
    }

    pub fn downgrade(self: &Rc<Self>) -> WeakRef {
        WeakRef(Rc::downgrade(self))
    }

    /// Instance attribute, or the class attribute bound to this instance
    pub fn get_attr(self: &Rc<Self>, name: &str) -> Option<ScriptValue> {
        let own = self.attrs.borrow().get(name).cloned();
        own.or_else(|| self.method(name).map(ScriptValue::Callable))
    }

    pub fn set_attr(&self, name: impl Into<SmolStr>, value: ScriptValue) {
        let previous = self.attrs.borrow_mut().insert(name.into(), value);
        drop(previous);
    }

    /// Class attribute bound to this instance
    pub fn method(self: &Rc<Self>, name: &str) -> Option<Callable> {
        self.class.lookup(name).map(|function| {
            Callable::Method(BoundMethod::new(Rc::clone(self), function, Some(Rc::clone(&self.class))))
        })
    }

    pub fn call_method(self: &Rc<Self>, name: &str, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        let method = self
            .method(name)
            .ok_or_else(|| BridgeError::attribute_not_found(name, self.class.name().as_str()))?;
        method.call(args)
    }

    /// Relay of a native event of this instance
    pub fn signal(&self, event: &str) -> BridgeResult<Rc<SignalRelay>> {
        self.binding.signal(event)
    }

    /// Subscribe to a native event
    pub fn connect(&self, event: &str, callable: Callable) -> BridgeResult<()> {
        self.signal(event)?.add(callable);
        Ok(())
    }

    /// Unsubscribe from a native event
    pub fn disconnect(&self, event: &str, callable: &Callable) -> BridgeResult<bool> {
        Ok(self.signal(event)?.remove(callable))
    }

    /// Run the native body of `method` on this instance's native object.
    pub(crate) fn invoke_native(&self, method: &MethodDecl, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        if args.len() != method.arg_count() {
            return Err(BridgeError::wrong_argument_count(
                method.name().as_str(),
                method.arg_count(),
                args.len(),
            ));
        }

        let interp = self.binding.interpreter()?;
        let handle = self.binding.handle()?;

        let mut heap = Heap::new();
        let values = args
            .iter()
            .zip(method.args())
            .map(|(value, arg)| marshal::script_to_native(value, &arg.ty, &mut heap))
            .collect::<BridgeResult<Vec<_>>>()?;

        let result = handle.call_base(method.name(), &values)?;
        marshal::native_to_script(&interp, result)
    }
}

impl Drop for ScriptObject {
    fn drop(&mut self) {
        self.binding.finalize();
    }
}

impl fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptObject")
            .field("id", &self.id)
            .field("class", self.class.name())
            .field("binding", &self.binding)
            .finish()
    }
}

/// Weak reference to a script instance
#[derive(Clone)]
pub struct WeakRef(Weak<ScriptObject>);

impl WeakRef {
    pub fn new(obj: &ScriptRef) -> Self {
        WeakRef(Rc::downgrade(obj))
    }

    pub fn upgrade(&self) -> Option<ScriptRef> {
        self.0.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Identity comparison; stays valid after the referent is gone
    pub fn ptr_eq(&self, other: &WeakRef) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakRef(alive={})", self.is_alive())
    }
}
