//! Method Descriptors
//!
//! A class declares three kinds of methods:
//!
//! - **Regular** methods are plain native functions.
//! - **Callback** methods are virtual: script subclasses may override them,
//!   and native code calling them is routed to the override if one is
//!   installed on the object.
//! - **Event** methods describe a native event that native code emits and
//!   any number of script subscribers receive.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use smol_str::SmolStr;

use crate::error::NativeResult;
use crate::object::NativeHandle;
use crate::types::{NativeType, NativeValue};

/// Native implementation of a method body.
pub type NativeImpl = Rc<dyn Fn(&NativeHandle, &[NativeValue]) -> NativeResult<NativeValue>>;

/// Process-unique method identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);

impl MethodId {
    fn next() -> Self {
        static NEXT_ID: AtomicU32 = AtomicU32::new(1);
        MethodId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Kind of a method declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Regular,
    Callback,
    Event,
}

/// A declared argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDecl {
    pub name: SmolStr,
    pub ty: NativeType,
}

impl ArgDecl {
    pub fn new(name: impl Into<SmolStr>, ty: NativeType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Descriptor of one method of a native class.
pub struct MethodDecl {
    id: MethodId,
    name: SmolStr,
    kind: MethodKind,
    args: Vec<ArgDecl>,
    ret: NativeType,
    body: Option<NativeImpl>,
}

impl MethodDecl {
    pub(crate) fn new(
        name: SmolStr,
        kind: MethodKind,
        args: Vec<ArgDecl>,
        ret: NativeType,
        body: Option<NativeImpl>,
    ) -> Self {
        Self {
            id: MethodId::next(),
            name,
            kind,
            args,
            ret,
            body,
        }
    }

    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Check if script code may override this method
    pub fn is_callback(&self) -> bool {
        self.kind == MethodKind::Callback
    }

    pub fn is_event(&self) -> bool {
        self.kind == MethodKind::Event
    }

    pub fn args(&self) -> &[ArgDecl] {
        &self.args
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn ret_type(&self) -> &NativeType {
        &self.ret
    }

    /// Check if the method has a native body
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Run the native body, or yield the declared default value when the
    /// method has none (pure virtual callbacks, events without handler).
    pub fn call_native(&self, handle: &NativeHandle, args: &[NativeValue]) -> NativeResult<NativeValue> {
        match &self.body {
            Some(body) => body(handle, args),
            None => Ok(self.ret.default_value()),
        }
    }
}

impl fmt::Debug for MethodDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDecl")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("args", &self.args)
            .field("ret", &self.ret)
            .finish()
    }
}

impl fmt::Display for MethodDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.ret, self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", arg.ty, arg.name)?;
        }
        write!(f, ")")
    }
}

impl PartialEq for MethodDecl {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MethodDecl {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = MethodDecl::new("a".into(), MethodKind::Regular, vec![], NativeType::Void, None);
        let b = MethodDecl::new("a".into(), MethodKind::Regular, vec![], NativeType::Void, None);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_display() {
        let m = MethodDecl::new(
            "resize".into(),
            MethodKind::Callback,
            vec![ArgDecl::new("w", NativeType::Int), ArgDecl::new("label", NativeType::StrRef)],
            NativeType::Bool,
            None,
        );
        assert!(m.is_callback());
        assert_eq!(m.arg_count(), 2);
        assert_eq!(m.to_string(), "bool resize(int w, const string & label)");
    }
}
