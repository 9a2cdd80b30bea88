//! Shared test fixtures

use std::rc::Rc;

use gsi_native::{ArgDecl, ClassDecl, ClassRegistry, NativeType, NativeValue};

use crate::context::Interpreter;
use crate::BridgeConfig;

pub(crate) struct Fixture {
    pub interp: Rc<Interpreter>,
    /// Managed: `area()`, `describe(prefix)`, `name()`, event `moved(dx, dy)`
    pub shape: Rc<ClassDecl>,
    /// Unmanaged: `value()`
    pub plain: Rc<ClassDecl>,
}

pub(crate) fn shape_class() -> Rc<ClassDecl> {
    ClassDecl::builder("Shape")
        .managed(true)
        .callback("area", [], NativeType::Int)
        .callback_with(
            "describe",
            [ArgDecl::new("prefix", NativeType::StrRef)],
            NativeType::Str,
            |_, args| {
                let prefix = args.first().and_then(NativeValue::as_str).unwrap_or_default();
                Ok(NativeValue::Str(format!("{}shape", prefix).into()))
            },
        )
        .method("name", [], NativeType::Str, |handle, _| {
            Ok(NativeValue::Str(handle.class().name().clone()))
        })
        .event(
            "moved",
            [ArgDecl::new("dx", NativeType::Int), ArgDecl::new("dy", NativeType::Int)],
            NativeType::Int,
        )
        .build()
}

pub(crate) fn fixture_with(config: BridgeConfig) -> Fixture {
    let shape = shape_class();
    let plain = ClassDecl::builder("Plain")
        .callback("value", [], NativeType::Int)
        .build();

    let mut registry = ClassRegistry::new();
    registry.register(Rc::clone(&shape)).expect("register Shape");
    registry.register(Rc::clone(&plain)).expect("register Plain");

    Fixture {
        interp: Interpreter::new(config, registry),
        shape,
        plain,
    }
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(BridgeConfig::default())
}
