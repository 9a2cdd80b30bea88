//! Integration tests for the native object model.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use gsi_native::{
    ArgDecl, Callback, CallbackError, CallbackTarget, ClassDecl, ClassRegistry, EventHandler, MethodDecl,
    NativeError, NativeType, NativeValue, SerialArgs, StatusEvent, StatusListener,
};

fn widget_class() -> Rc<ClassDecl> {
    ClassDecl::builder("Widget")
        .managed(true)
        .callback_with("size", [], NativeType::Int, |_, _| Ok(NativeValue::Int(1)))
        .event("clicked", [ArgDecl::new("button", NativeType::Int)], NativeType::Bool)
        .build()
}

/// Callback target answering every call with a fixed value
struct Fixed(i64);

impl CallbackTarget for Fixed {
    fn call(&self, _id: usize, _args: &mut SerialArgs, ret: &mut SerialArgs) -> Result<(), CallbackError> {
        ret.write(NativeValue::Int(self.0));
        Ok(())
    }
}

// ============================================================================
// Class Hierarchy
// ============================================================================

mod hierarchy {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_derived_class_inherits_methods_and_management() {
        let widget = widget_class();
        let button = ClassDecl::builder("Button")
            .base(&widget)
            .callback("label", [], NativeType::Str)
            .build();

        assert!(button.is_managed());
        assert!(button.is_a(&widget));
        assert!(!widget.is_a(&button));
        assert_eq!(
            button.ancestors().map(|c| c.name().to_string()).collect::<Vec<_>>(),
            vec!["Button", "Widget"]
        );
        assert!(button.find_method("size").is_some());
    }

    #[test]
    fn test_registry_lists_subclasses() {
        let widget = widget_class();
        let button = ClassDecl::builder("Button").base(&widget).build();
        let mut registry = ClassRegistry::new();
        registry.register(Rc::clone(&widget)).unwrap();
        registry.register(button).unwrap();

        let names: Vec<_> = registry.subclasses("Widget").map(|c| c.name().to_string()).collect();
        assert!(names.contains(&"Button".to_string()));
        assert!(matches!(
            registry.register(widget),
            Err(NativeError::DuplicateClass { .. })
        ));
    }
}

// ============================================================================
// Virtual Calls and Events
// ============================================================================

mod calls {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_override_replaces_native_body() {
        let widget = widget_class();
        let handle = widget.create();
        let size = widget.find_method("size").unwrap();

        assert_eq!(handle.call("size", &[]).unwrap(), NativeValue::Int(1));

        handle.set_callback(size.id(), Some(Callback::new(0, Rc::new(Fixed(5)))));
        assert_eq!(handle.call("size", &[]).unwrap(), NativeValue::Int(5));
        assert_eq!(handle.call_base("size", &[]).unwrap(), NativeValue::Int(1));

        handle.set_callback(size.id(), None);
        assert_eq!(handle.call("size", &[]).unwrap(), NativeValue::Int(1));
    }

    #[test]
    fn test_emit_without_handler_returns_default() {
        let widget = widget_class();
        let handle = widget.create();
        assert_eq!(handle.emit("clicked", &[NativeValue::Int(1)]).unwrap(), NativeValue::Bool(false));
        assert!(matches!(
            handle.emit("size", &[]),
            Err(NativeError::NotAnEvent { .. })
        ));
    }

    #[test]
    fn test_handler_error_carries_context() {
        struct Failing;
        impl EventHandler for Failing {
            fn call(&self, _: &MethodDecl, _: &mut SerialArgs, _: &mut SerialArgs) -> Result<(), CallbackError> {
                Err("handler failed".into())
            }
        }

        let widget = widget_class();
        let handle = widget.create();
        let clicked = widget.find_method("clicked").unwrap();
        handle.add_handler(clicked.id(), Rc::new(Failing));

        let err = handle.emit("clicked", &[NativeValue::Int(1)]).unwrap_err();
        assert_eq!(err.to_string(), "error in callback 'Widget.clicked': handler failed");
    }
}

// ============================================================================
// Destruction and Ownership
// ============================================================================

mod lifecycle {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Recorder(RefCell<Vec<StatusEvent>>);

    impl StatusListener for Recorder {
        fn status_changed(&self, event: StatusEvent) {
            self.0.borrow_mut().push(event);
        }
    }

    #[test]
    fn test_ledger_reports_keep_release_destroyed() {
        let widget = widget_class();
        let handle = widget.create();
        let recorder = Rc::new(Recorder(RefCell::new(Vec::new())));
        handle.ledger().unwrap().subscribe(recorder.clone());

        handle.keep();
        assert!(handle.ledger().unwrap().already_kept());
        handle.release();
        widget.destroy(&handle).unwrap();

        assert_eq!(
            *recorder.0.borrow(),
            vec![StatusEvent::Keep, StatusEvent::Release, StatusEvent::Destroyed]
        );
    }

    #[test]
    fn test_destroyed_object_has_no_listeners() {
        let widget = widget_class();
        let handle = widget.create();
        let recorder = Rc::new(Recorder(RefCell::new(Vec::new())));
        handle.ledger().unwrap().subscribe(recorder.clone());

        widget.destroy(&handle).unwrap();
        assert_eq!(handle.ledger().unwrap().listener_count(), 0);

        handle.release();
        handle.keep();
        assert_eq!(*recorder.0.borrow(), vec![StatusEvent::Destroyed]);
    }

    #[test]
    fn test_destroy_runs_hooks_and_clears_slots() {
        let hooks = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hooks);
        let widget = ClassDecl::builder("Widget")
            .callback("size", [], NativeType::Int)
            .on_destroy(move |_| counter.set(counter.get() + 1))
            .build();
        let handle = widget.create();
        let size = widget.find_method("size").unwrap();
        handle.set_callback(size.id(), Some(Callback::new(0, Rc::new(Fixed(5)))));

        widget.destroy(&handle).unwrap();
        assert_eq!(hooks.get(), 1);
        assert!(handle.is_destroyed());
        assert_eq!(handle.callback_count(), 0);
        assert_eq!(widget.live_instances(), 0);

        assert!(matches!(widget.destroy(&handle), Err(NativeError::Destroyed { .. })));
        assert!(matches!(handle.call("size", &[]), Err(NativeError::Destroyed { .. })));
    }

    #[test]
    fn test_unmanaged_class_has_no_ledger() {
        let plain = ClassDecl::builder("Plain").build();
        let handle = plain.create();
        assert!(handle.ledger().is_none());
        handle.keep();
        assert!(!handle.is_destroyed());
    }
}
