mod common;

use briny_dispatch::handler::HandlerKind;
use briny_dispatch::prelude::*;
use briny_dispatch::{ops::cpu, vmap};
use common::{Counter, init_tracing};

#[test]
fn two_concrete_handlers_for_one_pair_are_rejected() {
    init_tracing();
    let first = Counter::default();
    let second = Counter::default();
    let mut b = RegistryBuilder::new();
    b.register(ModeKey::Autograd, "add", first.handler(Value::None)).unwrap();

    let err = b
        .register(ModeKey::Autograd, "add", second.handler(Value::None))
        .err()
        .unwrap();
    assert_eq!(
        err,
        ConfigurationError::DuplicateHandler {
            key: ModeKey::Autograd,
            target: "operator `add`".to_owned(),
            existing: HandlerKind::Concrete,
            incoming: HandlerKind::Concrete,
        }
    );
}

#[test]
fn same_concrete_handler_twice_is_still_rejected() {
    let h = Handler::concrete(|_, _| Ok(Value::None));
    let mut b = RegistryBuilder::new();
    b.register(ModeKey::Batched, "_", h.clone()).unwrap();
    assert!(b.register(ModeKey::Batched, "_", h).is_err());
}

#[test]
fn fallthrough_over_concrete_is_rejected() {
    let mut b = RegistryBuilder::new();
    b.register(ModeKey::Tracer, "sum", Handler::concrete(|_, _| Ok(Value::None)))
        .unwrap();
    assert!(matches!(
        b.register(ModeKey::Tracer, "sum", Handler::fallthrough()),
        Err(ConfigurationError::DuplicateHandler {
            existing: HandlerKind::Concrete,
            incoming: HandlerKind::Fallthrough,
            ..
        })
    ));
}

#[test]
fn identical_fallthroughs_register_idempotently() {
    init_tracing();
    let mut b = RegistryBuilder::new();
    b.register(ModeKey::VmapMode, "add", Handler::fallthrough())
        .unwrap()
        .register(ModeKey::VmapMode, "add", Handler::fallthrough())
        .unwrap();
    // Two initialization units both ensuring the vmap default.
    vmap::register_fallthrough(&mut b).unwrap();
    vmap::register_fallthrough(&mut b).unwrap();

    let r = b.build();
    assert!(r.handler("add", ModeKey::VmapMode).is_fallthrough());
    assert!(r.catch_all(ModeKey::VmapMode).is_fallthrough());
}

#[test]
fn same_operator_under_different_keys_is_independent() {
    let mut b = RegistryBuilder::new();
    for key in ModeKey::ALL {
        b.register(key, "matmul", Handler::concrete(|_, _| Ok(Value::None)))
            .unwrap();
    }
    let r = b.build();
    for key in ModeKey::ALL {
        assert_eq!(r.handler("matmul", key).kind(), HandlerKind::Concrete);
    }
}

/// A component's startup hook, as it would be written outside this crate.
fn install_autograd(b: &mut RegistryBuilder) -> Result<(), ConfigurationError> {
    b.library(ModeKey::Autograd, |lib| {
        lib.fallback(Handler::fallthrough())?
            .op("mul", Handler::concrete(|ctx, args| ctx.call_next(args)))?;
        Ok(())
    })?;
    Ok(())
}

type Component = fn(&mut RegistryBuilder) -> Result<(), ConfigurationError>;

fn init(components: &[Component]) -> Result<Registry, ConfigurationError> {
    let mut b = RegistryBuilder::new();
    for install in components {
        install(&mut b)?;
    }
    Ok(b.build())
}

#[test]
fn conflicting_components_abort_initialization() {
    init_tracing();
    let ok = init(&[vmap::register_fallthrough, install_autograd, cpu::register_kernels]);
    assert!(ok.is_ok());

    let conflict = init(&[install_autograd, install_autograd]);
    assert!(matches!(
        conflict,
        Err(ConfigurationError::DuplicateHandler {
            key: ModeKey::Autograd,
            ..
        })
    ));

    let kernels_twice = init(&[cpu::register_kernels, cpu::register_kernels]);
    assert!(matches!(
        kernels_twice,
        Err(ConfigurationError::DuplicateKernel { backend: Backend::Cpu, .. })
    ));
}

#[test]
fn invalid_operator_names_are_rejected() {
    let mut b = RegistryBuilder::new();
    let err = b
        .register(ModeKey::Python, "bad name", Handler::fallthrough())
        .err()
        .unwrap();
    assert_eq!(err, ConfigurationError::InvalidOperatorName("bad name".to_owned()));
    assert_eq!(err.to_string(), "invalid operator name `bad name`");
}

#[test]
fn registry_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Registry>();
    assert_send_sync::<Dispatcher>();

    let mut b = RegistryBuilder::new();
    vmap::register_fallthrough(&mut b).unwrap();
    cpu::register_kernels(&mut b).unwrap();
    let d = common::cpu_dispatcher(b);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let d = d.clone();
            std::thread::spawn(move || {
                let _vmap = vmap::VmapScope::enter();
                d.call("add", &[Value::Int(i), Value::Int(1)]).unwrap()
            })
        })
        .collect();
    for (i, h) in handles.into_iter().enumerate() {
        assert_eq!(h.join().unwrap(), Value::Scalar(i as f64 + 1.0));
    }
}
