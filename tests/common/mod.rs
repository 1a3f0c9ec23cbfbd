#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use briny_dispatch::prelude::*;
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output through the test harness; `RUST_LOG=trace` shows every hop.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Freezes `builder` into a CPU dispatcher.
pub fn cpu_dispatcher(builder: RegistryBuilder) -> Dispatcher {
    Dispatcher::with_config(
        Arc::new(builder.build()),
        DispatchConfig::default().with_backend(Backend::Cpu),
    )
}

/// A shared invocation counter.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// A handler that counts its calls and returns `value`.
    pub fn handler(&self, value: Value) -> Handler {
        let counter = self.clone();
        Handler::concrete(move |_, _| {
            counter.bump();
            Ok(value.clone())
        })
    }

    /// A handler that counts its calls and forwards below itself.
    pub fn forwarding(&self) -> Handler {
        let counter = self.clone();
        Handler::concrete(move |ctx, args| {
            counter.bump();
            ctx.call_next(args)
        })
    }
}
