#[allow(unused_imports)]
pub(crate) use self::inner::*;

// NOTE: `Arc` and `Weak` always come from `std`, since loom's `Arc` has no
// `Weak` and both appear in public signatures.
#[cfg(loom)]
mod inner {
    #![allow(dead_code)]
    pub(crate) use loom::{model, thread};

    pub(crate) mod sync {
        pub(crate) use loom::sync::atomic;
    }
}

#[cfg(not(loom))]
mod inner {
    #![allow(dead_code)]
    pub(crate) mod sync {
        pub(crate) use core::sync::atomic;
    }

    #[cfg(test)]
    pub(crate) use std::thread;

    /// Runs `f` once. Under `cfg(loom)`, this explores every interleaving
    /// instead.
    #[cfg(test)]
    pub(crate) fn model(f: impl Fn() + Sync + Send + 'static) {
        let _trace = crate::util::test::trace_init();
        f()
    }
}
