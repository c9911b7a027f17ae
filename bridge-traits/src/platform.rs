//! Thread-safety bounds that follow the compilation target.
//!
//! Download providers and logger sinks are shared between the engine task and
//! the download tasks on native targets, so they must be `Send + Sync`. A
//! browser host is single threaded and its JS handles are neither; there the
//! bounds disappear.

pub use target::{PlatformBoxFuture, PlatformSendSync};

#[cfg(not(target_arch = "wasm32"))]
mod target {
    /// `Send + Sync` on native targets.
    pub trait PlatformSendSync: Send + Sync {}

    impl<T: Send + Sync> PlatformSendSync for T {}

    /// Future handed back to the core by host hooks.
    pub type PlatformBoxFuture<T> = futures::future::BoxFuture<'static, T>;
}

#[cfg(target_arch = "wasm32")]
mod target {
    /// No bound on `wasm32`.
    pub trait PlatformSendSync {}

    impl<T> PlatformSendSync for T {}

    pub type PlatformBoxFuture<T> = futures::future::LocalBoxFuture<'static, T>;
}
