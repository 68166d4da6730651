#![forbid(unsafe_code)]

//! rxdata public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub mod prelude {
    pub use rxdata_diff as diff;
    pub use rxdata_model as model;
    #[cfg(feature = "runtime")]
    pub use rxdata_runtime as runtime;
    pub use rxdata_sync as sync;
}
