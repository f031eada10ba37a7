#![doc = include_str!("../README.md")]
#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results,
    variant_size_differences
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Pumphouse is a library to build **pipelines** combining sources,
//! processors, and sinks. The inputs of a pipeline are represented by
//! one or more sources pushing events into a chain of processors, which
//! transform, drop, or multiply them until the terminal sink consumes
//! them.
//!
//! An **app** is an execution environment for one or more pipelines
//! running in parallel, together with the shared bus, metric registry,
//! connections, and lookups they use.

pub use bus;
pub use connection;
pub use context;
pub use engine;
pub use lookup;
pub use metrics;
pub use pipeline;
pub use processor;
pub use source;
pub use task;
pub use trigger;
