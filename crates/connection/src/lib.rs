#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Definition of the `Connection` trait.
//!
//! A connection is a long-lived handle to an external system (an HTTP
//! session, a database pool). It is owned by the service registry,
//! referenced by id from pipeline stages and lookups, and its lifecycle
//! is independent of any one pipeline. The runtime treats it as opaque:
//! concrete connections downcast on their own side by keeping a typed
//! `Arc` next to the registered one.

/// The connection trait.
pub trait Connection: Send + Sync {
    /// Returns the id under which the connection is registered.
    fn id(&self) -> &str;
}

#[cfg(test)]
mod test {
    use super::*;

    struct FakeDatabase {
        id: String,
    }

    impl Connection for FakeDatabase {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn test_connection_object() {
        let connection: Box<dyn Connection> = Box::new(FakeDatabase { id: "db".into() });
        assert_eq!(connection.id(), "db");
    }
}
