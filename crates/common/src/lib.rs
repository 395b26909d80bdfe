//! Error-context plumbing shared by the workspace crates.
//!
//! Crates keep their own `Error` enums; this crate only provides the glue
//! that lets each of them grow `.context()` / `.with_context()` without
//! pulling in a catch-all error type.

/// Implemented by an error type that can absorb a plain message string.
///
/// Pair it with [`impl_context!`] in the crate's error module to get
/// `.context()` and `.with_context()` on `Result` and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait over the crate's own `Error` and
/// `Result` aliases.
///
/// Invoke at the bottom of an error module that defines
/// `Error: FromMessage` and `type Result<T> = std::result::Result<T, Error>`:
///
/// ```ignore
/// // in crates/gateway/src/error.rs
/// switchyard_common::impl_context!();
/// ```
///
/// `.context("msg")` wraps the source error (or a `None`) into
/// `Error::from_message`, prefixing the message; `.with_context(|| ...)`
/// defers building the message until a failure actually happens.
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, message: impl Into<String>) -> Result<T>;
            fn with_context<M, F>(self, make: F) -> Result<T>
            where
                M: Into<String>,
                F: FnOnce() -> M;
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, message: impl Into<String>) -> Result<T> {
                match self {
                    Some(value) => Ok(value),
                    None => Err(<Error as $crate::FromMessage>::from_message(message.into())),
                }
            }

            fn with_context<M, F>(self, make: F) -> Result<T>
            where
                M: Into<String>,
                F: FnOnce() -> M,
            {
                match self {
                    Some(value) => Ok(value),
                    None => Err(<Error as $crate::FromMessage>::from_message(make().into())),
                }
            }
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, message: impl Into<String>) -> Result<T> {
                self.with_context(|| message.into())
            }

            fn with_context<M, F>(self, make: F) -> Result<T>
            where
                M: Into<String>,
                F: FnOnce() -> M,
            {
                self.map_err(|source| {
                    let message = make().into();
                    <Error as $crate::FromMessage>::from_message(format!("{message}: {source}"))
                })
            }
        }
    };
}
