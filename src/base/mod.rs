//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): the crate-wide error type
//! - [`IoResultExt`](context::IoResultExt): `io::Error` to `NetError` context helpers

pub mod context;
pub mod neterror;
