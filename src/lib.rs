//! # fanoutdns
//!
//! Multi-nameserver DNS dialing for macOS.
//!
//! The OS keeps several resolver groups (scoped, supplemental, per-domain),
//! but a resolver handed a single nameserver stalls whenever that one server
//! is slow or unreachable. `fanoutdns` reads every group from `scutil --dns`,
//! opens a UDP connection to each nameserver, and races DNS exchanges across
//! them, enabling backup servers on a schedule.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fanoutdns::dns::{system_resolver, Name};
//!
//! #[tokio::main]
//! async fn main() {
//!     let resolver = system_resolver();
//!     let addrs = resolver.resolve(Name::new("example.com")).await.unwrap();
//!     for addr in addrs {
//!         println!("{}", addr.ip());
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error definitions and context helpers
//! - [`dns`] - Resolver configuration, the staggered dialer, and resolvers
//! - [`socket`] - Datagram connections and fan-out

pub mod base;
pub mod dns;
pub mod socket;
