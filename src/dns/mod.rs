//! DNS Resolution Module
//!
//! Discovers the OS resolver configuration and races queries across every
//! nameserver it lists:
//! - [`scutil`]: parse `scutil --dns` output into resolver groups
//! - [`dialer`]: the `Dial` hook that opens a staggered fan-out connection
//! - [`stub`]: a small resolver that queries through any `Dial` hook
//! - [`GaiResolver`]: the platform `getaddrinfo` resolver
//!
//! # Example
//!
//! ```rust,ignore
//! use fanoutdns::dns::{system_resolver, Name};
//!
//! let resolver = system_resolver();
//! for addr in resolver.resolve(Name::new("example.com")).await? {
//!     println!("Resolved: {}", addr.ip());
//! }
//! ```

pub mod dialer;
mod gai;
mod resolve;
pub mod scutil;
pub mod stub;
mod system;

pub use dialer::{Dial, DialFuture, DialerConfig, StaggeredDialer};
pub use gai::GaiResolver;
pub use resolve::{Addrs, Name, Resolve, Resolving};
pub use scutil::{
    ConfigFuture, ConfigSource, ReachFlag, Resolver, ResolverConfig, ResolverFlag, ScutilCommand,
};
pub use stub::{StubResolver, StubResolverConfig};
pub use system::{system_resolver, system_resolver_with};
