//! Platform resolver selection.

use super::{DialerConfig, GaiResolver, Resolve, StubResolverConfig};
use std::sync::Arc;

/// The resolver to use for this platform, with default settings.
///
/// On macOS, queries race across every nameserver from `scutil --dns`
/// through a [`StaggeredDialer`](super::StaggeredDialer), falling back to
/// `getaddrinfo` when no connection can be made. Elsewhere this is the
/// plain [`GaiResolver`].
pub fn system_resolver() -> Arc<dyn Resolve> {
    system_resolver_with(DialerConfig::default(), StubResolverConfig::default())
}

#[cfg(target_os = "macos")]
pub fn system_resolver_with(dialer: DialerConfig, stub: StubResolverConfig) -> Arc<dyn Resolve> {
    use super::{ScutilCommand, StaggeredDialer, StubResolver};

    tracing::debug!(?dialer, ?stub, "using staggered scutil resolver");
    let dialer = StaggeredDialer::new(ScutilCommand::default()).with_config(dialer);
    Arc::new(
        StubResolver::new(dialer)
            .with_config(stub)
            .with_fallback(GaiResolver::new()),
    )
}

#[cfg(not(target_os = "macos"))]
pub fn system_resolver_with(_dialer: DialerConfig, _stub: StubResolverConfig) -> Arc<dyn Resolve> {
    tracing::debug!("using getaddrinfo resolver");
    Arc::new(GaiResolver::new())
}
