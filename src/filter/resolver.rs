//! Domain resolution for filter synthesis.
//!
//! Resolution is a pluggable capability so synthesis can be tested with a
//! deterministic stub. The production implementation queries a fixed
//! public resolver directly instead of whatever the host's stub resolver
//! is, with a bounded timeout and a single attempt per name.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::error_handling::types::FilterError;

/// Fixed public resolver the agent asks, bypassing the local one.
pub const PUBLIC_DNS: ([u8; 4], u16) = ([8, 8, 8, 8], 53);

pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

pub trait DomainResolver {
    /// Resolves one name to its addresses. A failed lookup is reported,
    /// not fatal; synthesis skips the entry.
    fn resolve(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Vec<IpAddr>, FilterError>> + Send;
}

pub struct PublicDnsResolver {
    resolver: TokioAsyncResolver,
}

impl PublicDnsResolver {
    pub fn new() -> Self {
        Self::with_timeout(RESOLVE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(
            SocketAddr::from(PUBLIC_DNS),
            Protocol::Udp,
        ));

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;

        PublicDnsResolver {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

impl Default for PublicDnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainResolver for PublicDnsResolver {
    async fn resolve(&self, name: &str) -> Result<Vec<IpAddr>, FilterError> {
        let lookup = self
            .resolver
            .lookup_ip(name)
            .await
            .map_err(|e| FilterError::ResolutionFailed(format!("{}: {}", name, e)))?;
        Ok(lookup.iter().collect())
    }
}
