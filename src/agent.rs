//! Agent subsystem: everything that runs on a monitored host.
//!
//! Re-exports:
//! - [`Uplink`]: registration and the capture stream toward the collector.
//! - [`CaptureSource`], [`CapturedFrame`], [`ReplaySource`]: the opened
//!   capture handle seen as an opaque frame producer.

pub mod capture_source;
pub mod uplink;

pub use capture_source::{CaptureSource, CapturedFrame, ReplaySource};
pub use uplink::{StreamStats, Uplink, SEND_QUEUE_CAPACITY};

use std::io::Cursor;

use crate::configuration::AgentConfig;
use crate::error_handling::types::AgentError;
use crate::filter::{fetch_exception_list, FilterSynthesizer, PublicDnsResolver};

/// Builds the capture-exclusion expression for this agent: the collector's
/// published exception list (when enabled) folded together with the user's
/// filter fragment. The collector's own address is always excluded so the
/// stream never captures itself.
pub async fn build_capture_filter(config: &AgentConfig) -> Result<String, AgentError> {
    let list = if config.use_exception_list {
        fetch_exception_list(&config.collector_address, config.http_port).await?
    } else {
        String::new()
    };

    let synthesizer = FilterSynthesizer::new();
    let resolver = PublicDnsResolver::new();
    let filter = synthesizer
        .synthesize(
            Cursor::new(list),
            &config.collector_address,
            config.resolve_domains,
            &config.capture_filter,
            &resolver,
        )
        .await?;
    Ok(filter)
}
