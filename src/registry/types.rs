use serde::{Deserialize, Serialize};

/// Identity an agent announces at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub ip_address: String,
    pub hostname: String,
    pub interface: String,
}

/// Collector-side record of one agent, keyed by its network address.
///
/// Owned by the [`EndpointRegistry`](super::EndpointRegistry); everything
/// handed out is a snapshot clone, never a live reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub hostname: String,
    pub ip_address: String,
    /// Source interface on the agent, informational only.
    pub interface: String,
    /// Base name for this endpoint's trace files.
    pub trace_file_base: String,
    /// Cumulative packets written across all sessions of this endpoint.
    pub packet_count: u64,
    pub streaming_now: bool,
}

impl Endpoint {
    pub fn from_info(info: &EndpointInfo) -> Self {
        Endpoint {
            hostname: info.hostname.clone(),
            ip_address: info.ip_address.clone(),
            interface: info.interface.clone(),
            trace_file_base: format!(
                "{}-({})",
                file_safe(&info.hostname),
                file_safe(&info.ip_address)
            ),
            packet_count: 0,
            streaming_now: false,
        }
    }
}

/// Agent-supplied identity goes into trace-file names; anything that could
/// act as a path separator or component must not survive.
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(hostname: &str, ip: &str) -> EndpointInfo {
        EndpointInfo {
            ip_address: ip.to_string(),
            hostname: hostname.to_string(),
            interface: "eth0".to_string(),
        }
    }

    #[test]
    fn test_trace_file_base_keeps_plain_hostnames() {
        let endpoint = Endpoint::from_info(&info("sensor-01.lan", "10.0.0.7"));
        assert_eq!(endpoint.trace_file_base, "sensor-01.lan-(10.0.0.7)");
    }

    #[test]
    fn test_trace_file_base_strips_path_separators() {
        let endpoint = Endpoint::from_info(&info("../../etc/passwd", "10.0.0.7"));

        assert!(!endpoint.trace_file_base.contains('/'));
        assert!(!endpoint.trace_file_base.contains('\\'));
        assert_eq!(endpoint.trace_file_base, ".._.._etc_passwd-(10.0.0.7)");
        // the announced hostname itself is kept verbatim
        assert_eq!(endpoint.hostname, "../../etc/passwd");
    }
}
