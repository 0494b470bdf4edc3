//! Shared table of known agents.
//!
//! The registry is the only state shared across concurrent capture
//! sessions, so every access goes through one registry-wide lock. Critical
//! sections are short (map lookup plus a field update); nothing holds the
//! lock across IO.

use std::collections::HashMap;
use std::sync::Mutex;

use log::info;

use crate::error_handling::types::SessionError;
use crate::registry::types::{Endpoint, EndpointInfo};

pub struct EndpointRegistry {
    endpoints: Mutex<HashMap<String, Endpoint>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        EndpointRegistry {
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Create-or-fetch by address. Re-registration from a known address
    /// returns the existing entry unchanged; counters survive.
    pub fn register(&self, info: &EndpointInfo) -> Endpoint {
        let mut endpoints = self.endpoints.lock().unwrap();
        if let Some(existing) = endpoints.get(&info.ip_address) {
            return existing.clone();
        }

        let endpoint = Endpoint::from_info(info);
        info!(
            "endpoint {} ({}) registered via {}",
            endpoint.hostname, endpoint.ip_address, endpoint.interface
        );
        endpoints.insert(info.ip_address.clone(), endpoint.clone());
        endpoint
    }

    pub fn lookup(&self, address: &str) -> Option<Endpoint> {
        self.endpoints.lock().unwrap().get(address).cloned()
    }

    /// Claims the single active-session slot of an endpoint. The duplicate
    /// check and the flag set happen under the same lock, so two capture
    /// connections racing for one endpoint cannot both win.
    pub fn begin_stream(&self, address: &str) -> Result<Endpoint, SessionError> {
        let mut endpoints = self.endpoints.lock().unwrap();
        let endpoint = endpoints
            .get_mut(address)
            .ok_or_else(|| SessionError::UnknownEndpoint(address.to_string()))?;

        if endpoint.streaming_now {
            return Err(SessionError::DuplicateActiveSession(address.to_string()));
        }
        endpoint.streaming_now = true;
        Ok(endpoint.clone())
    }

    /// Releases the active-session slot. Harmless for unknown addresses so
    /// session teardown never has to special-case a racing deregistration.
    pub fn end_stream(&self, address: &str) {
        if let Some(endpoint) = self.endpoints.lock().unwrap().get_mut(address) {
            endpoint.streaming_now = false;
        }
    }

    pub fn add_packets(&self, address: &str, count: u64) {
        if let Some(endpoint) = self.endpoints.lock().unwrap().get_mut(address) {
            endpoint.packet_count += count;
        }
    }

    /// Snapshot of every known endpoint, for the operator HTTP surface.
    pub fn snapshot(&self) -> Vec<Endpoint> {
        let mut all: Vec<Endpoint> = self.endpoints.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.ip_address.cmp(&b.ip_address));
        all
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}
