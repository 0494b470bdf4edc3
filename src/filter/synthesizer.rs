//! Builds the capture-exclusion expression for one agent connection.
//!
//! The expression is a chain of `not host X` clauses: the collector's own
//! address first (so the capture never feeds back on itself), then one
//! clause per exception-list entry in list order, then the user's own
//! filter fragment verbatim. Clause order is deterministic.

use std::io::BufRead;
use std::net::IpAddr;

use log::{debug, warn};
use regex::Regex;

use crate::error_handling::types::FilterError;
use crate::filter::resolver::DomainResolver;

pub struct FilterSynthesizer {
    domain_pattern: Regex,
}

impl FilterSynthesizer {
    pub fn new() -> Self {
        // Label syntax per RFC 1035, underscores tolerated as govalidator
        // style DNS-name checks do.
        let domain_pattern =
            Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]{0,62}(\.[A-Za-z0-9_][A-Za-z0-9_-]{0,62})*\.?$")
                .unwrap();
        FilterSynthesizer { domain_pattern }
    }

    /// Entries that parse as IP addresses are literals, never domains.
    fn is_domain_name(&self, entry: &str) -> bool {
        !entry.is_empty()
            && entry.len() <= 253
            && entry.parse::<IpAddr>().is_err()
            && self.domain_pattern.is_match(entry)
    }

    /// Synthesizes the exclusion expression from a newline-delimited
    /// exception list.
    ///
    /// Domain entries are resolved only when `resolve_domains` is set, one
    /// clause per resolved address; a failed resolution skips the entry.
    /// Everything else (literal hosts, and domains when resolution is off)
    /// becomes one clause as written. `extra_filter` is appended verbatim.
    pub async fn synthesize<R, D>(
        &self,
        exception_list: R,
        collector_address: &str,
        resolve_domains: bool,
        extra_filter: &str,
        resolver: &D,
    ) -> Result<String, FilterError>
    where
        R: BufRead,
        D: DomainResolver,
    {
        let mut clauses = vec![format!("not host {}", collector_address)];

        for line in exception_list.lines() {
            let line = line?;
            let entry = line.trim();
            if entry.is_empty() {
                continue;
            }

            if resolve_domains && self.is_domain_name(entry) {
                match resolver.resolve(entry).await {
                    Ok(addresses) => {
                        for address in addresses {
                            clauses.push(format!("not host {}", address));
                        }
                    }
                    Err(e) => {
                        warn!("skipping exception entry {}: {}", entry, e);
                    }
                }
            } else {
                clauses.push(format!("not host {}", entry));
            }
        }

        let mut expression = clauses.join(" and ");
        if !extra_filter.is_empty() {
            expression.push(' ');
            expression.push_str(extra_filter);
        }

        debug!("synthesized capture filter: {}", expression);
        Ok(expression)
    }
}

impl Default for FilterSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetches the newline-delimited exception list the collector publishes.
pub async fn fetch_exception_list(collector_address: &str, http_port: u16) -> Result<String, FilterError> {
    let url = format!("http://{}:{}/exceptions.list", collector_address, http_port);
    let response = reqwest::get(&url)
        .await
        .map_err(|e| FilterError::FetchFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FilterError::FetchFailed(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }

    response
        .text()
        .await
        .map_err(|e| FilterError::FetchFailed(e.to_string()))
}
