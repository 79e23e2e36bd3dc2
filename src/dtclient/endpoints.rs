// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Parsing of communication endpoints into `{protocol, host, port}` tuples.

use crate::types::dynakube::CommunicationHostStatus;
use tracing::warn;
use url::Url;

const ACTIVEGATE_DEFAULT_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommunicationHost {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl From<&CommunicationHost> for CommunicationHostStatus {
    fn from(host: &CommunicationHost) -> Self {
        CommunicationHostStatus {
            protocol: host.protocol.clone(),
            host: host.host.clone(),
            port: host.port,
        }
    }
}

impl From<&CommunicationHostStatus> for CommunicationHost {
    fn from(status: &CommunicationHostStatus) -> Self {
        CommunicationHost {
            protocol: status.protocol.clone(),
            host: status.host.clone(),
            port: status.port,
        }
    }
}

fn parse(endpoint: &str, default_port: Option<u16>) -> Option<CommunicationHost> {
    let url = match Url::parse(endpoint) {
        Ok(url) => url,
        Err(e) => {
            warn!("Skipping invalid communication endpoint '{}': {}", endpoint, e);
            return None;
        }
    };
    let host = url.host_str().filter(|h| !h.is_empty())?;
    // `Url::port` hides a port equal to the scheme default, even when written out
    let written_port = url.port().or_else(|| {
        url.port_or_known_default()
            .filter(|p| endpoint.contains(&format!("{}:{}", host, p)))
    });
    let port = written_port
        .or(default_port)
        .or_else(|| url.port_or_known_default())?;

    Some(CommunicationHost {
        protocol: url.scheme().to_string(),
        host: host.to_string(),
        port,
    })
}

fn collect_unique(hosts: impl Iterator<Item = CommunicationHost>) -> Vec<CommunicationHost> {
    let mut unique: Vec<CommunicationHost> = Vec::new();
    for host in hosts {
        if !unique.contains(&host) {
            unique.push(host);
        }
    }
    unique
}

/// Parse the comma separated ActiveGate endpoint list. Ports default to 80.
pub fn parse_activegate_endpoints(endpoints: &str) -> Vec<CommunicationHost> {
    collect_unique(
        endpoints
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .filter_map(|e| parse(e, Some(ACTIVEGATE_DEFAULT_PORT))),
    )
}

/// Parse OneAgent communication endpoints, ports default to the scheme's port.
pub fn parse_oneagent_endpoints<'a>(endpoints: impl IntoIterator<Item = &'a str>) -> Vec<CommunicationHost> {
    collect_unique(
        endpoints
            .into_iter()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .filter_map(|e| parse(e, None)),
    )
}
