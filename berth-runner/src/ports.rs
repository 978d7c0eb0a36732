//! Host port allocation
//!
//! Maps declared container ports onto free host ports from the ephemeral
//! range. Candidates are bind-probed on the loopback interface, and a
//! process-wide reservation set ensures concurrent runs never receive the
//! same host port even before their containers bind it.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Mutex;

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use berth_core::domain::config::PortRequest;
use berth_core::domain::ports::PortBinding;

/// Failure to produce host bindings for a request set.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PortAllocError {
    pub message: String,
}

impl PortAllocError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Maps abstract port requests to concrete host bindings.
pub trait PortAllocator: Send + Sync {
    fn allocate(&self, requests: &[PortRequest]) -> Result<Vec<PortBinding>, PortAllocError>;
}

/// Allocator probing random ports in the IANA ephemeral range.
pub struct RandomPortAllocator {
    min_port: u16,
    max_port: u16,
    max_attempts: u32,
    host: String,
    reserved: Mutex<HashSet<u16>>,
}

impl RandomPortAllocator {
    pub fn new() -> Self {
        Self {
            min_port: 49152,
            max_port: 65535,
            max_attempts: 128,
            host: "127.0.0.1".to_string(),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    #[cfg(test)]
    fn with_range(min_port: u16, max_port: u16) -> Self {
        Self {
            min_port,
            max_port,
            ..Self::new()
        }
    }

    /// Returns a previously handed-out port to the pool.
    ///
    /// Callers are not required to release; unreleased ports simply stay
    /// reserved for the process lifetime.
    pub fn release(&self, port: u16) {
        if let Ok(mut reserved) = self.reserved.lock() {
            reserved.remove(&port);
        }
    }

    fn find_available(&self, reserved: &HashSet<u16>) -> Result<u16, PortAllocError> {
        let range = u32::from(self.max_port - self.min_port) + 1;
        let mut attempted = HashSet::new();
        let mut rng = rand::thread_rng();

        for _ in 0..self.max_attempts {
            let candidate = self.min_port + rng.gen_range(0..range) as u16;
            if !attempted.insert(candidate) || reserved.contains(&candidate) {
                continue;
            }
            if TcpListener::bind((self.host.as_str(), candidate)).is_ok() {
                return Ok(candidate);
            }
        }

        Err(PortAllocError::new("unable to allocate a free host port"))
    }
}

impl Default for RandomPortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator for RandomPortAllocator {
    fn allocate(&self, requests: &[PortRequest]) -> Result<Vec<PortBinding>, PortAllocError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut reserved = self
            .reserved
            .lock()
            .map_err(|_| PortAllocError::new("port reservation set poisoned"))?;

        let mut bindings = Vec::with_capacity(requests.len());
        for request in requests {
            let host = self.find_available(&reserved)?;
            reserved.insert(host);
            debug!(service = %request.service, container = request.container, host, "allocated host port");
            bindings.push(PortBinding {
                service: request.service.clone(),
                protocol: request.protocol.clone(),
                container: request.container,
                host,
            });
        }
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_one_binding_per_request() {
        let allocator = RandomPortAllocator::new();
        let requests = vec![PortRequest::tcp("web", 3000), PortRequest::tcp("api", 8080)];
        let bindings = allocator.allocate(&requests).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].service, "web");
        assert_eq!(bindings[0].container, 3000);
        assert!(bindings[0].host >= 49152);
    }

    #[test]
    fn test_reservation_prevents_duplicate_ports_across_calls() {
        let allocator = RandomPortAllocator::new();
        let first = allocator.allocate(&[PortRequest::tcp("a", 3000)]).unwrap();
        let second = allocator.allocate(&[PortRequest::tcp("b", 3001)]).unwrap();
        assert_ne!(first[0].host, second[0].host);
    }

    #[test]
    fn test_empty_request_set_yields_no_bindings() {
        let allocator = RandomPortAllocator::new();
        assert!(allocator.allocate(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_exhaustion_reports_error() {
        // A single-port range that is already reserved cannot satisfy a
        // second request.
        let allocator = RandomPortAllocator::with_range(51234, 51234);
        let first = allocator.allocate(&[PortRequest::tcp("a", 3000)]);
        if first.is_ok() {
            let err = allocator.allocate(&[PortRequest::tcp("b", 3001)]).unwrap_err();
            assert!(err.message.contains("unable to allocate"));
        }
    }

    #[test]
    fn test_release_returns_port_to_pool() {
        let allocator = RandomPortAllocator::with_range(51240, 51240);
        if let Ok(bindings) = allocator.allocate(&[PortRequest::tcp("a", 3000)]) {
            allocator.release(bindings[0].host);
            let again = allocator.allocate(&[PortRequest::tcp("b", 3001)]).unwrap();
            assert_eq!(again[0].host, bindings[0].host);
        }
    }
}
