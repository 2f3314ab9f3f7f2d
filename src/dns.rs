//! Reverse DNS for key lookups that identify the host by address.

use std::io;
use std::net::IpAddr;

use async_trait::async_trait;

#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Host names for an address, most specific first
    async fn reverse(&self, ip: IpAddr) -> io::Result<Vec<String>>;
}

/// Uses the operating system resolver
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn reverse(&self, ip: IpAddr) -> io::Result<Vec<String>> {
        let name = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip))
            .await
            .map_err(io::Error::other)??;
        // getnameinfo echoes the address back when there is no PTR record
        if name.parse::<IpAddr>().is_ok() {
            return Ok(Vec::new());
        }
        Ok(vec![name])
    }
}
