use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolves `host` with the system resolver on the blocking pool.
pub async fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let lookup_host = host.to_string();

    debug!("Resolving DNS for: {}", host);

    let addrs_iter =
        tokio::task::spawn_blocking(move || (lookup_host.as_str(), port).to_socket_addrs())
            .await
            .map_err(io::Error::other)??;

    let addresses: Vec<SocketAddr> = addrs_iter.collect();

    if addresses.is_empty() {
        error!("DNS resolution for {} returned no addresses.", host);
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("No IP addresses found for host {}", host),
        ));
    }

    for (i, addr) in addresses.iter().enumerate() {
        if i == 0 {
            debug!("Resolved IP: {}", addr.ip());
        } else {
            trace!("Resolved IP (alternative): {}", addr.ip());
        }
    }

    Ok(addresses)
}
