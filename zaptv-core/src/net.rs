//! Local TCP port allocation for the embedded servers.
//!
//! Both the media proxy and the HLS segment server want a stable, preferred
//! port but must keep working when another process (or another Zaptv
//! instance) already holds it.

use std::net::Ipv4Addr;

use tokio::net::TcpListener;

/// Finds a free TCP port on the loopback interface, probing upward from
/// `preferred`.
///
/// The successful probe listener is dropped before returning, so this is a
/// probe rather than a reservation: a race between the probe and the caller's
/// real bind is possible but self-healing, because callers retry allocation
/// when their own bind fails.
///
/// # Errors
///
/// - `std::io::Error` - A bind failed for a reason other than the address
///   being in use (e.g. permission denied), or the port space was exhausted
pub async fn allocate_port(preferred: u16) -> std::io::Result<u16> {
    let mut candidate = preferred;
    loop {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, candidate)).await {
            Ok(listener) => {
                let port = listener.local_addr()?.port();
                drop(listener);
                return Ok(port);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                candidate = candidate.checked_add(1).ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        "no free port above preferred",
                    )
                })?;
            }
            Err(e) => return Err(e),
        }
    }
}
