use std::net::{SocketAddr, TcpListener};

/// A loopback address nothing is listening on right now.
pub fn available_addr() -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}
