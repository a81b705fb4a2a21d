// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Callback socket binding with sequential port fallback.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, warn};

use crate::error::AuthError;

const LISTEN_BACKLOG: u32 = 64;

/// Bind `host:port` with `SO_REUSEADDR`, moving to the next port while the
/// address is in use, for at most `attempts` ports in total.
///
/// Port 0 asks the OS for an ephemeral port and never falls back.
pub async fn bind_with_fallback(
    host: &str,
    port: u16,
    attempts: u16,
) -> Result<TcpListener, AuthError> {
    let ip = resolve_host(host).await?;
    let attempts = if port == 0 { 1 } else { attempts.max(1) };
    let mut tried = Vec::with_capacity(usize::from(attempts));

    for offset in 0..attempts {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        tried.push(candidate);
        match bind_one(SocketAddr::new(ip, candidate)) {
            Ok(listener) => {
                if candidate != port {
                    warn!(configured = port, bound = candidate, "callback port in use, fell back");
                }
                debug!(%ip, port = candidate, "callback listener bound");
                return Ok(listener);
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                debug!(port = candidate, "callback port in use");
            }
            Err(e) => return Err(AuthError::Bind(format!("{ip}:{candidate}: {e}"))),
        }
    }
    Err(AuthError::BindConflict { host: host.to_owned(), ports: tried })
}

fn bind_one(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Resolve the redirect host, preferring IPv4 so `localhost` lands where
/// browsers try first.
async fn resolve_host(host: &str) -> Result<IpAddr, AuthError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| AuthError::Bind(format!("resolve {host}: {e}")))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(SocketAddr::ip)
        .ok_or_else(|| AuthError::Bind(format!("{host} resolved to no addresses")))
}

#[cfg(test)]
#[path = "bind_tests.rs"]
mod tests;
