//! Host candidate gathering.
//!
//! Interface enumeration runs on the blocking pool and streams candidates
//! back as it finds them, so a gather cut short by its timeout still yields
//! whatever was found so far.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::description::Candidate;

/// Result of one gathering pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gathered {
    pub candidates: Vec<Candidate>,
    /// False when the timeout fired before enumeration finished.
    pub complete: bool,
}

/// Returns true for addresses a LAN peer can reach: IPv4, not link-local
/// (169.254.x.x), and not loopback unless `include_loopback` is set.
pub fn is_usable(ip: &IpAddr, include_loopback: bool) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_link_local() || v4.is_unspecified() {
                return false;
            }
            include_loopback || !v4.is_loopback()
        }
        IpAddr::V6(_) => false,
    }
}

/// Gathers host candidates for `port`, waiting at most `timeout`.
///
/// Loopback, when included, is listed first so same-machine peers try it
/// before any interface address.
pub async fn gather_candidates(port: u16, include_loopback: bool, timeout: Duration) -> Gathered {
    let mut candidates = Vec::new();
    if include_loopback {
        candidates.push(Candidate {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        });
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<IpAddr>();
    tokio::task::spawn_blocking(move || {
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(i) => i,
            Err(e) => {
                warn!(error = %e, "interface enumeration failed");
                return;
            }
        };
        for iface in interfaces {
            if tx.send(iface.ip()).is_err() {
                return;
            }
        }
    });

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut complete = false;
    loop {
        tokio::select! {
            ip = rx.recv() => match ip {
                Some(ip) => {
                    if !is_usable(&ip, include_loopback) {
                        continue;
                    }
                    let candidate = Candidate { ip, port };
                    if !candidates.contains(&candidate) {
                        debug!(%ip, port, "gathered candidate");
                        candidates.push(candidate);
                    }
                }
                None => {
                    complete = true;
                    break;
                }
            },
            () = &mut deadline => {
                warn!(
                    gathered = candidates.len(),
                    "candidate gathering timed out, using best-effort list"
                );
                break;
            }
        }
    }

    Gathered {
        candidates,
        complete,
    }
}
