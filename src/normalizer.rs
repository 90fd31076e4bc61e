//! Per-source application of the `cidr_mode` policy.

use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::source::CidrMode;

/// Outcome of normalizing one source's entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub nets: BTreeSet<Ipv4Net>,
    /// Entries whose prefix was narrowed to a single host (`32` / `auto`)
    pub collapsed: usize,
}

/// The /24 containing `addr`.
pub fn containing_24(addr: Ipv4Addr) -> Ipv4Net {
    // prefix 24 is always valid
    Ipv4Net::new(addr, 24).map(|n| n.trunc()).unwrap_or_else(|_| host(addr))
}

/// `addr` as a /32.
pub fn host(addr: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::from(addr)
}

/// Apply `mode` to parsed entries. Every result has prefix 24 or 32.
///
/// Entries carrying a prefix are reduced to their first (network) address
/// before the mode is applied.
pub fn normalize<I>(entries: I, mode: CidrMode) -> Normalized
where
    I: IntoIterator<Item = Ipv4Net>,
{
    let mut out = Normalized::default();

    for entry in entries {
        let first = entry.network();
        match mode {
            CidrMode::Subnet24 => {
                out.nets.insert(containing_24(first));
            }
            CidrMode::Host | CidrMode::AutoAggregate => {
                if entry.prefix_len() != 32 {
                    out.collapsed += 1;
                }
                out.nets.insert(host(first));
            }
        }
    }

    out
}
