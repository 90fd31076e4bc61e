//! Cross-source merge with threshold-driven /24 aggregation.

use ipnet::Ipv4Net;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use crate::normalizer::containing_24;
use crate::source::{CidrMode, Source, SourceId};

/// One network in a compiled list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkEntry {
    /// Always a /24 or a /32
    pub net: Ipv4Net,
    pub sources: BTreeSet<SourceId>,
    pub comment: String,
}

impl NetworkEntry {
    pub fn is_host(&self) -> bool {
        self.net.prefix_len() == 32
    }
}

/// One source's normalized entries, ready for the global pass.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub source_id: SourceId,
    pub mode: CidrMode,
    pub label: Option<String>,
    pub nets: BTreeSet<Ipv4Net>,
}

impl Contribution {
    pub fn new(source: &Source, nets: BTreeSet<Ipv4Net>) -> Self {
        Self {
            source_id: source.id,
            mode: source.cidr_mode,
            label: source.label().map(str::to_string),
            nets,
        }
    }
}

/// Merge contributions into a deduplicated, address-ordered entry list.
///
/// `contributions` must be in configured source order: it decides which
/// source's label wins when several sources report the same network.
/// `auto` hosts sharing a /24 collapse into that /24 once at least
/// `threshold` distinct addresses are present. A /24 swallows every /32 it
/// covers, whichever mode produced either of them.
pub fn aggregate(
    contributions: &[Contribution],
    threshold: usize,
    default_comment: &str,
) -> Vec<NetworkEntry> {
    // network -> indices into `contributions`
    let mut merged: BTreeMap<Ipv4Net, BTreeSet<usize>> = BTreeMap::new();
    // /24 -> member host -> indices
    let mut groups: BTreeMap<Ipv4Net, BTreeMap<Ipv4Addr, BTreeSet<usize>>> = BTreeMap::new();

    for (idx, contribution) in contributions.iter().enumerate() {
        match contribution.mode {
            CidrMode::Host | CidrMode::Subnet24 => {
                for net in &contribution.nets {
                    merged.entry(*net).or_default().insert(idx);
                }
            }
            CidrMode::AutoAggregate => {
                for net in &contribution.nets {
                    let addr = net.network();
                    groups
                        .entry(containing_24(addr))
                        .or_default()
                        .entry(addr)
                        .or_default()
                        .insert(idx);
                }
            }
        }
    }

    for (subnet, members) in groups {
        if members.len() >= threshold {
            let slot = merged.entry(subnet).or_default();
            for contributors in members.into_values() {
                slot.extend(contributors);
            }
        } else {
            for (addr, contributors) in members {
                merged
                    .entry(Ipv4Net::from(addr))
                    .or_default()
                    .extend(contributors);
            }
        }
    }

    // Broader entries dominate: fold covered hosts into their /24
    let covered: Vec<Ipv4Net> = merged
        .keys()
        .filter(|net| net.prefix_len() == 32)
        .filter(|net| {
            let block = containing_24(net.network());
            block != **net && merged.contains_key(&block)
        })
        .copied()
        .collect();
    for host in covered {
        if let Some(contributors) = merged.remove(&host) {
            merged
                .entry(containing_24(host.network()))
                .or_default()
                .extend(contributors);
        }
    }

    merged
        .into_iter()
        .map(|(net, contributors)| NetworkEntry {
            net,
            comment: resolve_comment(contributions, &contributors, default_comment),
            sources: contributors
                .iter()
                .map(|&idx| contributions[idx].source_id)
                .collect(),
        })
        .collect()
}

/// Label of the earliest contributor (configured order, then id) that has one.
fn resolve_comment(
    contributions: &[Contribution],
    contributors: &BTreeSet<usize>,
    default_comment: &str,
) -> String {
    contributors
        .iter()
        .map(|&idx| (idx, &contributions[idx]))
        .min_by_key(|(idx, c)| (c.label.is_none(), *idx, c.source_id))
        .and_then(|(_, c)| c.label.clone())
        .unwrap_or_else(|| default_comment.to_string())
}

/// Total number of addresses covered by a list of entries.
pub fn count_ips(entries: &[NetworkEntry]) -> u64 {
    entries
        .iter()
        .map(|e| 1u64 << (32 - u32::from(e.net.prefix_len())))
        .fold(0u64, |acc, count| acc.saturating_add(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn contribution(id: SourceId, mode: CidrMode, label: &str, nets: &[&str]) -> Contribution {
        Contribution {
            source_id: id,
            mode,
            label: (!label.is_empty()).then(|| label.to_string()),
            nets: nets.iter().map(|s| net(s)).collect(),
        }
    }

    fn hosts_in(prefix: &str, count: u8) -> Vec<String> {
        (1..=count).map(|i| format!("{}.{}/32", prefix, i)).collect()
    }

    fn auto_source(id: SourceId, hosts: &[String]) -> Contribution {
        let refs: Vec<&str> = hosts.iter().map(String::as_str).collect();
        contribution(id, CidrMode::AutoAggregate, "auto", &refs)
    }

    #[test]
    fn test_below_threshold_stays_hosts() {
        let hosts = hosts_in("5.6.7", 49);
        let result = aggregate(&[auto_source(1, &hosts)], 50, "default");
        assert_eq!(result.len(), 49);
        assert!(result.iter().all(NetworkEntry::is_host));
    }

    #[test]
    fn test_threshold_reached_collapses() {
        let hosts = hosts_in("5.6.7", 50);
        let result = aggregate(&[auto_source(1, &hosts)], 50, "default");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].net, net("5.6.7.0/24"));
        assert_eq!(result[0].comment, "auto");
    }

    #[test]
    fn test_threshold_counts_distinct_across_sources() {
        let first = hosts_in("5.6.7", 30);
        let second: Vec<String> = (21..=50).map(|i| format!("5.6.7.{}/32", i)).collect();
        let result = aggregate(&[auto_source(1, &first), auto_source(2, &second)], 50, "d");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].sources, BTreeSet::from([1, 2]));

        // 40 distinct addresses only: no aggregation
        let second: Vec<String> = (11..=40).map(|i| format!("5.6.7.{}/32", i)).collect();
        let result = aggregate(&[auto_source(1, &first), auto_source(2, &second)], 50, "d");
        assert_eq!(result.len(), 40);
    }

    #[test]
    fn test_subnet_dominates_host() {
        let a = contribution(1, CidrMode::Subnet24, "A", &["1.1.1.0/24"]);
        let b = contribution(2, CidrMode::Host, "B", &["1.1.1.5/32", "2.2.2.2/32"]);
        let result = aggregate(&[a, b], 50, "d");
        let nets: Vec<Ipv4Net> = result.iter().map(|e| e.net).collect();
        assert_eq!(nets, vec![net("1.1.1.0/24"), net("2.2.2.2/32")]);
        assert_eq!(result[0].sources, BTreeSet::from([1, 2]));
        assert_eq!(result[0].comment, "A");
    }

    #[test]
    fn test_aggregated_subnet_dominates_host_mode_entries() {
        let hosts = hosts_in("7.7.7", 60);
        let pinned = contribution(1, CidrMode::Host, "pinned", &["7.7.7.200/32"]);
        let result = aggregate(&[pinned, auto_source(2, &hosts)], 50, "d");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].net, net("7.7.7.0/24"));
        // source 1 comes first in configured order
        assert_eq!(result[0].comment, "pinned");
    }

    #[test]
    fn test_host_mode_not_aggregated() {
        let hosts = hosts_in("8.8.8", 60);
        let refs: Vec<&str> = hosts.iter().map(String::as_str).collect();
        let c = contribution(1, CidrMode::Host, "h", &refs);
        assert_eq!(aggregate(&[c], 50, "d").len(), 60);
    }

    #[test]
    fn test_comment_first_source_in_configured_order() {
        let later_id_first = contribution(9, CidrMode::Host, "nine", &["3.3.3.3/32"]);
        let earlier_id_second = contribution(2, CidrMode::Host, "two", &["3.3.3.3/32"]);
        let result = aggregate(&[later_id_first, earlier_id_second], 50, "d");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].comment, "nine");
        assert_eq!(result[0].sources, BTreeSet::from([2, 9]));
    }

    #[test]
    fn test_comment_falls_back_to_default() {
        let unlabeled = contribution(1, CidrMode::Host, "", &["4.4.4.4/32"]);
        let result = aggregate(&[unlabeled], 50, "compiled-blocklist");
        assert_eq!(result[0].comment, "compiled-blocklist");

        let unlabeled = contribution(1, CidrMode::Host, "", &["4.4.4.4/32"]);
        let labeled = contribution(2, CidrMode::Host, "second", &["4.4.4.4/32"]);
        let result = aggregate(&[unlabeled, labeled], 50, "compiled-blocklist");
        assert_eq!(result[0].comment, "second");
    }

    #[test]
    fn test_output_sorted_by_address() {
        let c = contribution(
            1,
            CidrMode::Host,
            "x",
            &["10.0.0.1/32", "9.255.255.255/32", "10.0.0.0/32", "1.0.0.0/32"],
        );
        let s = contribution(2, CidrMode::Subnet24, "y", &["5.5.5.0/24"]);
        let result = aggregate(&[c, s], 50, "d");
        let nets: Vec<String> = result.iter().map(|e| e.net.to_string()).collect();
        assert_eq!(
            nets,
            vec!["1.0.0.0/32", "5.5.5.0/24", "9.255.255.255/32", "10.0.0.0/32", "10.0.0.1/32"]
        );
    }

    #[test]
    fn test_order_independent_of_contribution_arrival() {
        let a = auto_source(1, &hosts_in("6.6.6", 10));
        let b = contribution(2, CidrMode::Subnet24, "b", &["6.6.7.0/24"]);
        let forward = aggregate(&[a.clone(), b.clone()], 5, "d");
        let backward = aggregate(&[b, a], 5, "d");
        let f: Vec<Ipv4Net> = forward.iter().map(|e| e.net).collect();
        let r: Vec<Ipv4Net> = backward.iter().map(|e| e.net).collect();
        assert_eq!(f, r);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate(&[], 50, "d").is_empty());
    }

    #[test]
    fn test_count_ips() {
        let entries = aggregate(
            &[
                contribution(1, CidrMode::Subnet24, "a", &["1.1.1.0/24"]),
                contribution(2, CidrMode::Host, "b", &["2.2.2.2/32"]),
            ],
            50,
            "d",
        );
        assert_eq!(count_ips(&entries), 257);
    }
}
