//! Tolerant extraction of IPv4 addresses and CIDRs from raw feed bodies.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// A candidate token cut out of a feed body, not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEntry<'a>(&'a str);

impl<'a> RawEntry<'a> {
    pub fn as_str(&self) -> &'a str {
        self.0
    }

    /// Validate the token as `a.b.c.d` or `a.b.c.d/len`.
    pub fn to_net(&self) -> Option<Ipv4Net> {
        parse_ipv4_net(self.0)
    }
}

/// Split a feed body into candidate tokens.
///
/// Lines are split on `delimiter` (already unescaped); inline `#` comments and
/// surrounding whitespace are removed and blank tokens skipped.
pub fn tokens<'a>(raw: &'a str, delimiter: &'a str) -> impl Iterator<Item = RawEntry<'a>> + 'a {
    raw.lines().flat_map(move |line| {
        let pieces: Box<dyn Iterator<Item = &'a str> + 'a> =
            if delimiter.is_empty() || delimiter == "\n" || delimiter == "\r\n" {
                Box::new(std::iter::once(line))
            } else {
                Box::new(line.split(delimiter))
            };
        pieces.filter_map(|piece| {
            let token = match piece.find('#') {
                Some(pos) => &piece[..pos],
                None => piece,
            }
            .trim();
            (!token.is_empty()).then_some(RawEntry(token))
        })
    })
}

/// Extract every syntactically valid IPv4 address/CIDR from a feed body.
///
/// Lazy and infallible: malformed content is expected and silently dropped.
pub fn parse<'a>(raw: &'a str, delimiter: &'a str) -> impl Iterator<Item = Ipv4Net> + 'a {
    tokens(raw, delimiter).filter_map(|t| t.to_net())
}

/// Strict IPv4 parsing: dotted quad, optional `/0`..`/32` prefix of plain digits.
pub fn parse_ipv4_net(token: &str) -> Option<Ipv4Net> {
    let (addr, prefix) = match token.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (token, None),
    };

    // Ipv4Addr::from_str already rejects leading zeros, signs and short forms
    let addr: Ipv4Addr = addr.parse().ok()?;

    let prefix_len = match prefix {
        None => 32,
        Some(p) => {
            if p.is_empty() || p.len() > 2 || !p.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let len: u8 = p.parse().ok()?;
            if len > 32 {
                return None;
            }
            len
        }
    };

    Ipv4Net::new(addr, prefix_len).ok()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn ipv4_net_strategy() -> impl Strategy<Value = Ipv4Net> {
        (any::<u32>(), 0u8..=32).prop_map(|(a, len)| Ipv4Net::new(Ipv4Addr::from(a), len).unwrap())
    }

    fn noise_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("# comment".to_string()),
            Just(String::new()),
            Just("not-an-ip".to_string()),
            Just("300.1.1.1".to_string()),
            Just("1.2.3.4/40".to_string()),
            "[a-z]{1,12}",
        ]
    }

    proptest! {
        /// Parsing yields exactly the valid entries, whatever the noise around them
        #[test]
        fn prop_parse_exactly_valid(
            valid in prop::collection::vec(ipv4_net_strategy(), 0..50),
            noise in prop::collection::vec(noise_strategy(), 0..50)
        ) {
            let mut lines: Vec<String> = valid.iter().map(|n| n.to_string()).collect();
            lines.extend(noise);
            lines.sort();
            let content = lines.join("\n");

            let got: HashSet<Ipv4Net> = parse(&content, "\n").collect();
            let want: HashSet<Ipv4Net> = valid.into_iter().collect();
            prop_assert_eq!(got, want);
        }

        /// Parsing never panics on arbitrary input
        #[test]
        fn prop_parse_arbitrary_no_panic(content in ".{0,400}", delim in "[;,| ]{0,2}") {
            let _ = parse(&content, &delim).count();
        }
    }
}
