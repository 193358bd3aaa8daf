/* src/rfc2317.rs */

//! RFC 2317 classless reverse delegation.
//!
//! A prefix that does not end on an octet (IPv4) or nibble (IPv6) boundary
//! cannot be delegated with a plain reverse zone. Instead the parent reverse
//! zone carries one CNAME per address in the unit-aligned block, pointing into
//! a child zone named `{start}/{bits}.{parent}`.

use crate::records::{Record, RecordType};
use ipnetwork::IpNetwork;

const NIBBLE_HEX: &[u8; 16] = b"0123456789abcdef";

/// Everything the parent reverse zone needs to delegate one classless prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rfc2317Stub {
    /// Unit-aligned reverse zone holding the CNAMEs, e.g. `192.160.240.in-addr.arpa`.
    pub parent_zone: String,
    /// Label of the classless child zone relative to `parent_zone`, e.g. `128/28`.
    pub delegation: String,
    pub cnames: Vec<Record>,
}

/// CNAME set for `prefix`, in ascending address order. Empty when the prefix
/// length is unit-aligned.
pub fn rfc2317_cnames(prefix: IpNetwork, ttl: Option<u32>) -> Vec<Record> {
    rfc2317_stub(prefix, ttl)
        .map(|stub| stub.cnames)
        .unwrap_or_default()
}

pub fn rfc2317_stub(prefix: IpNetwork, ttl: Option<u32>) -> Option<Rfc2317Stub> {
    let bits = usize::from(prefix.prefix());
    match prefix {
        IpNetwork::V4(net) => build(&net.network().octets(), bits, 8, "in-addr.arpa", ttl),
        IpNetwork::V6(net) => build(&net.network().octets(), bits, 4, "ip6.arpa", ttl),
    }
}

fn build(
    addr: &[u8],
    bits: usize,
    tet: usize,
    suffix: &str,
    ttl: Option<u32>,
) -> Option<Rfc2317Stub> {
    let steps = bits % tet;
    if steps == 0 {
        return None;
    }

    let aligned = bits / tet;
    let parent_zone = (0..aligned).fold(suffix.to_string(), |base, i| {
        format!("{}.{}", unit_label(tet, unit(addr, tet, i)), base)
    });
    let start = unit(addr, tet, aligned);
    let delegation = format!("{}/{}", unit_label(tet, start), bits);

    let count = 1u16 << (tet - steps);
    let cnames = (0..count)
        .map(|i| {
            // The masked start plus the block size never passes the unit maximum.
            let digit = unit_label(tet, start + i as u8);
            Record {
                name: format!("{}.{}", digit, parent_zone),
                ttl,
                record_type: RecordType::Cname,
                value: format!("{}.{}.{}", digit, delegation, parent_zone),
            }
        })
        .collect();

    Some(Rfc2317Stub {
        parent_zone,
        delegation,
        cnames,
    })
}

/// Value of the `n`th octet (tet 8) or nibble (tet 4) of `addr`.
fn unit(addr: &[u8], tet: usize, n: usize) -> u8 {
    if tet == 8 {
        return addr[n];
    }
    let octet = addr[n / 2];
    if n % 2 == 0 { octet >> 4 } else { octet & 0x0f }
}

fn unit_label(tet: usize, value: u8) -> String {
    if tet == 8 {
        value.to_string()
    } else {
        char::from(NIBBLE_HEX[usize::from(value)]).to_string()
    }
}
