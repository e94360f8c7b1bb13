//! A hand-rolled walker over an IPv6 header chain.
//!
//! `pnet` has no notion of IPv6 extension headers: `Ipv6Packet` exposes only
//! the 40-byte base header and treats everything after it as opaque
//! payload. The fragmentation and extension-header-shuffle operators both
//! need to parse, reorder, and rebuild that chain, so this module owns that
//! responsibility once instead of duplicating it per operator (the source
//! this spec was distilled from has two near-duplicate hand-rolled
//! fragmentation implementations; this is the single one this crate keeps,
//! per the header-aware Open Question decision in DESIGN.md).

use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::Packet as PnetPacket;

use crate::errors::PacketError;

pub const BASE_HEADER_LEN: usize = 40;

pub const HOP_BY_HOP: u8 = 0;
pub const ROUTING: u8 = 43;
pub const FRAGMENT: u8 = 44;
pub const ESP: u8 = 50;
pub const AH: u8 = 51;
pub const DEST_OPTS: u8 = 60;
pub const MOBILITY: u8 = 135;
pub const NO_NEXT_HEADER: u8 = 59;

/// Extension header kinds this walker can parse and reorder. `Esp` is
/// recognized for classification (it participates in shuffles as an opaque
/// blob) but its contents are never interpreted: ESP carries its own
/// next-header in an encrypted trailer, not a cleartext field, so nothing
/// past it can be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtHeaderKind {
    HopByHop,
    Routing,
    Fragment,
    Ah,
    DestOpts,
    Mobility,
    Esp,
}

impl ExtHeaderKind {
    fn from_next_header(nh: u8) -> Option<ExtHeaderKind> {
        match nh {
            HOP_BY_HOP => Some(ExtHeaderKind::HopByHop),
            ROUTING => Some(ExtHeaderKind::Routing),
            FRAGMENT => Some(ExtHeaderKind::Fragment),
            AH => Some(ExtHeaderKind::Ah),
            DEST_OPTS => Some(ExtHeaderKind::DestOpts),
            MOBILITY => Some(ExtHeaderKind::Mobility),
            ESP => Some(ExtHeaderKind::Esp),
            _ => None,
        }
    }

    /// Whether this header belongs to the RFC 8200 "Per-Fragment Headers"
    /// prefix (repeated verbatim in every fragment).
    fn is_per_fragment(self) -> bool {
        matches!(self, ExtHeaderKind::HopByHop | ExtHeaderKind::Routing)
    }
}

/// One extension header node: its own next-header byte (mutated as the
/// chain is reordered) plus its full wire bytes (including that byte).
#[derive(Debug, Clone)]
pub struct ExtHeaderNode {
    pub kind: ExtHeaderKind,
    bytes: Vec<u8>,
}

impl ExtHeaderNode {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn set_next_header(&mut self, nh: u8) {
        self.bytes[0] = nh;
    }

    pub fn next_header(&self) -> u8 {
        self.bytes[0]
    }

    pub fn identification(&self) -> u32 {
        u32::from_be_bytes([self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7]])
    }
}

/// A parsed IPv6 packet: the 40-byte base header, the contiguous run of
/// extension headers right after it, and the opaque upper-layer bytes.
pub struct Ipv6Chain {
    base: Vec<u8>,
    pub nodes: Vec<ExtHeaderNode>,
    after: Vec<u8>,
    /// The protocol number of the payload in `after`. Tracked separately
    /// from any node's next-header byte because those bytes get rewritten
    /// by every `relink()`; this is the one stable identity of "what comes
    /// after the chain", independent of node order.
    upper_protocol: u8,
}

impl Ipv6Chain {
    /// Parses `bytes` into base header / extension-header chain / payload.
    pub fn parse(bytes: &[u8]) -> Result<Ipv6Chain, PacketError> {
        let ipv6 =
            Ipv6Packet::new(bytes).ok_or_else(|| PacketError::Malformed("truncated IPv6 header".into()))?;
        let base = bytes[..BASE_HEADER_LEN].to_vec();
        let mut offset = BASE_HEADER_LEN;
        let mut next_header = ipv6.get_next_header().0;
        let mut nodes = Vec::new();

        loop {
            let Some(kind) = ExtHeaderKind::from_next_header(next_header) else {
                break;
            };
            if offset + 2 > bytes.len() {
                return Err(PacketError::Malformed("truncated IPv6 extension header".into()));
            }
            let hdr_len = match kind {
                ExtHeaderKind::Fragment => 8,
                ExtHeaderKind::Ah => {
                    let payload_len = bytes[offset + 1] as usize;
                    (payload_len + 2) * 4
                }
                _ => {
                    let hdr_ext_len = bytes[offset + 1] as usize;
                    (hdr_ext_len + 1) * 8
                }
            };
            if offset + hdr_len > bytes.len() {
                return Err(PacketError::Malformed("truncated IPv6 extension header".into()));
            }
            let node_bytes = bytes[offset..offset + hdr_len].to_vec();
            next_header = node_bytes[0];
            nodes.push(ExtHeaderNode { kind, bytes: node_bytes });
            offset += hdr_len;
            // ESP's true next-header lives in an encrypted trailer; nothing
            // after it is parseable as a chain member.
            if kind == ExtHeaderKind::Esp {
                break;
            }
        }

        Ok(Ipv6Chain { base, nodes, after: bytes[offset..].to_vec(), upper_protocol: next_header })
    }

    /// Length in bytes of the "Per-Fragment Headers" prefix: the base
    /// header plus the longest leading run of Hop-By-Hop/Routing nodes.
    pub fn per_fragment_len(&self) -> usize {
        let mut len = BASE_HEADER_LEN;
        for node in &self.nodes {
            if node.kind.is_per_fragment() {
                len += node.len();
            } else {
                break;
            }
        }
        len
    }

    /// Index into `nodes` right after the Per-Fragment Headers prefix.
    fn per_fragment_node_count(&self) -> usize {
        self.nodes.iter().take_while(|n| n.kind.is_per_fragment()).count()
    }

    /// Base header plus the leading Hop-By-Hop/Routing run, verbatim bytes:
    /// the part every fragment carries unchanged.
    pub fn per_fragment_prefix_bytes(&self) -> Vec<u8> {
        let mut out = self.base.clone();
        for node in self.nodes.iter().take(self.per_fragment_node_count()) {
            out.extend_from_slice(&node.bytes);
        }
        out
    }

    /// Every node after the Per-Fragment Headers prefix, plus the
    /// upper-layer payload: the part that gets split across fragments.
    pub fn fragmentable_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for node in self.nodes.iter().skip(self.per_fragment_node_count()) {
            out.extend_from_slice(&node.bytes);
        }
        out.extend_from_slice(&self.after);
        out
    }

    /// Protocol number of the first byte of [`Self::fragmentable_bytes`]:
    /// the kind of the first non-per-fragment node, or the upper-layer
    /// protocol if there is none.
    pub fn first_fragmentable_protocol(&self) -> u8 {
        self.nodes
            .iter()
            .nth(self.per_fragment_node_count())
            .map(|n| kind_to_proto(n.kind))
            .unwrap_or(self.upper_protocol)
    }

    /// [`Self::per_fragment_prefix_bytes`] with its terminal next-header
    /// pointer rewritten to Fragment, as every fragment needs once a
    /// Fragment header is spliced in after the prefix.
    pub fn per_fragment_prefix_pointing_to_fragment(&self) -> Vec<u8> {
        let mut prefix = self.per_fragment_prefix_bytes();
        let n = self.per_fragment_node_count();
        if n == 0 {
            set_base_next_header(&mut prefix, FRAGMENT);
        } else {
            let last_node_offset = BASE_HEADER_LEN
                + self.nodes[..n - 1].iter().map(|node| node.len()).sum::<usize>();
            prefix[last_node_offset] = FRAGMENT;
        }
        prefix
    }

    /// Builds one 8-byte Fragment extension header for a fragment at
    /// `offset_units` (8-octet units), continuing (`more`) or not, sharing
    /// `identification` across every fragment of this packet.
    pub fn fragment_header_bytes(&self, identification: u32, offset_units: u16, more: bool) -> Vec<u8> {
        let mut bytes = vec![0u8; 8];
        bytes[0] = self.first_fragmentable_protocol();
        let word = (offset_units << 3) | (more as u16);
        bytes[2..4].copy_from_slice(&word.to_be_bytes());
        bytes[4..8].copy_from_slice(&identification.to_be_bytes());
        bytes
    }

    /// The protocol number of whatever follows the chain (`after()`).
    /// Stable across reordering: see the `upper_protocol` field doc.
    pub fn upper_layer_protocol(&self) -> u8 {
        self.upper_protocol
    }

    pub fn after(&self) -> &[u8] {
        &self.after
    }

    pub fn set_after(&mut self, bytes: Vec<u8>) {
        self.after = bytes;
    }

    /// Inserts a Fragment Extension Header immediately after the
    /// Per-Fragment Headers prefix, per RFC 8200. `identification` is
    /// shared by every fragment produced from this packet; `offset_units`
    /// and `more_fragments` are set per-fragment by the caller afterwards.
    pub fn insert_fragment_header(&mut self, identification: u32) {
        let insert_at = self.per_fragment_node_count();
        let mut frag = vec![0u8; 8];
        // frag[0] (next header) is a placeholder; relink() fixes every
        // pointer in the chain right after insertion.
        frag[2..4].copy_from_slice(&0u16.to_be_bytes());
        frag[4..8].copy_from_slice(&identification.to_be_bytes());
        self.nodes.insert(insert_at, ExtHeaderNode { kind: ExtHeaderKind::Fragment, bytes: frag });
        self.relink();
    }

    /// Returns the (mutable) Fragment node, if one is present.
    pub fn fragment_node_mut(&mut self) -> Option<&mut ExtHeaderNode> {
        self.nodes.iter_mut().find(|n| n.kind == ExtHeaderKind::Fragment)
    }

    pub fn fragment_node_index(&self) -> Option<usize> {
        self.nodes.iter().position(|n| n.kind == ExtHeaderKind::Fragment)
    }

    /// Re-threads every node's next-header byte (and the base header's) to
    /// match the current order of `nodes`. Must be called after reordering
    /// or inserting nodes.
    pub fn relink(&mut self) {
        let upper = self.upper_layer_protocol();
        if self.nodes.is_empty() {
            set_base_next_header(&mut self.base, upper);
            return;
        }
        for i in 0..self.nodes.len() - 1 {
            let next_kind = self.nodes[i + 1].kind;
            self.nodes[i].set_next_header(kind_to_proto(next_kind));
        }
        self.nodes.last_mut().unwrap().set_next_header(upper);
        set_base_next_header(&mut self.base, kind_to_proto(self.nodes[0].kind));
    }

    /// Serializes base header + extension-header chain + payload back into
    /// one contiguous buffer, fixing up the base header's Payload Length.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.relink();
        let mut out = self.base;
        for node in &self.nodes {
            out.extend_from_slice(&node.bytes);
        }
        out.extend_from_slice(&self.after);
        let payload_len = (out.len() - BASE_HEADER_LEN) as u16;
        out[4..6].copy_from_slice(&payload_len.to_be_bytes());
        out
    }
}

fn kind_to_proto(kind: ExtHeaderKind) -> u8 {
    match kind {
        ExtHeaderKind::HopByHop => HOP_BY_HOP,
        ExtHeaderKind::Routing => ROUTING,
        ExtHeaderKind::Fragment => FRAGMENT,
        ExtHeaderKind::Ah => AH,
        ExtHeaderKind::DestOpts => DEST_OPTS,
        ExtHeaderKind::Mobility => MOBILITY,
        ExtHeaderKind::Esp => ESP,
    }
}

fn set_base_next_header(base: &mut [u8], nh: u8) {
    base[6] = nh;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_header(next_header: u8) -> Vec<u8> {
        let mut b = vec![0u8; BASE_HEADER_LEN];
        b[0] = 0x60;
        b[6] = next_header;
        b[7] = 64; // hop limit
        b
    }

    #[test]
    fn parse_plain_tcp_has_no_nodes() {
        let mut bytes = base_header(6); // TCP
        bytes.extend_from_slice(&[0u8; 20]); // fake TCP header
        let chain = Ipv6Chain::parse(&bytes).unwrap();
        assert!(chain.nodes.is_empty());
        assert_eq!(chain.upper_layer_protocol(), 6);
        assert_eq!(chain.per_fragment_len(), BASE_HEADER_LEN);
    }

    #[test]
    fn parse_routing_then_tcp() {
        let mut bytes = base_header(ROUTING);
        // Routing header: nh=TCP(6), hdr_ext_len=0 -> 8 bytes total
        bytes.extend_from_slice(&[6, 0, 0, 0, 0, 0, 0, 0]);
        bytes.extend_from_slice(&[0u8; 20]);
        let chain = Ipv6Chain::parse(&bytes).unwrap();
        assert_eq!(chain.nodes.len(), 1);
        assert_eq!(chain.nodes[0].kind, ExtHeaderKind::Routing);
        assert_eq!(chain.upper_layer_protocol(), 6);
        assert_eq!(chain.per_fragment_len(), BASE_HEADER_LEN + 8);
    }

    #[test]
    fn insert_fragment_header_after_per_fragment_prefix() {
        let mut bytes = base_header(ROUTING);
        bytes.extend_from_slice(&[51, 0, 0, 0, 0, 0, 0, 0]); // Routing -> AH
        // AH -> TCP(6); payload-len field 2 means (2+2)*4 = 16 total bytes.
        bytes.extend_from_slice(&[6, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        bytes.extend_from_slice(b"PAYLOAD");
        let mut chain = Ipv6Chain::parse(&bytes).unwrap();
        assert_eq!(chain.nodes.len(), 2);
        chain.insert_fragment_header(0xdead_beef);
        assert_eq!(chain.nodes.len(), 3);
        assert_eq!(chain.nodes[0].kind, ExtHeaderKind::Routing);
        assert_eq!(chain.nodes[1].kind, ExtHeaderKind::Fragment);
        assert_eq!(chain.nodes[2].kind, ExtHeaderKind::Ah);
        assert_eq!(chain.nodes[0].next_header(), FRAGMENT);
        assert_eq!(chain.nodes[1].next_header(), AH);
        assert_eq!(chain.nodes[2].next_header(), 6);
    }

    #[test]
    fn roundtrip_preserves_payload() {
        let mut bytes = base_header(6);
        bytes.extend_from_slice(b"HELLOWORLD");
        let chain = Ipv6Chain::parse(&bytes).unwrap();
        let out = chain.into_bytes();
        assert_eq!(&out[BASE_HEADER_LEN..], b"HELLOWORLD");
    }
}
