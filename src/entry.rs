//! RIPv2 entry parsing and serialization based on RFC 2453 / RFC 4822
//!
//! Every RIPv2 entry is exactly 20 bytes. The first two bytes carry the
//! address family; the reserved value `0xFFFF` marks an authentication
//! entry whose layout depends on the authentication type that follows it:
//! - `Entry::Route`: AFI(2) Tag(2) Network(4) Mask(4) NextHop(4) Metric(4)
//! - `Entry::Plain`: 0xFFFF(2) Type=2(2) Password(16)
//! - `Entry::Md5`: 0xFFFF(2) Type=3(2) PacketLen(2) KeyId(1) AuthLen(1) Seqno(4) Reserved(8)
//! - `Entry::Digest`: 0xFFFF(2) Type=1(2) Digest(16)
//!
//! References:
//! - <https://tools.ietf.org/html/rfc2453#section-4> (entry layout)
//! - <https://tools.ietf.org/html/rfc4822#section-2> (keyed MD5)

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::{Cursor, Read};
use std::net::Ipv4Addr;

use crate::error::FormatError;

/// Size of every entry on the wire.
pub const ENTRY_SIZE: usize = 20;

/// Address family of an authentication entry.
pub const AFI_AUTH: u16 = 0xffff;
/// Address family of an IPv4 route entry.
pub const AFI_INET: u16 = 2;
/// Address family of a "give me your full table" request entry.
pub const AFI_UNSPEC: u16 = 0;

pub const AUTH_NONE: u16 = 0;
/// Trailing entry that carries the MD5 digest.
pub const AUTH_TRAILER: u16 = 1;
pub const AUTH_PLAIN: u16 = 2;
pub const AUTH_MD5: u16 = 3;

/// Length of a password or digest field.
pub const KEY_SIZE: usize = 16;

/// Metric meaning "unreachable".
pub const INFINITY: u32 = 16;

/// One IPv4 route entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub afi: u16,
    pub tag: u16,
    pub network: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub metric: u32,
}

impl RouteEntry {
    /// An IPv4 route entry with a zero tag and no explicit next hop.
    pub fn new(network: Ipv4Addr, mask: Ipv4Addr, metric: u32) -> Self {
        RouteEntry {
            afi: AFI_INET,
            tag: 0,
            network,
            mask,
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric,
        }
    }

    /// The single entry of a whole-table request.
    pub fn give_all() -> Self {
        RouteEntry {
            afi: AFI_UNSPEC,
            tag: 0,
            network: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric: INFINITY,
        }
    }

    pub fn is_give_all(&self) -> bool {
        self.afi == AFI_UNSPEC && self.metric == INFINITY
    }
}

/// Any 20-byte entry found in a RIPv2 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Route(RouteEntry),
    /// Simple password authentication, zero padded.
    Plain { key: [u8; KEY_SIZE] },
    /// Keyed-MD5 metadata placed at the start of the packet.
    Md5 {
        packet_len: u16,
        key_id: u8,
        auth_len: u8,
        seqno: u32,
    },
    /// Keyed-MD5 digest placed at the end of the packet.
    Digest { digest: [u8; KEY_SIZE] },
}

impl Entry {
    /// Parse the entry at the cursor position, advancing the cursor.
    pub fn parse(cur: &mut Cursor<&[u8]>) -> Result<Entry, FormatError> {
        let start = cur.position() as usize;
        let total = cur.get_ref().len();
        if start + ENTRY_SIZE > total {
            return Err(FormatError::Misaligned(total - start));
        }
        let short = |_| FormatError::Misaligned(total - start);

        let afi = cur.read_u16::<BigEndian>().map_err(short)?;
        if afi != AFI_AUTH {
            let tag = cur.read_u16::<BigEndian>().map_err(short)?;
            let network = Ipv4Addr::from(cur.read_u32::<BigEndian>().map_err(short)?);
            let mask = Ipv4Addr::from(cur.read_u32::<BigEndian>().map_err(short)?);
            let next_hop = Ipv4Addr::from(cur.read_u32::<BigEndian>().map_err(short)?);
            let metric = cur.read_u32::<BigEndian>().map_err(short)?;
            return Ok(Entry::Route(RouteEntry {
                afi,
                tag,
                network,
                mask,
                next_hop,
                metric,
            }));
        }

        let auth_type = cur.read_u16::<BigEndian>().map_err(short)?;
        let entry = match auth_type {
            AUTH_PLAIN => {
                let mut key = [0u8; KEY_SIZE];
                cur.read_exact(&mut key).map_err(short)?;
                Entry::Plain { key }
            }
            AUTH_TRAILER => {
                let mut digest = [0u8; KEY_SIZE];
                cur.read_exact(&mut digest).map_err(short)?;
                Entry::Digest { digest }
            }
            AUTH_MD5 => {
                let packet_len = cur.read_u16::<BigEndian>().map_err(short)?;
                let key_id = cur.read_u8().map_err(short)?;
                let auth_len = cur.read_u8().map_err(short)?;
                let seqno = cur.read_u32::<BigEndian>().map_err(short)?;
                // reserved
                cur.read_u64::<BigEndian>().map_err(short)?;
                Entry::Md5 {
                    packet_len,
                    key_id,
                    auth_len,
                    seqno,
                }
            }
            other => {
                cur.set_position((start + ENTRY_SIZE) as u64);
                return Err(FormatError::UnknownAuthType(other));
            }
        };
        Ok(entry)
    }

    /// Encode this entry into its 20-byte wire form.
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        match self {
            Entry::Route(r) => {
                BigEndian::write_u16(&mut buf[0..2], r.afi);
                BigEndian::write_u16(&mut buf[2..4], r.tag);
                buf[4..8].copy_from_slice(&r.network.octets());
                buf[8..12].copy_from_slice(&r.mask.octets());
                buf[12..16].copy_from_slice(&r.next_hop.octets());
                BigEndian::write_u32(&mut buf[16..20], r.metric);
            }
            Entry::Plain { key } => {
                BigEndian::write_u16(&mut buf[0..2], AFI_AUTH);
                BigEndian::write_u16(&mut buf[2..4], AUTH_PLAIN);
                buf[4..20].copy_from_slice(key);
            }
            Entry::Md5 {
                packet_len,
                key_id,
                auth_len,
                seqno,
            } => {
                BigEndian::write_u16(&mut buf[0..2], AFI_AUTH);
                BigEndian::write_u16(&mut buf[2..4], AUTH_MD5);
                BigEndian::write_u16(&mut buf[4..6], *packet_len);
                buf[6] = *key_id;
                buf[7] = *auth_len;
                BigEndian::write_u32(&mut buf[8..12], *seqno);
            }
            Entry::Digest { digest } => {
                BigEndian::write_u16(&mut buf[0..2], AFI_AUTH);
                BigEndian::write_u16(&mut buf[2..4], AUTH_TRAILER);
                buf[4..20].copy_from_slice(digest);
            }
        }
        buf
    }

    /// Authentication type carried by this entry, if it is an auth entry.
    pub fn auth_type(&self) -> Option<u16> {
        match self {
            Entry::Route(_) => None,
            Entry::Plain { .. } => Some(AUTH_PLAIN),
            Entry::Md5 { .. } => Some(AUTH_MD5),
            Entry::Digest { .. } => Some(AUTH_TRAILER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_entry_to_bytes() {
        let e = Entry::Route(RouteEntry {
            afi: AFI_INET,
            tag: 7,
            network: Ipv4Addr::new(10, 0, 0, 0),
            mask: Ipv4Addr::new(255, 255, 255, 0),
            next_hop: Ipv4Addr::new(10, 0, 0, 2),
            metric: 1,
        });
        assert_eq!(
            e.to_bytes().to_vec(),
            vec![0, 2, 0, 7, 10, 0, 0, 0, 255, 255, 255, 0, 10, 0, 0, 2, 0, 0, 0, 1]
        );
    }

    #[test]
    fn route_entry_parse() {
        let bytes = [0, 2, 0, 0, 192, 168, 1, 0, 255, 255, 255, 0, 0, 0, 0, 0, 0, 0, 0, 3];
        let mut cur = Cursor::new(&bytes[..]);
        let parsed = Entry::parse(&mut cur).unwrap();
        assert_eq!(
            parsed,
            Entry::Route(RouteEntry::new(
                Ipv4Addr::new(192, 168, 1, 0),
                Ipv4Addr::new(255, 255, 255, 0),
                3
            ))
        );
        assert_eq!(cur.position(), 20);
    }

    #[test]
    fn plain_entry_layout() {
        let mut key = [0u8; KEY_SIZE];
        key[..4].copy_from_slice(b"pass");
        let bytes = Entry::Plain { key }.to_bytes();
        assert_eq!(&bytes[..4], &[0xff, 0xff, 0, 2]);
        assert_eq!(&bytes[4..8], b"pass");
        assert!(bytes[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn md5_metadata_layout() {
        let e = Entry::Md5 {
            packet_len: 44,
            key_id: 1,
            auth_len: 20,
            seqno: 0x01020304,
        };
        let bytes = e.to_bytes();
        assert_eq!(
            bytes.to_vec(),
            vec![0xff, 0xff, 0, 3, 0, 44, 1, 20, 1, 2, 3, 4, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        let mut cur = Cursor::new(&bytes[..]);
        assert_eq!(Entry::parse(&mut cur).unwrap(), e);
    }

    #[test]
    fn digest_entry_parse() {
        let mut bytes = vec![0xff, 0xff, 0, 1];
        bytes.extend(1..=16u8);
        let mut cur = Cursor::new(bytes.as_slice());
        match Entry::parse(&mut cur).unwrap() {
            Entry::Digest { digest } => assert_eq!(digest[15], 16),
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn unknown_auth_type_is_rejected() {
        let mut bytes = vec![0xff, 0xff, 0, 9];
        bytes.extend([0u8; 16]);
        let mut cur = Cursor::new(bytes.as_slice());
        assert_eq!(
            Entry::parse(&mut cur),
            Err(FormatError::UnknownAuthType(9))
        );
    }

    #[test]
    fn short_entry_is_misaligned() {
        let bytes = [0u8, 2, 0, 0, 10];
        let mut cur = Cursor::new(&bytes[..]);
        assert_eq!(Entry::parse(&mut cur), Err(FormatError::Misaligned(5)));
    }

    #[test]
    fn give_all_sentinel() {
        assert!(RouteEntry::give_all().is_give_all());
        assert!(!RouteEntry::new(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, 16).is_give_all());
    }
}
