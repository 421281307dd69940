// RIPv2 packet construction, parsing and keyed-MD5 sealing

use byteorder::ReadBytesExt;
use md5::{Digest, Md5};
use std::io::Cursor;
use std::net::Ipv4Addr;

use crate::entry::{AFI_INET, ENTRY_SIZE, Entry, INFINITY, KEY_SIZE, RouteEntry};
use crate::error::FormatError;

/// RIP port and multicast group.
pub const RIP_PORT: u16 = 520;
pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 9);

pub const HEADER_SIZE: usize = 4;
pub const RIP_VERSION: u8 = 2;

/// Largest datagram the receive loop accepts.
pub const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Request = 1,
    Response = 2,
}

impl TryFrom<u8> for Command {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Request),
            2 => Ok(Command::Response),
            other => Err(FormatError::BadCommand(other)),
        }
    }
}

/// Authentication carried by a PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Plain {
        key: [u8; KEY_SIZE],
    },
    Md5 {
        packet_len: u16,
        key_id: u8,
        auth_len: u8,
        seqno: u32,
        /// Present once the trailing entry has been parsed or sealed.
        digest: Option<[u8; KEY_SIZE]>,
    },
}

impl Auth {
    pub fn auth_type(&self) -> u16 {
        match self {
            Auth::Plain { .. } => crate::entry::AUTH_PLAIN,
            Auth::Md5 { .. } => crate::entry::AUTH_MD5,
        }
    }

    fn leading_entry(&self) -> Entry {
        match *self {
            Auth::Plain { key } => Entry::Plain { key },
            Auth::Md5 {
                packet_len,
                key_id,
                auth_len,
                seqno,
                ..
            } => Entry::Md5 {
                packet_len,
                key_id,
                auth_len,
                seqno,
            },
        }
    }
}

/// A RIPv2 PDU: header, optional authentication, route entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub command: Command,
    pub version: u8,
    pub auth: Option<Auth>,
    pub entries: Vec<RouteEntry>,
}

impl Pdu {
    pub fn new(command: Command) -> Self {
        Pdu {
            command,
            version: RIP_VERSION,
            auth: None,
            entries: Vec::new(),
        }
    }

    pub fn response(entries: Vec<RouteEntry>) -> Self {
        Pdu {
            entries,
            ..Pdu::new(Command::Response)
        }
    }

    /// The "send me your whole table" request.
    pub fn request_full_table() -> Self {
        Pdu {
            entries: vec![RouteEntry::give_all()],
            ..Pdu::new(Command::Request)
        }
    }

    pub fn is_full_table_request(&self) -> bool {
        self.command == Command::Request
            && self.entries.len() == 1
            && self.entries[0].is_give_all()
    }

    /// Authentication type carried by the packet (0 when unauthenticated).
    pub fn auth_type(&self) -> u16 {
        self.auth
            .map(|a| a.auth_type())
            .unwrap_or(crate::entry::AUTH_NONE)
    }

    /// Bytes covered by the header, the MD5 metadata and the route entries.
    pub fn authenticated_len(&self) -> usize {
        let auth = if self.auth.is_some() { ENTRY_SIZE } else { 0 };
        HEADER_SIZE + auth + self.entries.len() * ENTRY_SIZE
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < HEADER_SIZE {
            return Err(FormatError::Truncated(buf.len()));
        }
        let body_len = buf.len() - HEADER_SIZE;
        if body_len % ENTRY_SIZE != 0 {
            return Err(FormatError::Misaligned(body_len));
        }

        let mut cur = Cursor::new(buf);
        let command = Command::try_from(cur.read_u8().map_err(|_| FormatError::Truncated(0))?)?;
        let version = cur.read_u8().map_err(|_| FormatError::Truncated(1))?;
        cur.set_position(HEADER_SIZE as u64);

        let count = body_len / ENTRY_SIZE;
        let mut pdu = Pdu {
            command,
            version,
            auth: None,
            entries: Vec::with_capacity(count),
        };

        for index in 0..count {
            match Entry::parse(&mut cur)? {
                Entry::Route(r) => pdu.entries.push(r),
                Entry::Plain { key } if index == 0 => pdu.auth = Some(Auth::Plain { key }),
                Entry::Md5 {
                    packet_len,
                    key_id,
                    auth_len,
                    seqno,
                } if index == 0 => {
                    pdu.auth = Some(Auth::Md5 {
                        packet_len,
                        key_id,
                        auth_len,
                        seqno,
                        digest: None,
                    })
                }
                Entry::Digest { digest } if index == count - 1 => {
                    if let Some(Auth::Md5 { digest: d, .. }) = pdu.auth.as_mut() {
                        *d = Some(digest);
                    }
                }
                // Authentication entries anywhere else carry nothing we use.
                _ => {}
            }
        }

        Ok(pdu)
    }

    /// Serialize the PDU. An MD5 PDU only gets its trailing entry when a
    /// digest is present; use [`Pdu::seal`] to compute one.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.authenticated_len() + ENTRY_SIZE);
        buf.push(self.command as u8);
        buf.push(self.version);
        buf.extend_from_slice(&[0, 0]);

        if let Some(auth) = &self.auth {
            buf.extend_from_slice(&auth.leading_entry().to_bytes());
        }
        for e in &self.entries {
            buf.extend_from_slice(&Entry::Route(*e).to_bytes());
        }
        if let Some(Auth::Md5 {
            digest: Some(digest),
            ..
        }) = &self.auth
        {
            buf.extend_from_slice(&Entry::Digest { digest: *digest }.to_bytes());
        }
        buf
    }

    /// Serialize an MD5 PDU: the trailing entry is first written with the
    /// zero-padded key, the digest is computed over everything written so
    /// far, and the key is then replaced by the digest.
    ///
    /// Non-MD5 PDUs are serialized unchanged.
    pub fn seal(&self, key: &[u8; KEY_SIZE]) -> Vec<u8> {
        if !matches!(self.auth, Some(Auth::Md5 { .. })) {
            return self.to_bytes();
        }

        let mut unsealed = self.clone();
        if let Some(Auth::Md5 { digest, .. }) = unsealed.auth.as_mut() {
            *digest = None;
        }
        let mut buf = unsealed.to_bytes();
        buf.extend_from_slice(&Entry::Digest { digest: *key }.to_bytes());

        let digest = Md5::digest(&buf);
        buf.truncate(buf.len() - KEY_SIZE);
        buf.extend_from_slice(&digest);
        buf
    }

    /// Force invalid advertisements to infinity. Returns the networks that
    /// were invalidated.
    pub fn sanitize(&mut self) -> Vec<Ipv4Addr> {
        let mut invalid = Vec::new();
        if self.command != Command::Response {
            return invalid;
        }
        for e in self.entries.iter_mut().filter(|e| e.afi == AFI_INET) {
            let bad_network = e.network != Ipv4Addr::UNSPECIFIED && !is_global_unicast(e.network);
            if e.metric > INFINITY || (bad_network && e.metric != INFINITY) {
                e.metric = INFINITY;
                invalid.push(e.network);
            }
        }
        invalid
    }
}

/// Unicast addresses that may appear as an advertised network or neighbor.
pub fn is_global_unicast(ip: Ipv4Addr) -> bool {
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_link_local()
        || ip.octets()[0] >= 240)
}
