use std::net::Ipv4Addr;

use thiserror::Error;

pub const MAX_PACKET_SIZE: usize = 512;

const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

/// Compression pointers may chain, but hostile packets can loop them.
const MAX_POINTER_JUMPS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("packet is a response, not a query")]
    NotAQuery,
    #[error("query carries no question")]
    NoQuestion,
    #[error("packet truncated at offset {0}")]
    Truncated(usize),
    #[error("name compression depth exceeded")]
    PointerDepth,
}

/// The parts of an incoming query needed to spoof an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryView {
    pub id: u16,
    /// Lossy-decoded dotted name, for logs only.
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
    /// Raw question section as received; responses echo it byte for
    /// byte.
    pub question: Vec<u8>,
}

/// Parses the header and first question of a DNS query.
pub fn decode_query(packet: &[u8]) -> Result<QueryView, PacketError> {
    if packet.len() < 12 {
        return Err(PacketError::TooShort(packet.len()));
    }

    let id = u16::from_be_bytes([packet[0], packet[1]]);
    let flags = u16::from_be_bytes([packet[2], packet[3]]);
    if flags & 0x8000 != 0 {
        return Err(PacketError::NotAQuery);
    }

    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    if qdcount == 0 {
        return Err(PacketError::NoQuestion);
    }

    let (name, pos) = parse_name(packet, 12)?;
    if pos + 4 > packet.len() {
        return Err(PacketError::Truncated(pos));
    }

    let qtype = u16::from_be_bytes([packet[pos], packet[pos + 1]]);
    let qclass = u16::from_be_bytes([packet[pos + 2], packet[pos + 3]]);

    Ok(QueryView {
        id,
        name,
        qtype,
        qclass,
        question: packet[12..pos + 4].to_vec(),
    })
}

/// Builds the spoofed response: the question echoed byte for byte from
/// the wire plus one A record carrying `answer`, with the answer name
/// compressed to point back at the question (offset 0x0C).
pub fn encode_answer(query: &QueryView, answer: Ipv4Addr, ttl: u32) -> Vec<u8> {
    let mut response = Vec::with_capacity(MAX_PACKET_SIZE);

    response.extend_from_slice(&query.id.to_be_bytes());

    // QR | AA, NOERROR.
    let flags: u16 = 0x8000 | 0x0400;
    response.extend_from_slice(&flags.to_be_bytes());

    response.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    response.extend_from_slice(&1u16.to_be_bytes()); // ANCOUNT
    response.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    response.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    response.extend_from_slice(&query.question);

    response.extend_from_slice(&0xC00Cu16.to_be_bytes());
    response.extend_from_slice(&TYPE_A.to_be_bytes());
    response.extend_from_slice(&CLASS_IN.to_be_bytes());
    response.extend_from_slice(&ttl.to_be_bytes());
    response.extend_from_slice(&4u16.to_be_bytes());
    response.extend_from_slice(&answer.octets());

    response
}

/// Walks a possibly compressed name starting at `start`, returning the
/// dotted name and the offset just past it in the original buffer.
fn parse_name(packet: &[u8], start: usize) -> Result<(String, usize), PacketError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = start;
    let mut consumed = 0usize;
    let mut jumped = false;
    let mut jumps = 0usize;

    loop {
        if pos >= packet.len() {
            return Err(PacketError::Truncated(pos));
        }

        let len = packet[pos] as usize;

        if len == 0 {
            if !jumped {
                consumed += 1;
            }
            break;
        }

        if len & 0xC0 == 0xC0 {
            if pos + 1 >= packet.len() {
                return Err(PacketError::Truncated(pos));
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(PacketError::PointerDepth);
            }
            let offset = ((len & 0x3F) << 8) | packet[pos + 1] as usize;
            if !jumped {
                consumed += 2;
                jumped = true;
            }
            pos = offset;
            continue;
        }

        pos += 1;
        if pos + len > packet.len() {
            return Err(PacketError::Truncated(pos));
        }
        labels.push(String::from_utf8_lossy(&packet[pos..pos + len]).into_owned());
        if !jumped {
            consumed += 1 + len;
        }
        pos += len;
    }

    Ok((labels.join("."), start + consumed))
}
