#![allow(dead_code)]
//! Wire building helpers for tests
//!
//! These functions construct raw packets and lines for precise testing of
//! frame reassembly.

/// Command bytes
pub const COM_QUIT: u8 = 0x01;
pub const COM_INIT_DB: u8 = 0x02;
pub const COM_QUERY: u8 = 0x03;
pub const COM_PING: u8 = 0x0e;
pub const COM_STMT_PREPARE: u8 = 0x16;

/// Build a raw packet header (4 bytes)
fn build_packet_header(length: u32, sequence_id: u8) -> Vec<u8> {
    let mut header = Vec::with_capacity(4);
    // Length (24-bit little-endian)
    header.push(length as u8);
    header.push((length >> 8) as u8);
    header.push((length >> 16) as u8);
    header.push(sequence_id);
    header
}

/// Build a packet carrying `command` followed by `payload`
pub fn build_packet(sequence_id: u8, command: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = build_packet_header(payload.len() as u32 + 1, sequence_id);
    packet.push(command);
    packet.extend_from_slice(payload);
    packet
}

/// Build a COM_QUERY packet with sequence id 0
pub fn build_query(sql: &str) -> Vec<u8> {
    build_packet(0, COM_QUERY, sql.as_bytes())
}

/// Build a packet whose header declares `declared` payload bytes
/// regardless of what follows
pub fn build_bogus_header(declared: u32, sequence_id: u8) -> Vec<u8> {
    build_packet_header(declared, sequence_id)
}

/// Build a CRLF-terminated line
pub fn build_line(text: &str) -> Vec<u8> {
    let mut line = text.as_bytes().to_vec();
    line.extend_from_slice(b"\r\n");
    line
}

/// Concatenate a sequence of frames into one buffer
pub fn concat(frames: &[Vec<u8>]) -> Vec<u8> {
    frames.concat()
}
