//! Length-prefixed frames on a byte stream.
//!
//! Each frame is a 7-bit encoded unsigned length (low groups first, high bit set on every byte but the last)
//! followed by that many bytes of UTF-8.

use std::io::{self, Read, Write};

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// A `u32` never needs more than five 7-bit groups.
const MAX_PREFIX_BYTES: usize = 5;

/// Write `payload` as one frame and flush.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &str) -> io::Result<()> {
    let bytes = payload.as_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds limit", bytes.len()),
        ));
    }
    let mut prefix = [0u8; MAX_PREFIX_BYTES];
    let prefix_len = encode_length(bytes.len() as u32, &mut prefix);
    writer.write_all(&prefix[..prefix_len])?;
    writer.write_all(bytes)?;
    writer.flush()
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream before any prefix byte.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<String>> {
    let Some(len) = read_length(reader)? else {
        return Ok(None);
    };
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn encode_length(mut value: u32, out: &mut [u8; MAX_PREFIX_BYTES]) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        out[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    out[i] = value as u8;
    i + 1
}

fn read_length<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<usize>> {
    let mut value: u64 = 0;
    for i in 0..MAX_PREFIX_BYTES {
        let mut byte = [0u8; 1];
        let n = read_byte(reader, &mut byte)?;
        if n == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended inside a frame prefix"));
        }
        value |= u64::from(byte[0] & 0x7f) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return usize::try_from(value)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "frame prefix too long"))
}

fn read_byte<R: Read + ?Sized>(reader: &mut R, byte: &mut [u8; 1]) -> io::Result<usize> {
    loop {
        match reader.read(byte) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
