use crate::{FbError, FbResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

// All protocol messages use an XDR-style framing: 4-byte big-endian words,
// opaque byte blocks length-prefixed and zero-padded to a 4-byte boundary.

pub(crate) fn padding_of(len: usize) -> usize {
    (4 - len % 4) % 4
}

pub(crate) fn block_size(len: usize) -> usize {
    4 + len + padding_of(len)
}

pub(crate) fn emit_block(bytes: &[u8], w: &mut dyn std::io::Write) -> FbResult<()> {
    w.write_u32::<BigEndian>(u32::try_from(bytes.len()).map_err(|_| {
        FbError::Marshaling(format!("block of {} bytes exceeds the wire limit", bytes.len()))
    })?)?;
    w.write_all(bytes)?;
    w.write_all(&[0_u8; 3][..padding_of(bytes.len())])?;
    Ok(())
}

pub(crate) fn parse_block(rdr: &mut dyn std::io::Read) -> FbResult<Vec<u8>> {
    let len = rdr.read_u32::<BigEndian>()? as usize;
    let bytes = parse_bytes(len, rdr)?;
    skip_bytes(padding_of(len), rdr)?;
    Ok(bytes)
}

pub(crate) fn parse_string(rdr: &mut dyn std::io::Read) -> FbResult<String> {
    Ok(String::from_utf8_lossy(&parse_block(rdr)?).to_string())
}

// Read n bytes, return as Vec<u8>
pub(crate) fn parse_bytes(len: usize, rdr: &mut dyn std::io::Read) -> FbResult<Vec<u8>> {
    let mut vec = vec![0_u8; len];
    rdr.read_exact(&mut vec)?;
    Ok(vec)
}

pub(crate) fn skip_bytes(n: usize, rdr: &mut dyn std::io::Read) -> FbResult<()> {
    const MAXBUFLEN: usize = 16;
    if n > MAXBUFLEN {
        Err(FbError::Impl("n > MAXBUFLEN (16)"))
    } else {
        let mut buffer = [0_u8; MAXBUFLEN];
        Ok(rdr.read_exact(&mut buffer[0..n])?)
    }
}
