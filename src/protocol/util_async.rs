use crate::{FbError, FbResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::util_sync::padding_of;

pub(crate) async fn emit_block<W: AsyncWriteExt + std::marker::Unpin>(
    bytes: &[u8],
    w: &mut W,
) -> FbResult<()> {
    w.write_u32(u32::try_from(bytes.len()).map_err(|_| {
        FbError::Marshaling(format!("block of {} bytes exceeds the wire limit", bytes.len()))
    })?)
    .await?;
    w.write_all(bytes).await?;
    w.write_all(&[0_u8; 3][..padding_of(bytes.len())]).await?;
    Ok(())
}

pub(crate) async fn parse_block<R: AsyncReadExt + std::marker::Unpin>(
    rdr: &mut R,
) -> FbResult<Vec<u8>> {
    let len = rdr.read_u32().await? as usize;
    let bytes = parse_bytes(len, rdr).await?;
    skip_bytes(padding_of(len), rdr).await?;
    Ok(bytes)
}

pub(crate) async fn parse_string<R: AsyncReadExt + std::marker::Unpin>(
    rdr: &mut R,
) -> FbResult<String> {
    Ok(String::from_utf8_lossy(&parse_block(rdr).await?).to_string())
}

pub(crate) async fn parse_bytes<R: AsyncReadExt + std::marker::Unpin>(
    len: usize,
    rdr: &mut R,
) -> FbResult<Vec<u8>> {
    let mut vec = vec![0_u8; len];
    rdr.read_exact(&mut vec).await?;
    Ok(vec)
}

pub(crate) async fn skip_bytes<R: AsyncReadExt + std::marker::Unpin>(
    n: usize,
    rdr: &mut R,
) -> FbResult<()> {
    const MAXBUFLEN: usize = 16;
    if n > MAXBUFLEN {
        Err(FbError::Impl("n > MAXBUFLEN (16)"))
    } else {
        let mut buffer = [0_u8; MAXBUFLEN];
        let _tmp: usize = rdr.read_exact(&mut buffer[0..n]).await?;
        Ok(())
    }
}
