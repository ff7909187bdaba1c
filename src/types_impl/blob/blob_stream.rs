use crate::{FbError, FbResult};

use super::SeekMode;

// The most-recently-fetched server segment; start marks how far it was
// consumed.
#[derive(Debug, Default)]
struct SegmentBuf {
    data: Vec<u8>,
    start: usize,
}

impl SegmentBuf {
    fn is_empty(&self) -> bool {
        self.start >= self.data.len()
    }

    fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }

    // Copies as much as fits, advances the consumed mark.
    fn copy_into(&mut self, dst: &mut [u8]) -> usize {
        let available = self.data.len() - self.start;
        let count = std::cmp::min(available, dst.len());
        dst[..count].copy_from_slice(&self.data[self.start..self.start + count]);
        self.start += count;
        count
    }
}

fn check_window(dst_len: usize, offset: usize, count: usize) -> FbResult<usize> {
    let end = offset
        .checked_add(count)
        .ok_or(FbError::Usage("the destination window overflows"))?;
    if end > dst_len {
        return Err(FbError::Usage(
            "the destination window exceeds the buffer",
        ));
    }
    Ok(end)
}

fn resolve_target(position: u64, length: u64, offset: i64, mode: SeekMode) -> i64 {
    match mode {
        SeekMode::Head => offset,
        SeekMode::Current => position as i64 + offset,
        SeekMode::Tail => length as i64 + offset,
    }
}

/// Exposes a server-side segmented blob as a seekable byte stream.
///
/// Reads fetch and buffer one server segment at a time; a fetched segment
/// is retained until fully consumed. Seeking discards the buffered segment,
/// so the next read always fetches fresh data from the new position.
#[cfg(feature = "sync")]
#[derive(Debug)]
pub struct BlobStream<B> {
    blob: B,
    segment: SegmentBuf,
    position: u64,
    eof: bool,
    open: bool,
}

#[cfg(feature = "sync")]
impl<B: super::SegmentedBlob> BlobStream<B> {
    pub fn open(mut blob: B) -> FbResult<Self> {
        blob.open()?;
        Ok(Self {
            blob,
            segment: SegmentBuf::default(),
            position: 0,
            eof: false,
            open: true,
        })
    }

    /// The current logical read position.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn length(&self) -> FbResult<u64> {
        self.blob.length()
    }

    /// Copies up to `count` bytes into `dst[offset..offset + count]`.
    ///
    /// Destination bytes outside that window are never touched, even when
    /// more buffered segment data is available. Returns the number of
    /// copied bytes; less than `count` only at end-of-blob.
    pub fn read(&mut self, dst: &mut [u8], offset: usize, count: usize) -> FbResult<usize> {
        self.check_open()?;
        let end = check_window(dst.len(), offset, count)?;
        let window = &mut dst[offset..end];

        let mut copied = 0;
        while copied < window.len() {
            if self.segment.is_empty() {
                if self.eof {
                    break;
                }
                self.segment.clear();
                let ended = self.blob.get_segment(&mut self.segment.data)?;
                trace!("fetched a segment of {} bytes", self.segment.data.len());
                if ended {
                    self.eof = true;
                }
                if self.segment.is_empty() {
                    break;
                }
            }
            copied += self.segment.copy_into(&mut window[copied..]);
        }
        self.position += copied as u64;
        Ok(copied)
    }

    /// Moves the logical position, clamped to `[0, blob_length]`, and
    /// discards any buffered segment.
    pub fn seek(&mut self, offset: i64, mode: SeekMode) -> FbResult<u64> {
        self.check_open()?;
        let length = self.blob.length()?;
        let target = resolve_target(self.position, length, offset, mode).clamp(0, length as i64);
        self.segment.clear();
        self.eof = false;
        self.position = self.blob.seek(target, SeekMode::Head)?;
        Ok(self.position)
    }

    pub fn close(&mut self) -> FbResult<()> {
        if self.open {
            self.open = false;
            self.segment.clear();
            self.blob.close()?;
        }
        Ok(())
    }

    /// Same transition as [`close`](Self::close); there is no distinct
    /// rollback at this layer.
    pub fn cancel(&mut self) -> FbResult<()> {
        if self.open {
            self.open = false;
            self.segment.clear();
            self.blob.cancel()?;
        }
        Ok(())
    }

    fn check_open(&self) -> FbResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(FbError::Usage("the blob stream is closed"))
        }
    }
}

#[cfg(feature = "sync")]
impl<B: super::SegmentedBlob> std::io::Read for BlobStream<B> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let count = buf.len();
        BlobStream::read(self, buf, 0, count).map_err(std::io::Error::other)
    }
}

#[cfg(feature = "sync")]
impl<B: super::SegmentedBlob> std::io::Seek for BlobStream<B> {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        let (offset, mode) = match pos {
            std::io::SeekFrom::Start(offset) => (offset as i64, SeekMode::Head),
            std::io::SeekFrom::Current(offset) => (offset, SeekMode::Current),
            std::io::SeekFrom::End(offset) => (offset, SeekMode::Tail),
        };
        BlobStream::seek(self, offset, mode).map_err(std::io::Error::other)
    }
}

/// Suspendable counterpart of [`BlobStream`] with identical buffering and
/// window semantics.
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct AsyncBlobStream<B> {
    blob: B,
    segment: SegmentBuf,
    position: u64,
    eof: bool,
    open: bool,
}

#[cfg(feature = "async")]
impl<B: super::AsyncSegmentedBlob> AsyncBlobStream<B> {
    pub async fn open(mut blob: B) -> FbResult<Self> {
        blob.open().await?;
        Ok(Self {
            blob,
            segment: SegmentBuf::default(),
            position: 0,
            eof: false,
            open: true,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub async fn length(&self) -> FbResult<u64> {
        self.blob.length().await
    }

    /// See [`BlobStream::read`].
    pub async fn read(
        &mut self,
        dst: &mut [u8],
        offset: usize,
        count: usize,
    ) -> FbResult<usize> {
        self.check_open()?;
        let end = check_window(dst.len(), offset, count)?;
        let window = &mut dst[offset..end];

        let mut copied = 0;
        while copied < window.len() {
            if self.segment.is_empty() {
                if self.eof {
                    break;
                }
                self.segment.clear();
                let ended = self.blob.get_segment(&mut self.segment.data).await?;
                trace!("fetched a segment of {} bytes", self.segment.data.len());
                if ended {
                    self.eof = true;
                }
                if self.segment.is_empty() {
                    break;
                }
            }
            copied += self.segment.copy_into(&mut window[copied..]);
        }
        self.position += copied as u64;
        Ok(copied)
    }

    /// See [`BlobStream::seek`].
    pub async fn seek(&mut self, offset: i64, mode: SeekMode) -> FbResult<u64> {
        self.check_open()?;
        let length = self.blob.length().await?;
        let target = resolve_target(self.position, length, offset, mode).clamp(0, length as i64);
        self.segment.clear();
        self.eof = false;
        self.position = self.blob.seek(target, SeekMode::Head).await?;
        Ok(self.position)
    }

    pub async fn close(&mut self) -> FbResult<()> {
        if self.open {
            self.open = false;
            self.segment.clear();
            self.blob.close().await?;
        }
        Ok(())
    }

    pub async fn cancel(&mut self) -> FbResult<()> {
        if self.open {
            self.open = false;
            self.segment.clear();
            self.blob.cancel().await?;
        }
        Ok(())
    }

    fn check_open(&self) -> FbResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(FbError::Usage("the blob stream is closed"))
        }
    }
}
