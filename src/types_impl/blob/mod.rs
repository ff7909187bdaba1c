mod blob_stream;

#[cfg(feature = "async")]
pub use self::blob_stream::AsyncBlobStream;
#[cfg(feature = "sync")]
pub use self::blob_stream::BlobStream;

use crate::FbResult;

/// Reference point of a blob seek.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SeekMode {
    /// Relative to the start of the blob.
    Head = 0,
    /// Relative to the current position.
    Current = 1,
    /// Relative to the end of the blob.
    Tail = 2,
}

/// The segment-fetch primitives of a server-side blob.
///
/// One call fetches one server segment; the stream layer on top buffers it
/// and serves byte-level reads.
#[cfg(feature = "sync")]
pub trait SegmentedBlob {
    fn open(&mut self) -> FbResult<()>;

    /// Fetches the next segment into `buf` (replacing its content);
    /// returns true once end-of-blob is reached.
    fn get_segment(&mut self, buf: &mut Vec<u8>) -> FbResult<bool>;

    /// Repositions the server-side cursor; returns the new absolute
    /// position.
    fn seek(&mut self, offset: i64, mode: SeekMode) -> FbResult<u64>;

    fn close(&mut self) -> FbResult<()>;

    /// Abandons the blob. At this layer equivalent to [`close`](Self::close).
    fn cancel(&mut self) -> FbResult<()>;

    /// Total length of the blob in bytes.
    fn length(&self) -> FbResult<u64>;
}

/// Suspendable counterpart of [`SegmentedBlob`].
#[cfg(feature = "async")]
#[async_trait::async_trait]
pub trait AsyncSegmentedBlob: Send {
    async fn open(&mut self) -> FbResult<()>;
    async fn get_segment(&mut self, buf: &mut Vec<u8>) -> FbResult<bool>;
    async fn seek(&mut self, offset: i64, mode: SeekMode) -> FbResult<u64>;
    async fn close(&mut self) -> FbResult<()>;
    async fn cancel(&mut self) -> FbResult<()>;
    async fn length(&self) -> FbResult<u64>;
}
