use crate::conn::wire_crypt::Arc4;

fn poisoned_error() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "the channel is poisoned by an interrupted write; re-establish the connection",
    )
}

/// The ordered byte channel all protocol messages travel over.
///
/// Wraps any blocking stream and applies the wire cipher once encryption is
/// activated. A partially flushed write poisons the channel: every later
/// use fails and the connection must be re-established.
#[cfg(feature = "sync")]
#[derive(Debug)]
pub struct WireChannel<S> {
    stream: S,
    read_cipher: Option<Arc4>,
    write_cipher: Option<Arc4>,
    scratch: Vec<u8>,
    poisoned: bool,
}

#[cfg(feature = "sync")]
impl<S> WireChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_cipher: None,
            write_cipher: None,
            scratch: Vec::new(),
            poisoned: false,
        }
    }

    /// Starts encrypting, outbound first: everything written after this call
    /// is enciphered, and the very next read already deciphers.
    pub fn start_encryption(&mut self, session_key: &[u8]) {
        debug!("activating wire encryption");
        self.write_cipher = Some(Arc4::new(session_key));
        self.read_cipher = Some(Arc4::new(session_key));
    }

    pub fn is_encrypted(&self) -> bool {
        self.write_cipher.is_some()
    }

    /// Marks the channel unusable after an interrupted write.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(feature = "sync")]
impl<S: std::io::Read> std::io::Read for WireChannel<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.poisoned {
            return Err(poisoned_error());
        }
        let count = self.stream.read(buf)?;
        if let Some(ref mut cipher) = self.read_cipher {
            cipher.transform(&mut buf[..count]);
        }
        Ok(count)
    }
}

#[cfg(feature = "sync")]
impl<S: std::io::Write> std::io::Write for WireChannel<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.poisoned {
            return Err(poisoned_error());
        }
        match self.write_cipher {
            None => self.stream.write(buf),
            Some(ref mut cipher) => {
                // the cipher stream advances exactly once per plaintext byte,
                // so the enciphered copy must be written out completely
                self.scratch.clear();
                self.scratch.extend_from_slice(buf);
                cipher.transform(&mut self.scratch);
                if let Err(e) = self.stream.write_all(&self.scratch) {
                    self.poisoned = true;
                    return Err(e);
                }
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.poisoned {
            return Err(poisoned_error());
        }
        self.stream.flush()
    }
}

/// Suspendable counterpart of [`WireChannel`] with identical cipher and
/// poisoning semantics.
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct AsyncWireChannel<S> {
    stream: S,
    read_cipher: Option<Arc4>,
    write_cipher: Option<Arc4>,
    pending: Vec<u8>,
    pending_pos: usize,
    poisoned: bool,
}

#[cfg(feature = "async")]
impl<S> AsyncWireChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_cipher: None,
            write_cipher: None,
            pending: Vec::new(),
            pending_pos: 0,
            poisoned: false,
        }
    }

    /// See [`WireChannel::start_encryption`].
    pub fn start_encryption(&mut self, session_key: &[u8]) {
        debug!("activating wire encryption");
        self.write_cipher = Some(Arc4::new(session_key));
        self.read_cipher = Some(Arc4::new(session_key));
    }

    pub fn is_encrypted(&self) -> bool {
        self.write_cipher.is_some()
    }

    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(feature = "async")]
impl<S: tokio::io::AsyncWrite + Unpin> AsyncWireChannel<S> {
    // Drives the enciphered backlog into the underlying stream.
    fn poll_write_pending(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::task::Poll;
        while self.pending_pos < self.pending.len() {
            let n = match std::pin::Pin::new(&mut self.stream)
                .poll_write(cx, &self.pending[self.pending_pos..])
            {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => {
                    self.poisoned = true;
                    return Poll::Ready(Err(e));
                }
                Poll::Ready(Ok(n)) => n,
            };
            self.pending_pos += n;
        }
        self.pending.clear();
        self.pending_pos = 0;
        Poll::Ready(Ok(()))
    }
}

#[cfg(feature = "async")]
impl<S: tokio::io::AsyncRead + Unpin> tokio::io::AsyncRead for AsyncWireChannel<S> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::task::{ready, Poll};
        let this = self.get_mut();
        if this.poisoned {
            return Poll::Ready(Err(poisoned_error()));
        }
        let before = buf.filled().len();
        ready!(std::pin::Pin::new(&mut this.stream).poll_read(cx, buf))?;
        if let Some(ref mut cipher) = this.read_cipher {
            cipher.transform(&mut buf.filled_mut()[before..]);
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(feature = "async")]
impl<S: tokio::io::AsyncWrite + Unpin> tokio::io::AsyncWrite for AsyncWireChannel<S> {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        use std::task::Poll;
        let this = self.get_mut();
        if this.poisoned {
            return Poll::Ready(Err(poisoned_error()));
        }
        if this.write_cipher.is_none() {
            return std::pin::Pin::new(&mut this.stream).poll_write(cx, buf);
        }
        // encipher into the backlog, then opportunistically drain; the bytes
        // are accepted either way, like with a buffered writer
        let start = this.pending.len();
        this.pending.extend_from_slice(buf);
        if let Some(ref mut cipher) = this.write_cipher {
            cipher.transform(&mut this.pending[start..]);
        }
        match this.poll_write_pending(cx) {
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            _ => Poll::Ready(Ok(buf.len())),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::task::{ready, Poll};
        let this = self.get_mut();
        if this.poisoned {
            return Poll::Ready(Err(poisoned_error()));
        }
        ready!(this.poll_write_pending(cx))?;
        std::pin::Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::task::ready;
        let this = self.get_mut();
        ready!(this.poll_write_pending(cx))?;
        std::pin::Pin::new(&mut this.stream).poll_shutdown(cx)
    }
}

#[cfg(all(test, feature = "sync"))]
mod test {
    use super::WireChannel;
    use crate::conn::wire_crypt::Arc4;
    use std::io::{Read, Write};

    #[test]
    fn test_plaintext_passthrough() {
        let mut channel = WireChannel::new(std::io::Cursor::new(Vec::new()));
        channel.write_all(b"unencrypted").unwrap();
        assert_eq!(channel.into_inner().into_inner(), b"unencrypted");
    }

    #[test]
    fn test_encryption_starts_mid_stream() {
        let key = b"session-key";
        let mut channel = WireChannel::new(std::io::Cursor::new(Vec::new()));
        channel.write_all(b"plain").unwrap();
        channel.start_encryption(key);
        channel.write_all(b"secret").unwrap();

        let written = channel.into_inner().into_inner();
        assert_eq!(&written[..5], b"plain");
        assert_ne!(&written[5..], b"secret");
        let mut decipher = Arc4::new(key);
        let mut tail = written[5..].to_vec();
        decipher.transform(&mut tail);
        assert_eq!(tail, b"secret");
    }

    #[test]
    fn test_read_deciphers() {
        let key = b"session-key";
        let mut on_the_wire = b"confidential".to_vec();
        Arc4::new(key).transform(&mut on_the_wire);

        let mut channel = WireChannel::new(std::io::Cursor::new(on_the_wire));
        channel.start_encryption(key);
        let mut buf = vec![0_u8; 12];
        channel.read_exact(&mut buf).unwrap();
        assert_eq!(buf, b"confidential");
    }

    #[test]
    fn test_poisoned_channel_refuses_io() {
        let mut channel = WireChannel::new(std::io::Cursor::new(Vec::new()));
        channel.poison();
        assert!(channel.write_all(b"x").is_err());
        let mut buf = [0_u8; 1];
        assert!(channel.read(&mut buf).is_err());
    }
}
