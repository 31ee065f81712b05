use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::IoMode;
use crate::codec::Encode;
use crate::error::{CodecError, RecioError};

/// Buffered writer of encodable values.
pub struct BufferedWriter<W> {
    inner: W,
    buf: Box<[u8]>,
    len: usize,
    mode: IoMode,
}

impl<W: AsyncWrite + Unpin> BufferedWriter<W> {
    pub fn new(inner: W, capacity: usize, mode: IoMode) -> Self {
        Self {
            inner,
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            mode,
        }
    }

    /// Place one encoded value in the buffer, returning its size.
    ///
    /// Fails with `TooLarge` when the value cannot fit even in an empty
    /// buffer. In Manual mode a full buffer yields `MustFlush`.
    pub async fn write<E: Encode>(&mut self, value: &E) -> Result<usize, RecioError> {
        loop {
            match value.encode(&mut self.buf[self.len..]) {
                Ok(n) => {
                    self.len += n;
                    return Ok(n);
                }
                Err(CodecError::ShortBuffer) => {
                    if self.len == 0 {
                        return Err(RecioError::TooLarge);
                    }
                    match self.mode {
                        IoMode::Manual => return Err(RecioError::MustFlush),
                        IoMode::Auto => self.flush().await?,
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Hand all buffered bytes to the sink.
    ///
    /// If the sink stops accepting bytes the unwritten tail is kept at the
    /// front of the buffer and `ShortWrite` is returned.
    pub async fn flush(&mut self) -> Result<(), RecioError> {
        let mut written = 0;
        let result = loop {
            if written == self.len {
                break Ok(());
            }
            match self.inner.write(&self.buf[written..self.len]).await {
                Ok(0) => break Err(RecioError::ShortWrite),
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => break Err(RecioError::Io(e)),
            }
        };

        if written > 0 {
            self.buf.copy_within(written..self.len, 0);
            self.len -= written;
        }
        result?;

        self.inner.flush().await?;
        Ok(())
    }

    /// Bytes waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.len
    }

    /// Free space left in the buffer.
    pub fn available(&self) -> usize {
        self.buf.len() - self.len
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn mode(&self) -> IoMode {
        self.mode
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Mutable access to the sink. Writing to it directly while bytes are
    /// buffered reorders output.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Discard buffered bytes and return the sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}
