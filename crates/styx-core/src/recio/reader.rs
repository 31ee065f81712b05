use tokio::io::{AsyncRead, AsyncReadExt};

use super::IoMode;
use crate::codec::Decode;
use crate::error::{CodecError, RecioError};

/// Buffered reader of decodable values.
///
/// End of input is sticky until a later `fill` returns new bytes, which lets
/// the reader follow a file that is still being appended to.
pub struct BufferedReader<R> {
    inner: R,
    buf: Box<[u8]>,
    start: usize,
    end: usize,
    eof: bool,
    mode: IoMode,
}

impl<R: AsyncRead + Unpin> BufferedReader<R> {
    pub fn new(inner: R, capacity: usize, mode: IoMode) -> Self {
        Self {
            inner,
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
            eof: false,
            mode,
        }
    }

    /// Decode one value from the buffer, returning the bytes it consumed.
    pub async fn read<D: Decode>(&mut self, value: &mut D) -> Result<usize, RecioError> {
        loop {
            match value.decode(&self.buf[self.start..self.end]) {
                Ok(n) => {
                    self.start += n;
                    return Ok(n);
                }
                Err(CodecError::ShortBuffer) => {
                    if self.start == 0 && self.end == self.buf.len() {
                        return Err(RecioError::TooLarge);
                    }
                    if self.eof {
                        return Err(if self.start == self.end {
                            RecioError::Eof
                        } else {
                            RecioError::UnexpectedEof
                        });
                    }
                    match self.mode {
                        IoMode::Manual => return Err(RecioError::MustFill),
                        IoMode::Auto => {
                            self.fill().await?;
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Compact unread bytes to the front and read more from the source.
    ///
    /// Returns the number of new bytes; zero marks end of input.
    pub async fn fill(&mut self) -> Result<usize, RecioError> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.end == self.buf.len() {
            return Ok(0);
        }

        let n = loop {
            match self.inner.read(&mut self.buf[self.end..]).await {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(RecioError::Io(e)),
            }
        };
        if n == 0 {
            self.eof = true;
        } else {
            self.eof = false;
            self.end += n;
        }
        Ok(n)
    }

    /// Skip up to `n` buffered bytes without decoding them.
    pub fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.end - self.start);
        self.start += n;
        n
    }

    /// Drop all buffered bytes and the end-of-input flag, e.g. after the
    /// source was repositioned.
    pub fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
        self.eof = false;
    }

    pub fn buffered(&self) -> usize {
        self.end - self.start
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn mode(&self) -> IoMode {
        self.mode
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutable access to the source. Call [`reset`](Self::reset) after
    /// repositioning it.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
