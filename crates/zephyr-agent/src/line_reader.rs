use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Line stream over one process's stdout. Invalid UTF-8 is replaced rather
/// than ending the stream; the reader finishes on EOF or the first I/O error.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    done: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::with_capacity(512),
            done: false,
        }
    }

    pub async fn next_line(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.inner.read_until(b'\n', &mut self.buf).await {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                    self.buf.pop();
                }
                Some(String::from_utf8_lossy(&self.buf).into_owned())
            }
            Err(err) => {
                tracing::warn!(error = %err, "console stream read failed");
                self.done = true;
                None
            }
        }
    }
}
