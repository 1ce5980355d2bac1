use std::{io, path::Path};

use anyhow::{anyhow, Result};
use prost::Message;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
};

const MAX_VARINT_LEN: usize = 10;
/// Largest record a reader accepts.
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Appends length-delimited protobuf messages to a byte sink.
pub struct MessageLogWriter<W> {
    inner: W,
}

impl MessageLogWriter<BufWriter<File>> {
    pub async fn append(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| anyhow!("failed to open message log {}: {}", path.display(), e))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: AsyncWrite + Unpin> MessageLogWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write<M: Message>(&mut self, message: &M) -> Result<()> {
        let buf = message.encode_length_delimited_to_vec();
        self.inner.write_all(&buf).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads back what a [`MessageLogWriter`] wrote, one message at a time.
pub struct MessageLogReader<R> {
    inner: R,
}

impl MessageLogReader<BufReader<File>> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .map_err(|e| anyhow!("failed to open message log {}: {}", path.display(), e))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: AsyncRead + Unpin> MessageLogReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns `None` at a clean end of the log.
    pub async fn read<M: Message + Default>(&mut self) -> Result<Option<M>> {
        let Some(len) = self.read_len().await? else {
            return Ok(None);
        };
        if len > MAX_RECORD_LEN {
            return Err(anyhow!(
                "message log record of {} bytes exceeds the {} byte limit",
                len,
                MAX_RECORD_LEN
            ));
        }
        let mut buf = vec![0; len];
        self.inner
            .read_exact(&mut buf)
            .await
            .map_err(|e| anyhow!("truncated message log record: {}", e))?;
        Ok(Some(M::decode(buf.as_slice())?))
    }

    pub async fn read_all<M: Message + Default>(&mut self) -> Result<Vec<M>> {
        let mut messages = vec![];
        while let Some(message) = self.read().await? {
            messages.push(message);
        }
        Ok(messages)
    }

    async fn read_len(&mut self) -> Result<Option<usize>> {
        let mut len = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = match self.inner.read_u8().await {
                Ok(byte) => byte,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && i == 0 => return Ok(None),
                Err(e) => return Err(anyhow!("truncated message log length prefix: {}", e)),
            };
            len |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(Some(usize::try_from(len)?));
            }
        }
        Err(anyhow!("message log length prefix is too long"))
    }
}
