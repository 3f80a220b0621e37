use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Error, Debug)]
pub enum ConnError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Connection closed after {received} of {expected} bytes")]
    ShortRead { expected: usize, received: usize },
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// A TCP connection that reads through an internal buffer and bounds every
/// read and write by a fixed I/O timeout.
pub struct BufferedConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
    temp_buffer: Vec<u8>,
    io_timeout: Duration,
}

impl BufferedConnection {
    pub fn new(stream: TcpStream, buffer_size: usize, io_timeout: Duration) -> Self {
        BufferedConnection {
            stream,
            read_buffer: Vec::with_capacity(buffer_size),
            temp_buffer: vec![0u8; buffer_size],
            io_timeout,
        }
    }

    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        io_timeout: Duration,
        buffer_size: usize,
    ) -> Result<Self, ConnError> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnError::Timeout(connect_timeout))??;
        stream.set_nodelay(true)?;
        Ok(BufferedConnection::new(stream, buffer_size, io_timeout))
    }

    /// Returns 0 once the peer has closed its write half.
    pub async fn read(&mut self) -> Result<usize, ConnError> {
        let n = timeout(self.io_timeout, self.stream.read(&mut self.temp_buffer))
            .await
            .map_err(|_| ConnError::Timeout(self.io_timeout))??;
        if n > 0 {
            self.read_buffer.extend_from_slice(&self.temp_buffer[..n]);
        }
        Ok(n)
    }

    pub fn read_from_buffer(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.read_buffer.len() >= len {
            Some(self.read_buffer.drain(..len).collect())
        } else {
            None
        }
    }

    pub async fn ensure_bytes(&mut self, n: usize) -> Result<(), ConnError> {
        while self.read_buffer.len() < n {
            if self.read().await? == 0 {
                return Err(ConnError::ShortRead {
                    expected: n,
                    received: self.read_buffer.len(),
                });
            }
        }
        Ok(())
    }

    pub async fn read_exact_bytes(&mut self, n: usize) -> Result<Vec<u8>, ConnError> {
        self.ensure_bytes(n).await?;
        self.read_from_buffer(n).ok_or(ConnError::ShortRead {
            expected: n,
            received: self.read_buffer.len(),
        })
    }

    pub async fn read_u8(&mut self) -> Result<u8, ConnError> {
        Ok(self.read_exact_bytes(1).await?[0])
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), ConnError> {
        timeout(self.io_timeout, self.stream.write_all(data))
            .await
            .map_err(|_| ConnError::Timeout(self.io_timeout))??;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ConnError> {
        timeout(self.io_timeout, self.stream.shutdown())
            .await
            .map_err(|_| ConnError::Timeout(self.io_timeout))??;
        Ok(())
    }

    #[cfg(test)]
    pub fn buffer_len(&self) -> usize {
        self.read_buffer.len()
    }
}
