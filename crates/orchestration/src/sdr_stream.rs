//! A [`RequestStream`] backed by a real TCP connection to the SDR
//! daemon's control port: one JSON document per line, matching the
//! teacher's line-oriented framing over its UDP/TCP transports.

use std::io;

use sdr_client::RequestStream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::ToSocketAddrs;

pub struct TcpControlStream {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TcpControlStream {
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }
}

impl RequestStream for TcpControlStream {
    async fn send(&mut self, mut line: String) -> Result<(), io::Error> {
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }

    async fn read(&mut self) -> Result<String, io::Error> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "sdr control connection closed"));
        }
        Ok(line.trim_end().to_string())
    }
}
