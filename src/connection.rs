use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{RedlineError, RedlineResult};
use crate::resp::{RespError, RespParser, RespValue, write_command};

/// One TCP connection to the server plus the bytes read but not yet decoded.
///
/// The socket is closed when the value is dropped.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    /// Decode progress through the front of `read_buf`.
    parser: RespParser,
    write_buf: BytesMut,
    created_at: Instant,
}

impl Connection {
    /// Dials the configured server and selects the configured database.
    pub async fn connect(config: &Config) -> RedlineResult<Self> {
        let addr = config.addr();
        let stream = TcpStream::connect(&addr).await?;
        // Small command frames; don't let Nagle hold them back.
        stream.set_nodelay(true)?;
        debug!("Connected to {addr}");

        let mut conn = Connection {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            parser: RespParser::new(),
            write_buf: BytesMut::with_capacity(256),
            created_at: Instant::now(),
        };

        if let Some(db) = config.database {
            let db = db.to_string();
            conn.execute(&["SELECT", db.as_str()]).await?.into_result()?;
        }

        Ok(conn)
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Age-based liveness heuristic; says nothing about the peer's state.
    pub fn is_stale(&self, lifetime: Duration) -> bool {
        self.age() >= lifetime
    }

    /// Encodes and sends one command.
    pub async fn write_command<A: AsRef<[u8]>>(&mut self, args: &[A]) -> RedlineResult<()> {
        self.write_buf.clear();
        write_command(args, &mut self.write_buf);
        trace!("-> {} byte command", self.write_buf.len());
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Sends pre-encoded frames in a single write.
    pub async fn write_frames(&mut self, frames: &[u8]) -> RedlineResult<()> {
        trace!("-> {} bytes of frames", frames.len());
        self.stream.write_all(frames).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads exactly one reply frame, waiting for more bytes as needed.
    pub async fn read_reply(&mut self) -> RedlineResult<RespValue> {
        loop {
            if let Some(value) = self.parser.parse(&mut self.read_buf)? {
                trace!("<- {value:?}");
                return Ok(value);
            }

            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                if self.read_buf.is_empty() {
                    return Err(RedlineError::ConnectionClosed);
                }
                return Err(RespError::Truncated(self.read_buf.len()).into());
            }
        }
    }

    /// One command, one reply. Error replies are returned as values.
    pub async fn execute<A: AsRef<[u8]>>(&mut self, args: &[A]) -> RedlineResult<RespValue> {
        self.write_command(args).await?;
        self.read_reply().await
    }
}
