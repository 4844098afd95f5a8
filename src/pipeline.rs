use bytes::BytesMut;
use tracing::debug;

use crate::error::RedlineResult;
use crate::pool::PooledConnection;
use crate::resp::{RespValue, command_line, write_command};

/// Batches commands client-side and sends them in a single write.
///
/// Replies come back in submission order, one per command. Server error
/// replies stay in their slot as [`RespValue::Error`] so that the count of
/// replies read always matches the count of commands written.
#[derive(Debug)]
pub struct Pipeline {
    conn: PooledConnection,
    buffer: BytesMut,
    queued: usize,
}

impl Pipeline {
    pub(crate) fn new(conn: PooledConnection) -> Self {
        Pipeline {
            conn,
            buffer: BytesMut::new(),
            queued: 0,
        }
    }

    /// Buffers one command. Nothing is sent until [`Pipeline::execute`].
    pub fn add_command<A: AsRef<[u8]>>(&mut self, name: &str, args: &[A]) -> &mut Self {
        write_command(&command_line(name, args), &mut self.buffer);
        self.queued += 1;
        self
    }

    /// Number of buffered commands.
    pub fn len(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Flushes every buffered command at once, then reads exactly as many
    /// replies. The buffer is empty afterwards, so the pipeline can be reused.
    pub async fn execute(&mut self) -> RedlineResult<Vec<RespValue>> {
        if self.queued == 0 {
            return Ok(Vec::new());
        }

        let frames = self.buffer.split();
        let count = std::mem::take(&mut self.queued);
        debug!("Flushing pipeline of {count} commands ({} bytes)", frames.len());

        self.conn.write_frames(&frames, count).await?;

        let mut replies = Vec::with_capacity(count);
        for _ in 0..count {
            replies.push(self.conn.read_reply().await?);
        }
        Ok(replies)
    }

    /// Returns the connection to the pool without sending anything.
    pub fn close(self) {
        self.conn.release();
    }
}
