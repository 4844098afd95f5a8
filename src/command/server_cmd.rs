use crate::client::Client;
use crate::command::{reply_to_bytes, reply_to_i64, reply_to_string};
use crate::error::{RedlineError, RedlineResult};
use crate::resp::RespValue;

impl Client {
    /// Round-trips a PING; returns the server's status text (normally "PONG").
    pub async fn ping(&self) -> RedlineResult<String> {
        reply_to_string(self.execute(&["PING"]).await?)
    }

    pub async fn echo(&self, message: impl AsRef<[u8]>) -> RedlineResult<Vec<u8>> {
        let args: [&[u8]; 2] = [b"ECHO", message.as_ref()];
        let reply = self.execute(&args).await?;
        match reply_to_bytes(reply)? {
            Some(data) => Ok(data),
            None => Err(RedlineError::UnexpectedReply(RespValue::null_bulk_string())),
        }
    }

    /// Publishes `message` on `channel`, returning how many subscribers got it.
    pub async fn publish(&self, channel: &str, message: impl AsRef<[u8]>) -> RedlineResult<i64> {
        let args: [&[u8]; 3] = [b"PUBLISH", channel.as_bytes(), message.as_ref()];
        reply_to_i64(self.execute(&args).await?)
    }
}
