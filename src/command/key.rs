use std::time::Duration;

use crate::client::Client;
use crate::command::{reply_to_bool, reply_to_i64, reply_to_string, reply_to_strings};
use crate::error::{RedlineError, RedlineResult};
use crate::resp::RespValue;

/// Remaining time to live of a key, as reported by TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist.
    Missing,
    /// The key exists but has no expiry.
    NoExpiry,
    ExpiresIn(Duration),
}

impl Ttl {
    fn from_reply(seconds: i64) -> RedlineResult<Ttl> {
        match seconds {
            -2 => Ok(Ttl::Missing),
            -1 => Ok(Ttl::NoExpiry),
            n if n >= 0 => Ok(Ttl::ExpiresIn(Duration::from_secs(n as u64))),
            n => Err(RedlineError::UnexpectedReply(RespValue::integer(n))),
        }
    }
}

impl Client {
    /// Removes `keys`, returning how many existed.
    pub async fn del(&self, keys: &[&str]) -> RedlineResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut args = vec!["DEL"];
        args.extend_from_slice(keys);
        reply_to_i64(self.execute(&args).await?)
    }

    /// Number of `keys` that exist; a key named twice counts twice.
    pub async fn exists(&self, keys: &[&str]) -> RedlineResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut args = vec!["EXISTS"];
        args.extend_from_slice(keys);
        reply_to_i64(self.execute(&args).await?)
    }

    /// Sets a timeout on `key` with second granularity. Returns false when
    /// the key does not exist.
    pub async fn expire(&self, key: &str, timeout: Duration) -> RedlineResult<bool> {
        let seconds = timeout.as_secs().to_string();
        reply_to_bool(self.execute(&["EXPIRE", key, &seconds]).await?)
    }

    pub async fn ttl(&self, key: &str) -> RedlineResult<Ttl> {
        Ttl::from_reply(reply_to_i64(self.execute(&["TTL", key]).await?)?)
    }

    /// Every key matching `pattern`. Blocks the server while it walks the
    /// keyspace; prefer [`Client::scan`] on large databases.
    pub async fn keys(&self, pattern: &str) -> RedlineResult<Vec<String>> {
        reply_to_strings(self.execute(&["KEYS", pattern]).await?)
    }

    /// One SCAN step. Returns the next cursor, which is 0 once the
    /// iteration is complete, and the keys from this step.
    pub async fn scan(
        &self,
        cursor: u64,
        pattern: Option<&str>,
        count: Option<u64>,
    ) -> RedlineResult<(u64, Vec<String>)> {
        let cursor = cursor.to_string();
        let count = count.map(|n| n.to_string());
        let mut args = vec!["SCAN", cursor.as_str()];
        if let Some(pattern) = pattern {
            args.extend(["MATCH", pattern]);
        }
        if let Some(count) = &count {
            args.extend(["COUNT", count.as_str()]);
        }

        let [next, keys] = match self.execute(&args).await? {
            RespValue::Array(Some(items)) => <[RespValue; 2]>::try_from(items)
                .map_err(|items| RedlineError::UnexpectedReply(RespValue::array(items)))?,
            other => return Err(RedlineError::UnexpectedReply(other)),
        };
        let next = reply_to_string(next)?;
        let next = next
            .parse::<u64>()
            .map_err(|_| RedlineError::UnexpectedReply(RespValue::bulk_string(next)))?;
        Ok((next, reply_to_strings(keys)?))
    }
}
