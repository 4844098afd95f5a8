use crate::client::Client;
use crate::command::{reply_to_array, reply_to_bytes, reply_to_i64, reply_to_ok};
use crate::error::{RedlineError, RedlineResult};

impl Client {
    /// Value of `key`, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> RedlineResult<Option<Vec<u8>>> {
        reply_to_bytes(self.execute(&["GET", key]).await?)
    }

    /// Sets `key` to `value`, dropping any previous TTL.
    pub async fn set(&self, key: &str, value: impl AsRef<[u8]>) -> RedlineResult<()> {
        let args: [&[u8]; 3] = [b"SET", key.as_bytes(), value.as_ref()];
        reply_to_ok(self.execute(&args).await?)
    }

    /// Values of `keys` in order; missing or non-string keys come back as `None`.
    pub async fn mget(&self, keys: &[&str]) -> RedlineResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = Vec::with_capacity(keys.len() + 1);
        args.push("MGET");
        args.extend_from_slice(keys);

        reply_to_array(self.execute(&args).await?)?
            .into_iter()
            .map(reply_to_bytes)
            .collect()
    }

    pub async fn mset<V: AsRef<[u8]>>(&self, pairs: &[(&str, V)]) -> RedlineResult<()> {
        if pairs.is_empty() {
            return Err(RedlineError::InvalidArgument(
                "MSET needs at least one key/value pair".into(),
            ));
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(pairs.len() * 2 + 1);
        args.push(b"MSET");
        for (key, value) in pairs {
            args.push(key.as_bytes());
            args.push(value.as_ref());
        }
        reply_to_ok(self.execute(&args).await?)
    }

    pub async fn incr(&self, key: &str) -> RedlineResult<i64> {
        reply_to_i64(self.execute(&["INCR", key]).await?)
    }

    pub async fn incr_by(&self, key: &str, increment: i64) -> RedlineResult<i64> {
        let increment = increment.to_string();
        reply_to_i64(self.execute(&["INCRBY", key, &increment]).await?)
    }

    /// The server answers INCRBYFLOAT with the new value as a bulk string.
    pub async fn incr_by_float(&self, key: &str, increment: f64) -> RedlineResult<f64> {
        if !increment.is_finite() {
            return Err(RedlineError::InvalidArgument(format!(
                "increment must be finite, got {increment}"
            )));
        }
        let increment = increment.to_string();
        let reply = self.execute(&["INCRBYFLOAT", key, &increment]).await?;

        let parsed = reply
            .to_string_lossy()
            .and_then(|s| s.parse::<f64>().ok());
        match parsed {
            Some(value) => Ok(value),
            None => Err(RedlineError::UnexpectedReply(reply)),
        }
    }
}
