use crate::config::Config;
use crate::error::{RedlineError, RedlineResult};
use crate::pipeline::Pipeline;
use crate::pool::Pool;
use crate::pubsub::PubSub;
use crate::resp::RespValue;
use crate::transaction::Transaction;

/// Entry point for callers: runs single commands on pooled connections and
/// opens sessions that hold one connection for longer.
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct Client {
    pool: Pool,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Client {
            pool: Pool::new(config),
        }
    }

    /// Client for `host:port` with every other option at its default.
    pub fn with_addr(host: impl Into<String>, port: u16) -> Self {
        Self::new(Config {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Leases a connection, sends one command, reads one reply and returns
    /// the connection. A server error reply comes back as
    /// [`RedlineError::Server`].
    pub async fn execute<A: AsRef<[u8]>>(&self, args: &[A]) -> RedlineResult<RespValue> {
        if args.is_empty() {
            return Err(RedlineError::InvalidArgument("empty command".into()));
        }

        let mut conn = self.pool.acquire().await?;
        let reply = conn.execute(args).await?;
        self.pool.release(conn);
        reply.into_result()
    }

    pub async fn pipeline(&self) -> RedlineResult<Pipeline> {
        Ok(Pipeline::new(self.pool.acquire().await?))
    }

    pub async fn transaction(&self) -> RedlineResult<Transaction> {
        Ok(Transaction::new(self.pool.acquire().await?))
    }

    pub async fn pubsub(&self) -> RedlineResult<PubSub> {
        Ok(PubSub::new(self.pool.acquire().await?))
    }
}
