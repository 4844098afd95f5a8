use tracing::debug;

use crate::error::{RedlineError, RedlineResult};
use crate::pool::PooledConnection;
use crate::resp::{RespValue, command_line};

/// Where the server-side MULTI state of the session's connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// No watched keys, no MULTI issued.
    Idle,
    /// WATCH issued, no MULTI yet.
    Watching,
    /// MULTI issued; commands are being queued server-side.
    Queuing,
}

impl TxState {
    fn on_watch(self) -> RedlineResult<TxState> {
        match self {
            TxState::Queuing => Err(RedlineError::InvalidArgument(
                "WATCH inside MULTI is not allowed".into(),
            )),
            _ => Ok(TxState::Watching),
        }
    }

    fn on_unwatch(self) -> RedlineResult<TxState> {
        match self {
            TxState::Queuing => Err(RedlineError::InvalidArgument(
                "UNWATCH inside MULTI would only be queued".into(),
            )),
            _ => Ok(TxState::Idle),
        }
    }

    fn needs_multi(self) -> bool {
        self != TxState::Queuing
    }

    /// The command that returns the connection to `Idle`, if any is needed.
    fn reset_command(self) -> Option<&'static str> {
        match self {
            TxState::Idle => None,
            TxState::Watching => Some("UNWATCH"),
            TxState::Queuing => Some("DISCARD"),
        }
    }
}

/// MULTI/EXEC transaction on one leased connection.
///
/// MULTI is sent lazily by the first queued command. Watched keys and the
/// queued commands are tied to this connection, so the same lease is used
/// from the first WATCH to EXEC or DISCARD. A transaction dropped before
/// reaching `Idle` again closes its connection rather than pooling it.
#[derive(Debug)]
pub struct Transaction {
    conn: PooledConnection,
    state: TxState,
}

impl Transaction {
    pub(crate) fn new(conn: PooledConnection) -> Self {
        Transaction {
            conn,
            state: TxState::Idle,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Watches keys for optimistic locking. Must precede the first queued
    /// command.
    pub async fn watch<A: AsRef<[u8]>>(&mut self, keys: &[A]) -> RedlineResult<()> {
        if keys.is_empty() {
            return Err(RedlineError::InvalidArgument(
                "WATCH needs at least one key".into(),
            ));
        }
        let next = self.state.on_watch()?;
        self.conn
            .execute(&command_line("WATCH", keys))
            .await?
            .into_result()?;
        self.state = next;
        Ok(())
    }

    pub async fn unwatch(&mut self) -> RedlineResult<()> {
        let next = self.state.on_unwatch()?;
        self.conn.execute(&["UNWATCH"]).await?.into_result()?;
        self.state = next;
        Ok(())
    }

    /// Queues one command, opening the MULTI block first if needed. The
    /// reply read here is the queuing acknowledgment, not the result.
    pub async fn add_command<A: AsRef<[u8]>>(&mut self, name: &str, args: &[A]) -> RedlineResult<()> {
        self.begin().await?;
        self.conn
            .execute(&command_line(name, args))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Runs the queued commands and returns their results in queue order.
    ///
    /// Returns [`RedlineError::TxAborted`] when a watched key changed, in
    /// which case none of the queued commands took effect.
    pub async fn exec(&mut self) -> RedlineResult<Vec<RespValue>> {
        self.begin().await?;
        let reply = self.conn.execute(&["EXEC"]).await?;
        // EXEC always ends the MULTI block and clears watched keys.
        self.state = TxState::Idle;

        match reply.into_result()? {
            RespValue::Array(Some(results)) => Ok(results),
            RespValue::Array(None) => {
                debug!("Transaction aborted by a watched key");
                Err(RedlineError::TxAborted)
            }
            other => Err(RedlineError::UnexpectedReply(other)),
        }
    }

    /// Drops queued commands and watched keys.
    pub async fn discard(&mut self) -> RedlineResult<()> {
        if let Some(command) = self.state.reset_command() {
            self.conn.execute(&[command]).await?.into_result()?;
        }
        self.state = TxState::Idle;
        Ok(())
    }

    /// Releases the connection. Same as dropping the transaction.
    pub fn close(self) {
        drop(self);
    }

    async fn begin(&mut self) -> RedlineResult<()> {
        if self.state.needs_multi() {
            self.conn.execute(&["MULTI"]).await?.into_result()?;
            self.state = TxState::Queuing;
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state != TxState::Idle {
            debug!("Transaction closed while {:?}, closing its connection", self.state);
            self.conn.discard();
        }
    }
}
