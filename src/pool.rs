//! Bounded pool of reusable server connections.
//!
//! The pool state (idle stack and leased count) sits behind one mutex that is
//! only held to move a connection in or out of the idle stack and adjust the
//! counter. Dialing, stale eviction and all reads and writes happen with the
//! lock released, on a connection the caller owns exclusively.
//!
//! Acquiring never waits: once `max_open` connections are leased out and none
//! are idle, `acquire` fails with `PoolExhausted` and the caller decides
//! whether to retry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::error::{RedlineError, RedlineResult};
use crate::idle::IdleStack;
use crate::resp::RespValue;

#[derive(Debug)]
struct PoolState {
    idle: IdleStack<Connection>,
    /// Connections currently leased out.
    in_use: usize,
}

#[derive(Debug)]
struct PoolShared {
    config: Config,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Critical sections never leave the state half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.lock();
        state.idle.push(conn);
        state.in_use = state.in_use.saturating_sub(1);
    }

    fn release_slot(&self) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
    }
}

/// Snapshot of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use: usize,
    pub idle: usize,
    pub max_open: usize,
}

/// A leased-count slot claimed by `acquire`. Given back on drop unless the
/// lease it was claimed for was handed out, so a cancelled or failed dial
/// never leaks it.
struct SlotReservation<'a> {
    pool: &'a PoolShared,
    kept: bool,
}

impl<'a> SlotReservation<'a> {
    fn new(pool: &'a PoolShared) -> Self {
        SlotReservation { pool, kept: false }
    }

    /// The slot now belongs to a `PooledConnection`.
    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.pool.release_slot();
        }
    }
}

/// What `acquire` took out of the shared state.
enum Checkout {
    Idle(Connection),
    NewSlot,
}

/// Connection pool handle. Clones share the same pool.
#[derive(Debug, Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    pub fn new(config: Config) -> Self {
        Pool {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState {
                    idle: IdleStack::new(),
                    in_use: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Leases a connection: the most recently released idle one if it is
    /// still fresh, otherwise a newly dialed one.
    pub async fn acquire(&self) -> RedlineResult<PooledConnection> {
        let max_open = self.shared.config.max_open;
        let checkout = {
            let mut state = self.shared.lock();
            match state.idle.pop() {
                Some(conn) => {
                    state.in_use += 1;
                    Checkout::Idle(conn)
                }
                None if state.in_use < max_open => {
                    state.in_use += 1;
                    Checkout::NewSlot
                }
                None => {
                    warn!("Connection pool exhausted ({max_open} connections in use)");
                    return Err(RedlineError::PoolExhausted { max_open });
                }
            }
        };
        let slot = SlotReservation::new(&self.shared);

        let conn = match checkout {
            Checkout::Idle(conn) if !conn.is_stale(self.shared.config.conn_lifetime) => {
                debug!("Reusing idle connection ({:?} old)", conn.age());
                conn
            }
            Checkout::Idle(stale) => {
                // The stale connection's slot carries over to its replacement.
                debug!("Evicting stale connection ({:?} old)", stale.age());
                drop(stale);
                self.dial().await?
            }
            Checkout::NewSlot => self.dial().await?,
        };

        slot.keep();
        Ok(PooledConnection {
            pool: self.shared.clone(),
            conn: Some(conn),
            broken: false,
            pending_replies: 0,
        })
    }

    /// Returns a leased connection to the pool it was acquired from.
    ///
    /// Equivalent to dropping the lease.
    pub fn release(&self, conn: PooledConnection) {
        debug_assert!(
            Arc::ptr_eq(&self.shared, &conn.pool),
            "connection released to a pool it was not acquired from"
        );
        drop(conn);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            in_use: state.in_use,
            idle: state.idle.len(),
            max_open: self.shared.config.max_open,
        }
    }

    async fn dial(&self) -> RedlineResult<Connection> {
        match Connection::connect(&self.shared.config).await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                warn!("Failed to connect to {}: {e}", self.shared.config.addr());
                Err(e)
            }
        }
    }
}

/// Exclusive lease on one pooled connection.
///
/// Dropping the lease hands the connection back exactly once. A lease that
/// saw an I/O or protocol failure, that was explicitly discarded, or that is
/// still owed replies (a caller's future was dropped mid-exchange) closes its
/// socket and frees its slot instead of rejoining the idle stack.
#[derive(Debug)]
pub struct PooledConnection {
    pool: Arc<PoolShared>,
    conn: Option<Connection>,
    broken: bool,
    /// Replies written for but not yet read.
    pending_replies: usize,
}

impl PooledConnection {
    /// The connection is only taken out by `Drop`, so `ConnectionClosed`
    /// here never reaches callers holding a live lease.
    fn conn(&mut self) -> RedlineResult<&mut Connection> {
        self.conn.as_mut().ok_or(RedlineError::ConnectionClosed)
    }

    fn track<T>(&mut self, result: RedlineResult<T>) -> RedlineResult<T> {
        if let Err(e) = &result {
            if e.is_connection_fatal() {
                self.broken = true;
            }
        }
        result
    }

    pub async fn write_command<A: AsRef<[u8]>>(&mut self, args: &[A]) -> RedlineResult<()> {
        self.pending_replies += 1;
        let result = self.conn()?.write_command(args).await;
        self.track(result)
    }

    /// Sends pre-encoded frames that the server will answer with `replies`
    /// replies.
    pub async fn write_frames(&mut self, frames: &[u8], replies: usize) -> RedlineResult<()> {
        self.pending_replies += replies;
        let result = self.conn()?.write_frames(frames).await;
        self.track(result)
    }

    /// Reads one reply. Push frames on a subscribed connection arrive
    /// unrequested, so the owed count never drops below zero.
    pub async fn read_reply(&mut self) -> RedlineResult<RespValue> {
        let result = self.conn()?.read_reply().await;
        if result.is_ok() {
            self.pending_replies = self.pending_replies.saturating_sub(1);
        }
        self.track(result)
    }

    /// Sends one command and reads its reply. Error replies are returned as
    /// values; see [`RespValue::into_result`].
    pub async fn execute<A: AsRef<[u8]>>(&mut self, args: &[A]) -> RedlineResult<RespValue> {
        self.write_command(args).await?;
        self.read_reply().await
    }

    /// Marks the connection as unfit for reuse; it is closed on release.
    pub fn discard(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.broken || self.pending_replies > 0 {
            warn!("Discarding connection instead of returning it to the pool");
            drop(conn);
            self.pool.release_slot();
        } else {
            self.pool.return_connection(conn);
        }
    }
}
