use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

use crate::error::{RedlineError, RedlineResult};
use crate::pool::PooledConnection;
use crate::resp::{RespValue, command_line};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
    Message,
    PMessage,
}

impl MessageKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "subscribe" => Some(MessageKind::Subscribe),
            "unsubscribe" => Some(MessageKind::Unsubscribe),
            "psubscribe" => Some(MessageKind::PSubscribe),
            "punsubscribe" => Some(MessageKind::PUnsubscribe),
            "message" => Some(MessageKind::Message),
            "pmessage" => Some(MessageKind::PMessage),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Subscribe => "subscribe",
            MessageKind::Unsubscribe => "unsubscribe",
            MessageKind::PSubscribe => "psubscribe",
            MessageKind::PUnsubscribe => "punsubscribe",
            MessageKind::Message => "message",
            MessageKind::PMessage => "pmessage",
        }
    }

    /// Acknowledgment of a (P)SUBSCRIBE or (P)UNSUBSCRIBE.
    pub fn is_ack(&self) -> bool {
        !matches!(self, MessageKind::Message | MessageKind::PMessage)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame pushed by the server to a subscribed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    /// Channel (or, for pattern acks, the pattern) the frame is about.
    pub channel: String,
    /// Matching pattern, for `pmessage` frames only.
    pub pattern: Option<String>,
    /// Published payload, for `message` and `pmessage` frames.
    pub payload: Option<Vec<u8>>,
}

impl Message {
    /// Classifies a push frame by its first element.
    ///
    /// Returns the message and, for acknowledgments, the subscription count
    /// the server reported with it.
    fn classify(reply: RespValue) -> RedlineResult<(Message, Option<i64>)> {
        let items = match reply.into_result()? {
            RespValue::Array(Some(items)) if !items.is_empty() => items,
            other => return Err(RedlineError::UnexpectedReply(other)),
        };

        let name = items[0].to_string_lossy().unwrap_or_default();
        let kind = MessageKind::from_name(&name).ok_or(RedlineError::UnsupportedMessage(name))?;
        let text = |i: usize| items.get(i).and_then(RespValue::to_string_lossy);
        let bytes = |i: usize| items.get(i).and_then(RespValue::as_bytes).map(<[u8]>::to_vec);

        let parsed = match kind {
            MessageKind::Message => match (text(1), bytes(2)) {
                (Some(channel), Some(payload)) => Some((
                    Message {
                        kind,
                        channel,
                        pattern: None,
                        payload: Some(payload),
                    },
                    None,
                )),
                _ => None,
            },
            MessageKind::PMessage => match (text(1), text(2), bytes(3)) {
                (Some(pattern), Some(channel), Some(payload)) => Some((
                    Message {
                        kind,
                        channel,
                        pattern: Some(pattern),
                        payload: Some(payload),
                    },
                    None,
                )),
                _ => None,
            },
            // Unsubscribing while subscribed to nothing acks a null channel.
            _ => items.get(2).and_then(RespValue::as_integer).map(|count| {
                (
                    Message {
                        kind,
                        channel: text(1).unwrap_or_default(),
                        pattern: None,
                        payload: None,
                    },
                    Some(count),
                )
            }),
        };

        parsed.ok_or_else(|| RedlineError::UnexpectedReply(RespValue::Array(Some(items.clone()))))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Channel: {}", self.channel)?;
        writeln!(f, "Kind: {}", self.kind)?;
        if let Some(pattern) = &self.pattern {
            writeln!(f, "Pattern: {pattern}")?;
        }
        match &self.payload {
            Some(payload) => writeln!(f, "Payload: {}", String::from_utf8_lossy(payload)),
            None => writeln!(f, "Payload:"),
        }
    }
}

/// Acknowledgments owed by one (un)subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckBatch {
    /// One per named channel or pattern.
    Named(usize),
    /// An unsubscribe from every channel (or every pattern). It is answered
    /// with one ack per subscription of that kind, or a single ack when
    /// there are none. The count is fixed once its first ack arrives, when
    /// every earlier call has been answered.
    All { patterns: bool, left: Option<usize> },
}

/// Subscription bookkeeping driven by the acknowledgments read so far.
#[derive(Debug, Default)]
struct AckLedger {
    owed: VecDeque<AckBatch>,
    channels: i64,
    patterns: i64,
}

impl AckLedger {
    fn expect(&mut self, batch: AckBatch) {
        self.owed.push_back(batch);
    }

    /// Applies one acknowledgment and the total count the server sent with it.
    fn record(&mut self, kind: MessageKind, count: i64) {
        if let Some(batch) = self.owed.front_mut() {
            let left = match batch {
                AckBatch::Named(left) => left,
                AckBatch::All { patterns, left } => {
                    let current = if *patterns { self.patterns } else { self.channels };
                    left.get_or_insert(current.max(1) as usize)
                }
            };
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.owed.pop_front();
            }
        }

        // Each ack changes the count of its own kind only.
        let delta = count - (self.channels + self.patterns);
        if matches!(kind, MessageKind::PSubscribe | MessageKind::PUnsubscribe) {
            self.patterns = (self.patterns + delta).max(0);
        } else {
            self.channels = (self.channels + delta).max(0);
        }
    }

    fn subscriptions(&self) -> i64 {
        self.channels + self.patterns
    }

    /// No acks owed and nothing subscribed: the connection is back in
    /// ordinary request/reply mode.
    fn is_neutral(&self) -> bool {
        self.owed.is_empty() && self.subscriptions() == 0
    }
}

/// Publish/subscribe session on one leased connection.
///
/// After a subscribe call the connection only carries push frames, which
/// [`PubSub::receive`] decodes one at a time. Acknowledgments for
/// (un)subscribe calls arrive through `receive` too. The session returns its
/// connection to the pool only when every acknowledgment has been read and
/// the server reported zero remaining subscriptions; otherwise the
/// connection is closed on release.
#[derive(Debug)]
pub struct PubSub {
    conn: PooledConnection,
    acks: AckLedger,
}

impl PubSub {
    pub(crate) fn new(conn: PooledConnection) -> Self {
        PubSub {
            conn,
            acks: AckLedger::default(),
        }
    }

    /// Whether the connection may still be in subscribe mode.
    pub fn is_subscribed(&self) -> bool {
        !self.acks.is_neutral()
    }

    /// Subscription count from the latest acknowledgment.
    pub fn subscriptions(&self) -> i64 {
        self.acks.subscriptions()
    }

    /// Publishes a message, returning how many subscribers received it.
    ///
    /// Only valid while not subscribed: a subscribed connection interleaves
    /// push frames with replies.
    pub async fn publish(&mut self, channel: &str, message: impl AsRef<[u8]>) -> RedlineResult<i64> {
        if self.is_subscribed() {
            return Err(RedlineError::InvalidArgument(
                "PUBLISH on a subscribed connection; publish from another session".into(),
            ));
        }

        let args: [&[u8]; 3] = [b"PUBLISH", channel.as_bytes(), message.as_ref()];
        match self.conn.execute(&args).await?.into_result()? {
            RespValue::Integer(receivers) => Ok(receivers),
            other => Err(RedlineError::UnexpectedReply(other)),
        }
    }

    pub async fn subscribe<A: AsRef<[u8]>>(&mut self, channels: &[A]) -> RedlineResult<()> {
        self.send_subscription("SUBSCRIBE", channels, None).await
    }

    /// Unsubscribes from the given channels, or from all when empty.
    pub async fn unsubscribe<A: AsRef<[u8]>>(&mut self, channels: &[A]) -> RedlineResult<()> {
        self.send_subscription("UNSUBSCRIBE", channels, Some(false)).await
    }

    pub async fn psubscribe<A: AsRef<[u8]>>(&mut self, patterns: &[A]) -> RedlineResult<()> {
        self.send_subscription("PSUBSCRIBE", patterns, None).await
    }

    /// Unsubscribes from the given patterns, or from all when empty.
    pub async fn punsubscribe<A: AsRef<[u8]>>(&mut self, patterns: &[A]) -> RedlineResult<()> {
        self.send_subscription("PUNSUBSCRIBE", patterns, Some(true)).await
    }

    /// Waits for and decodes the next push frame.
    pub async fn receive(&mut self) -> RedlineResult<Message> {
        let reply = self.conn.read_reply().await?;
        let (message, count) = Message::classify(reply)?;
        if let Some(count) = count {
            self.acks.record(message.kind, count);
        }
        Ok(message)
    }

    /// Releases the connection without unsubscribing.
    pub fn close(self) {
        drop(self);
    }

    /// `all_patterns` is `Some` for unsubscribe calls, where an empty target
    /// list means every channel (`false`) or every pattern (`true`).
    async fn send_subscription<A: AsRef<[u8]>>(
        &mut self,
        command: &str,
        targets: &[A],
        all_patterns: Option<bool>,
    ) -> RedlineResult<()> {
        let batch = match (targets.len(), all_patterns) {
            (0, Some(patterns)) => AckBatch::All { patterns, left: None },
            (0, None) => {
                return Err(RedlineError::InvalidArgument(format!(
                    "{command} needs at least one channel"
                )));
            }
            (n, _) => AckBatch::Named(n),
        };

        self.conn.write_command(&command_line(command, targets)).await?;
        self.acks.expect(batch);
        Ok(())
    }
}

impl Drop for PubSub {
    fn drop(&mut self) {
        if self.is_subscribed() {
            debug!("PubSub closed while subscribed, closing its connection");
            self.conn.discard();
        }
    }
}
