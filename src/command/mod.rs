//! Typed call-throughs on [`Client`](crate::Client), one method per command.
//!
//! Each method builds one argument list, runs it with `Client::execute` and
//! converts the reply. Replies of the wrong shape surface as
//! [`RedlineError::UnexpectedReply`].

pub mod key;
pub mod server_cmd;
pub mod string;

pub use key::Ttl;

use crate::error::{RedlineError, RedlineResult};
use crate::resp::RespValue;

pub(crate) fn reply_to_i64(reply: RespValue) -> RedlineResult<i64> {
    match reply {
        RespValue::Integer(n) => Ok(n),
        other => Err(RedlineError::UnexpectedReply(other)),
    }
}

pub(crate) fn reply_to_bool(reply: RespValue) -> RedlineResult<bool> {
    reply_to_i64(reply).map(|n| n == 1)
}

/// `+OK`, the only status most write commands answer with.
pub(crate) fn reply_to_ok(reply: RespValue) -> RedlineResult<()> {
    match reply {
        RespValue::SimpleString(s) if s == "OK" => Ok(()),
        other => Err(RedlineError::UnexpectedReply(other)),
    }
}

/// A bulk string, or `None` for the null bulk string.
pub(crate) fn reply_to_bytes(reply: RespValue) -> RedlineResult<Option<Vec<u8>>> {
    match reply {
        RespValue::BulkString(data) => Ok(data),
        other => Err(RedlineError::UnexpectedReply(other)),
    }
}

pub(crate) fn reply_to_string(reply: RespValue) -> RedlineResult<String> {
    match reply.to_string_lossy() {
        Some(s) => Ok(s),
        None => Err(RedlineError::UnexpectedReply(reply)),
    }
}

/// Array items; a null array reads as empty.
pub(crate) fn reply_to_array(reply: RespValue) -> RedlineResult<Vec<RespValue>> {
    match reply {
        RespValue::Array(items) => Ok(items.unwrap_or_default()),
        other => Err(RedlineError::UnexpectedReply(other)),
    }
}

pub(crate) fn reply_to_strings(reply: RespValue) -> RedlineResult<Vec<String>> {
    reply_to_array(reply)?
        .into_iter()
        .map(reply_to_string)
        .collect()
}
