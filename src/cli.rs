//! Line handling for `redline-cli`: tokenising input and rendering replies.

use crate::error::{RedlineError, RedlineResult};
use crate::resp::RespValue;

/// What one input line asks the CLI to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    /// Blank line.
    Skip,
    Quit,
    /// SUBSCRIBE or PSUBSCRIBE; switches the CLI to streaming mode.
    Subscribe { patterns: bool, targets: Vec<String> },
    Command(Vec<String>),
}

pub fn parse_line(line: &str) -> RedlineResult<CliAction> {
    let tokens = split_command_line(line)?;
    let Some(name) = tokens.first() else {
        return Ok(CliAction::Skip);
    };

    let action = match name.to_ascii_uppercase().as_str() {
        "QUIT" | "EXIT" => CliAction::Quit,
        cmd @ ("SUBSCRIBE" | "PSUBSCRIBE") => {
            if tokens.len() < 2 {
                return Err(RedlineError::InvalidArgument(format!(
                    "wrong number of arguments for '{}'",
                    cmd.to_ascii_lowercase()
                )));
            }
            CliAction::Subscribe {
                patterns: cmd == "PSUBSCRIBE",
                targets: tokens[1..].to_vec(),
            }
        }
        _ => CliAction::Command(tokens),
    };
    Ok(action)
}

/// Split a command line into arguments.
///
/// Arguments are separated by whitespace. Double quotes group an argument
/// and understand `\"`, `\\`, `\n`, `\r`, `\t`; single quotes group an
/// argument verbatim. `""` is an empty argument.
pub fn split_command_line(line: &str) -> RedlineResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // A quoted empty string still yields a token.
    let mut has_token = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                has_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => current.push('\n'),
                            Some('r') => current.push('\r'),
                            Some('t') => current.push('\t'),
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(unbalanced()),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unbalanced()),
                    }
                }
            }
            '\'' => {
                has_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(unbalanced()),
                    }
                }
            }
            c if c.is_whitespace() => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                has_token = true;
                current.push(c);
            }
        }
    }

    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn unbalanced() -> RedlineError {
    RedlineError::InvalidArgument("unbalanced quotes".into())
}

/// Render a reply the way redis-cli does. The result ends with a newline.
pub fn format_reply(value: &RespValue) -> String {
    let mut out = String::new();
    write_reply(value, 0, &mut out);
    out
}

fn write_reply(value: &RespValue, indent: usize, out: &mut String) {
    match value {
        RespValue::SimpleString(s) => out.push_str(s),
        RespValue::Error(s) => {
            out.push_str("(error) ");
            out.push_str(s);
        }
        RespValue::Integer(n) => out.push_str(&format!("(integer) {n}")),
        RespValue::BulkString(None) | RespValue::Array(None) => out.push_str("(nil)"),
        RespValue::BulkString(Some(data)) => {
            out.push_str(&format!("{:?}", String::from_utf8_lossy(data)));
        }
        RespValue::Array(Some(items)) if items.is_empty() => out.push_str("(empty array)"),
        RespValue::Array(Some(items)) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&" ".repeat(indent));
                }
                let label = format!("{}) ", i + 1);
                out.push_str(&label);
                // Nested arrays line up under their first element.
                write_reply(item, indent + label.len(), out);
            }
            return;
        }
    }
    out.push('\n');
}
