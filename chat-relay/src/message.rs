//! Newline-delimited text protocol spoken between the relay and its clients.
//!
//! Inbound lines are classified into a [`Command`]; everything the relay sends is
//! described by a [`Message`] and rendered to a single line by [`Message::render`].

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub const EXIT: &str = "exit";
pub const INVITE_PREFIX: &str = "_createmessageroom_";
pub const PRIVATE_MARKER: &str = "_pm";
pub const PRIVATE_DELIMITER: char = '_';
pub const POPUP_PREFIX: &str = "_privatechatpopup_";
pub const USER_NOT_FOUND: &str = "_usernotfound_";
pub const SELF_INVITE: &str = "Cannot start a private chat with yourself.";

/// A single inbound line after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Invite { target: String },
    PrivateMessage { target: String, body: String },
    Chat { body: String },
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        if line == EXIT {
            return Ok(Self::Exit);
        }

        if let Some(target) = line.strip_prefix(INVITE_PREFIX) {
            return Ok(Self::Invite {
                target: target.to_string(),
            });
        }

        if line.contains(PRIVATE_MARKER) {
            // The marker is assumed to lead the frame: drop three characters, whatever they are.
            let rest = line
                .char_indices()
                .nth(PRIVATE_MARKER.len())
                .map_or("", |(index, _)| &line[index..]);
            let (target, body) = rest
                .split_once(PRIVATE_DELIMITER)
                .ok_or(FrameError::MissingDelimiter)?;
            return Ok(Self::PrivateMessage {
                target: target.to_string(),
                body: body.to_string(),
            });
        }

        Ok(Self::Chat {
            body: line.to_string(),
        })
    }
}

/// Everything the relay can deliver to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Broadcast { sender: String, body: String },
    Echo { sender: String, body: String },
    Invite { requester: String, target: String },
    PrivateMessage { target: String, body: String },
    SystemNotice { body: String },
}

impl Message {
    /// Wire form of the message, without the trailing newline.
    pub fn render(&self) -> String {
        match self {
            Self::Broadcast { sender, body } | Self::Echo { sender, body } => {
                format!("{sender}: {body}")
            }
            Self::Invite { requester, .. } => format!("{POPUP_PREFIX}{requester}"),
            Self::PrivateMessage { body, .. } => body.clone(),
            Self::SystemNotice { body } => body.clone(),
        }
    }
}

pub fn joined_notice(name: &str) -> String {
    format!("{name} has joined the chatroom")
}

pub fn left_notice(name: &str) -> String {
    format!("{name} left the chat room.")
}

pub fn renamed_notice(name: &str) -> String {
    format!("Screen name already exists, updated to {name}")
}

/// Reads one line, stripping the terminator. Returns `None` at end of stream.
///
/// Empty lines are returned as-is: they are valid (empty) chat text. Bytes that are not
/// valid UTF-8 are replaced with U+FFFD rather than failing the read.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes = reader.read_until(b'\n', &mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Flush per line so peers see each frame as soon as it is produced.
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
