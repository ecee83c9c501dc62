//! Per-connection handler.
//!
//! A session moves through `Handshaking -> Active -> Closed`. The first line names the
//! client; every following line is classified and handed to the [`Router`]. Whatever
//! ends the active loop (`exit`, end of stream, an I/O error or eviction), the session
//! is unregistered and a leave notice goes out before the connection is released.
//!
//! Outbound traffic never touches the socket directly: routers enqueue onto the
//! session's [`Mailbox`] and a writer future owned by the session drains it.

use std::{io, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    message::{Command, joined_notice, left_notice, read_line, renamed_notice, write_line},
    registry::{ConnectionRegistry, Inbox, Mailbox, SessionId, mailbox},
    router::Router,
};

/// Why an active session stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    /// Connection closed before a name was sent; nothing was registered.
    BeforeHandshake,
    Exit,
    EndOfStream,
    Evicted,
}

pub async fn handle_connection(
    stream: TcpStream,
    registry: Arc<ConnectionRegistry>,
    config: Arc<RelayConfig>,
) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    serve(BufReader::new(reader), writer, peer, &registry, &config).await
}

/// Runs one session over an arbitrary buffered reader and writer until it closes.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    peer: Option<SocketAddr>,
    registry: &ConnectionRegistry,
    config: &RelayConfig,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session = registry.next_id();
    let (mailbox, inbox) = mailbox(config.outbound_capacity);
    debug!(?peer, %session, "connected; waiting for screen name");

    let reading = drive(reader, mailbox, session, registry, config);
    let writing = write_outbound(inbox, writer);
    tokio::pin!(reading, writing);

    let (ended, writer_done) = select! {
        ended = &mut reading => (ended, false),
        written = &mut writing => {
            if let Err(error) = written {
                debug!(%session, ?error, "client stopped accepting output");
            }
            (reading.as_mut().await, true)
        }
    };

    match ended {
        Ok(Ended::Evicted) => {
            warn!(?peer, %session, "slow consumer disconnected");
        }
        Ok(reason) => {
            if !writer_done {
                // Every mailbox sender is gone now, so this drains what is queued and stops.
                if let Err(error) = writing.await {
                    debug!(%session, ?error, "failed to flush remaining output");
                }
            }
            debug!(?peer, %session, ?reason, "session closed");
        }
        Err(error) => return Err(error.context(format!("session {session} failed"))),
    }

    Ok(())
}

/// Handshake, active loop and teardown. Owns the session's mailbox so that it is
/// dropped as soon as the session stops reading.
async fn drive<R>(
    mut reader: R,
    mailbox: Mailbox,
    session: SessionId,
    registry: &ConnectionRegistry,
    config: &RelayConfig,
) -> Result<Ended>
where
    R: AsyncBufRead + Unpin,
{
    let Some(name) = handshake(&mut reader, &mailbox, session, registry, config).await? else {
        return Ok(Ended::BeforeHandshake);
    };

    let ended = run_active(&mut reader, &mailbox, session, &name, registry, config).await;

    registry.unregister(session).await;
    Router::new(registry, config)
        .broadcast(session, &name, &left_notice(&name))
        .await;
    info!(%session, name, "client left the chat room");

    ended
}

async fn handshake<R>(
    reader: &mut R,
    mailbox: &Mailbox,
    session: SessionId,
    registry: &ConnectionRegistry,
    config: &RelayConfig,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(requested) = read_line(reader)
        .await
        .context("failed to read screen name")?
    else {
        return Ok(None);
    };

    let name = registry.register(session, &requested, mailbox.clone()).await;
    let router = Router::new(registry, config);

    if name != requested {
        info!(%session, requested, name, "screen name taken; renamed");
        router.echo(mailbox, &name, &renamed_notice(&name));
    } else {
        info!(%session, name, "client joined");
    }

    let joined = joined_notice(&name);
    router.broadcast(session, &name, &joined).await;
    router.echo(mailbox, &name, &joined);

    Ok(Some(name))
}

async fn run_active<R>(
    reader: &mut R,
    mailbox: &Mailbox,
    session: SessionId,
    name: &str,
    registry: &ConnectionRegistry,
    config: &RelayConfig,
) -> Result<Ended>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = select! {
            line = read_line(reader) => line.context("failed to read from client")?,
            () = mailbox.evicted() => return Ok(Ended::Evicted),
        };
        let Some(line) = line else {
            return Ok(Ended::EndOfStream);
        };

        let router = Router::new(registry, config);
        match Command::parse(&line) {
            Ok(Command::Exit) => return Ok(Ended::Exit),
            Ok(Command::Invite { target }) => router.invite(mailbox, name, &target).await,
            Ok(Command::PrivateMessage { target, body }) => {
                router.private_message(&target, &body).await;
            }
            Ok(Command::Chat { body }) => {
                debug!(%session, "{name}: {body}");
                router.broadcast(session, name, &body).await;
                router.echo(mailbox, name, &body);
            }
            Err(error) => {
                debug!(%session, name, %error, line, "dropping malformed frame");
            }
        }
    }
}

async fn write_outbound<W>(mut inbox: Inbox, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = inbox.recv().await {
        write_line(&mut writer, &line).await?;
    }
    writer.shutdown().await
}
