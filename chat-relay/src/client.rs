//! Minimal terminal client: stdin lines go to the relay, relay lines go to stdout.

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncWriteExt, BufReader, stdin, stdout},
    net::TcpStream,
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{EXIT, read_line, write_line},
};

const QUIT: &str = "/quit";

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (reader, mut writer) = stream.into_split();
    let mut server = BufReader::new(reader);
    let mut input = BufReader::new(stdin());
    let mut output = stdout();

    write_line(&mut writer, &args.name)
        .await
        .context("failed to send screen name")?;

    loop {
        select! {
            line = read_line(&mut server) => {
                let Some(line) = line.context("failed to read from relay")? else {
                    write_line(&mut output, "*** server closed the connection").await?;
                    break;
                };
                write_line(&mut output, &line).await?;
            }
            line = read_line(&mut input) => {
                match line?.filter(|line| line != QUIT) {
                    Some(line) => write_line(&mut writer, &line).await?,
                    None => {
                        write_line(&mut writer, EXIT).await?;
                        write_line(&mut output, "*** leaving chat").await?;
                        break;
                    }
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
    Ok(())
}
