use std::io;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    frame::{read_frame_limited, write_frame},
    message::ChatMessage,
};

/// Everything the client role needs to join a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub username: String,
    pub host: String,
    pub port: u16,
    pub max_frame_len: Option<u64>,
}

/// Connects to the relay and chats over stdin/stdout until stdin ends, the
/// server goes away, or Ctrl-C.
pub async fn run(config: &ClientConfig) -> Result<()> {
    let stream = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", config.host, config.port))?;
    info!(host = %config.host, port = config.port, "connected");

    let (reader, writer) = stream.into_split();
    let session = run_session(
        &config.username,
        BufReader::new(tokio::io::stdin()),
        BufReader::new(reader),
        writer,
        tokio::io::stdout(),
        config.max_frame_len,
    );

    select! {
        result = session => result,
        ctrl_c = tokio::signal::ctrl_c() => {
            if let Err(error) = ctrl_c {
                warn!(?error, "ctrl-c handler failed");
            }
            Ok(())
        }
    }
}

/// Sends every non-empty line of `input` as a message from `username`, and
/// prints every message arriving on `reader` to `output` as `sender : body`.
pub async fn run_session<I, R, W, O>(
    username: &str,
    input: I,
    reader: R,
    mut writer: W,
    output: O,
    max_frame_len: Option<u64>,
) -> Result<()>
where
    I: AsyncBufRead + Unpin,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin + Send + 'static,
{
    let mut incoming = spawn_printer(reader, output, max_frame_len);
    let mut lines = input.lines();

    let result = loop {
        select! {
            line = lines.next_line() => {
                match handle_input_line(line, &mut writer, username).await {
                    Ok(true) => {}
                    Ok(false) => break Ok(()),
                    Err(err) => break Err(err),
                }
            }
            printed = &mut incoming => {
                break match printed {
                    Ok(result) => result,
                    Err(err) => Err(err).context("incoming message task failed"),
                };
            }
        }
    };

    incoming.abort();
    if let Err(error) = writer.shutdown().await {
        debug!(?error, "failed to shut down connection cleanly");
    }
    result
}

async fn handle_input_line<W>(
    line: io::Result<Option<String>>,
    writer: &mut W,
    username: &str,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let Some(line) = line.context("failed to read input")? else {
        return Ok(false);
    };
    if line.is_empty() {
        return Ok(true);
    }

    let payload = ChatMessage::new(username, line).encode()?;
    write_frame(writer, &payload)
        .await
        .context("failed to send message")?;
    Ok(true)
}

fn spawn_printer<R, O>(
    mut reader: R,
    mut output: O,
    max_frame_len: Option<u64>,
) -> JoinHandle<Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move { print_incoming(&mut reader, &mut output, max_frame_len).await })
}

/// Prints incoming messages until the server closes the stream.
pub async fn print_incoming<R, O>(
    reader: &mut R,
    output: &mut O,
    max_frame_len: Option<u64>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    loop {
        let payload = match read_frame_limited(reader, max_frame_len).await {
            Ok(payload) => payload,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                write_line(output, "*** server closed the connection").await?;
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to read from server"),
        };

        match ChatMessage::decode(&payload) {
            Ok(message) => write_line(output, &message.to_string()).await?,
            Err(err) => warn!(error = %err, "ignoring malformed message"),
        }
    }
}

async fn write_line<O>(output: &mut O, line: &str) -> io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
