//! Client side of the relay.
//!
//! A session splits its socket in two. The sender half stays with the task
//! calling [`Session::run`], which reads operator lines; the receiver half
//! moves into a spawned task that prints every frame the server relays. Output
//! is shared behind an async mutex so a prompt and a message are never written
//! over each other.

use std::{io, net::SocketAddr, sync::Arc};

use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::Mutex,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::frame::{self, FrameError};

/// The line that ends a session, terminator included.
pub const QUIT_COMMAND: &[u8] = b"q\n";

pub const BANNER: &str = "Connected. Use 'q' to quit.";
const PROMPT: &str = "[Me] ";
const SENDER_LABEL: &str = "[Anonymous] ";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to send message")]
    Send(#[source] FrameError),
    #[error("failed to read input")]
    Input(#[source] io::Error),
    #[error("failed to write output")]
    Output(#[source] io::Error),
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The operator typed the quit command.
    Quit,
    /// Input reached end of file.
    InputClosed,
    /// The server closed the connection.
    ServerClosed,
}

type SharedOutput<O> = Arc<Mutex<O>>;

#[derive(Debug)]
pub struct Session {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    interactive: bool,
}

impl Session {
    pub async fn connect(host: &str, port: u16) -> Result<Self, SessionError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| SessionError::Connect {
                addr: format!("{host}:{port}"),
                source,
            })?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, SessionError> {
        let peer = stream.peer_addr().map_err(|source| SessionError::Connect {
            addr: "socket".to_string(),
            source,
        })?;
        info!(%peer, "connected");

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            peer,
            interactive: false,
        })
    }

    /// Decorates output with a `[Me] ` prompt, as expected on a terminal.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Runs the sender on the current task and the receiver on a spawned one
    /// until the operator quits, input ends, or the server goes away.
    pub async fn run<I, O>(self, input: I, output: O) -> Result<SessionEnd, SessionError>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Send + Unpin + 'static,
    {
        let Session {
            reader,
            mut writer,
            peer,
            interactive,
        } = self;
        let output = Arc::new(Mutex::new(output));

        write_output(&output, format!("{BANNER}\n").as_bytes()).await?;

        let mut receiver = tokio::spawn(receive_messages(reader, Arc::clone(&output), interactive));
        let outcome = send_lines(input, &mut writer, &output, &mut receiver, interactive).await;

        let end = match outcome {
            Ok(SessionEnd::ServerClosed) => {
                write_output(&output, b"\n*** server closed the connection\n").await?;
                SessionEnd::ServerClosed
            }
            Ok(end) => {
                announce_departure(&mut writer).await;
                receiver.abort();
                end
            }
            Err(err) => {
                receiver.abort();
                return Err(err);
            }
        };

        debug!(%peer, ?end, "session finished");
        Ok(end)
    }
}

async fn send_lines<I, O>(
    mut input: I,
    writer: &mut OwnedWriteHalf,
    output: &SharedOutput<O>,
    receiver: &mut JoinHandle<()>,
    interactive: bool,
) -> Result<SessionEnd, SessionError>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    loop {
        if interactive {
            write_output(output, PROMPT.as_bytes()).await?;
        }

        line.clear();
        select! {
            read = input.read_until(b'\n', &mut line) => {
                let read = read.map_err(SessionError::Input)?;
                if read == 0 {
                    return Ok(SessionEnd::InputClosed);
                }
                if is_quit(&line) {
                    return Ok(SessionEnd::Quit);
                }
                frame::write_frame(writer, &line)
                    .await
                    .map_err(SessionError::Send)?;
            }
            _ = &mut *receiver => return Ok(SessionEnd::ServerClosed),
        }
    }
}

/// Tells the server we are leaving and closes our sending direction.
async fn announce_departure(writer: &mut OwnedWriteHalf) {
    if let Err(err) = frame::write_disconnect(writer).await {
        debug!(error = ?err, "could not send disconnect sentinel");
    }
    if let Err(err) = writer.shutdown().await {
        debug!(error = ?err, "failed to shutdown client writer cleanly");
    }
}

async fn receive_messages<O>(reader: OwnedReadHalf, output: SharedOutput<O>, interactive: bool)
where
    O: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let payload = match frame::read_frame(&mut reader).await {
            Ok(payload) => payload,
            Err(FrameError::ConnectionClosed) => {
                debug!("server closed the connection");
                return;
            }
            Err(err) => {
                warn!(error = ?err, "failed to read from server");
                return;
            }
        };

        let rendered = render_message(&payload, interactive);
        if let Err(err) = write_output(&output, &rendered).await {
            warn!(error = ?err, "failed to print message");
            return;
        }
    }
}

/// Formats a relayed payload for display. Payload bytes are written as-is.
fn render_message(payload: &[u8], interactive: bool) -> Vec<u8> {
    let mut rendered = Vec::with_capacity(payload.len() + SENDER_LABEL.len() + PROMPT.len() + 2);
    if interactive {
        rendered.push(b'\r');
    }
    rendered.extend_from_slice(SENDER_LABEL.as_bytes());
    rendered.extend_from_slice(payload);
    if !payload.ends_with(b"\n") {
        rendered.push(b'\n');
    }
    if interactive {
        rendered.extend_from_slice(PROMPT.as_bytes());
    }
    rendered
}

fn is_quit(line: &[u8]) -> bool {
    line == QUIT_COMMAND
}

async fn write_output<O>(output: &SharedOutput<O>, bytes: &[u8]) -> Result<(), SessionError>
where
    O: AsyncWrite + Unpin,
{
    let mut output = output.lock().await;
    output.write_all(bytes).await.map_err(SessionError::Output)?;
    output.flush().await.map_err(SessionError::Output)
}
