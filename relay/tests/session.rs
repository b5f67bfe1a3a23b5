mod common;

use anyhow::Result;
use relay::{
    frame::{read_frame, write_frame},
    session::{BANNER, Session, SessionEnd, SessionError},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    time::timeout,
};

use common::{RunningServer, WAIT};

#[tokio::test]
async fn typed_lines_are_relayed_and_quit_leaves() -> Result<()> {
    let server = RunningServer::start().await?;
    let mut listener_client = TcpStream::connect(server.addr).await?;
    let session = Session::connect("127.0.0.1", server.addr.port()).await?;
    server.wait_for_members(2).await?;

    let input = BufReader::new(&b"hi there\nq\n"[..]);
    let end = timeout(WAIT, session.run(input, tokio::io::sink())).await??;
    assert_eq!(end, SessionEnd::Quit);

    // The line keeps its terminator on the wire.
    assert_eq!(timeout(WAIT, read_frame(&mut listener_client)).await??, b"hi there\n");
    server.wait_for_members(1).await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn only_a_full_quit_line_leaves() -> Result<()> {
    let server = RunningServer::start().await?;
    let mut listener_client = TcpStream::connect(server.addr).await?;
    let session = Session::connect("127.0.0.1", server.addr.port()).await?;
    server.wait_for_members(2).await?;

    // Neither a CRLF-terminated `q` nor an unterminated one at end of input
    // counts as the quit command; both are relayed as ordinary text.
    let input = BufReader::new(&b"q\r\nq"[..]);
    let end = timeout(WAIT, session.run(input, tokio::io::sink())).await??;
    assert_eq!(end, SessionEnd::InputClosed);

    assert_eq!(timeout(WAIT, read_frame(&mut listener_client)).await??, b"q\r\n");
    assert_eq!(timeout(WAIT, read_frame(&mut listener_client)).await??, b"q");
    server.wait_for_members(1).await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn end_of_input_also_announces_departure() -> Result<()> {
    let server = RunningServer::start().await?;
    let session = Session::connect("127.0.0.1", server.addr.port()).await?;
    server.wait_for_members(1).await?;

    let end = timeout(WAIT, session.run(&b""[..], tokio::io::sink())).await??;
    assert_eq!(end, SessionEnd::InputClosed);
    server.wait_for_members(0).await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn relayed_messages_are_printed() -> Result<()> {
    let server = RunningServer::start().await?;
    let mut other = TcpStream::connect(server.addr).await?;
    let session = Session::connect("127.0.0.1", server.addr.port()).await?;
    server.wait_for_members(2).await?;

    let (mut operator, input) = tokio::io::duplex(1024);
    let (output, screen) = tokio::io::duplex(1024);
    let mut screen = BufReader::new(screen);
    let running = tokio::spawn(session.run(BufReader::new(input), output));

    let mut line = String::new();
    timeout(WAIT, screen.read_line(&mut line)).await??;
    assert_eq!(line.trim_end(), BANNER);

    write_frame(&mut other, b"hello\n").await?;
    line.clear();
    timeout(WAIT, screen.read_line(&mut line)).await??;
    assert_eq!(line, "[Anonymous] hello\n");

    operator.write_all(b"q\n").await?;
    let end = timeout(WAIT, running).await???;
    assert_eq!(end, SessionEnd::Quit);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn session_ends_when_server_hangs_up() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let session = Session::connect("127.0.0.1", addr.port()).await?;
    assert_eq!(session.peer(), addr);

    let (accepted, _) = listener.accept().await?;
    drop(accepted);

    // Input stays open: only the server going away can end this session.
    let (_operator, input) = tokio::io::duplex(64);
    let end = timeout(WAIT, session.run(BufReader::new(input), tokio::io::sink())).await??;
    assert_eq!(end, SessionEnd::ServerClosed);
    Ok(())
}

#[tokio::test]
async fn connect_failure_is_reported() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let result = Session::connect("127.0.0.1", port).await;
    assert!(matches!(result, Err(SessionError::Connect { .. })));
    Ok(())
}
