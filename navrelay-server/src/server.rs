//! TCP command server
//!
//! Accepts console connections and serves each on its own task. A
//! connection writes through an mpsc queue drained by a writer task, so
//! replies and pushed events never interleave mid-line.

use crate::protocol::{ClientCommand, Reply};
use crate::session::RelaySession;
use navrelay_core::{RelayError, Result, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct CommandServer {
    listener: TcpListener,
    session: Arc<RelaySession>,
    config: ServerConfig,
}

impl CommandServer {
    /// Bind the listener. Failing to bind is fatal for the process.
    pub async fn bind(session: Arc<RelaySession>, config: ServerConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.bind_address, config.listen_port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            RelayError::Io(std::io::Error::new(e.kind(), format!("failed to bind {}: {}", addr, e)))
        })?;
        info!("Command server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            session,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let session = self.session.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(session, stream, addr, config).await {
                            warn!("Console {} ended with error: {}", addr, e);
                        }
                        info!("Console disconnected: {}", addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

enum LineRead {
    Line(String),
    TooLong,
    Eof,
}

async fn read_line<R>(reader: &mut R, max_len: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader).take(max_len as u64 + 1).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() != Some(&b'\n') && buf.len() > max_len {
        discard_line(reader).await?;
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line(String::from_utf8_lossy(&buf).trim().to_string()))
}

async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = available.len();
        reader.consume(len);
    }
}

async fn handle_connection(
    session: Arc<RelaySession>,
    stream: TcpStream,
    addr: SocketAddr,
    config: ServerConfig,
) -> Result<()> {
    info!("Console connected: {}", addr);
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Reply>();

    let writer = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            let line = match reply.to_line() {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to serialize reply: {}", e);
                    continue;
                }
            };
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                warn!("Failed to write to console {}: {}", addr, e);
                break;
            }
        }
    });

    let operator = session.operators().register(addr, tx.clone());
    let _ = tx.send(session.greeting().await);

    let mut reader = BufReader::new(read_half);
    let result = serve_lines(&session, &mut reader, &tx, addr, &config).await;

    session.operators().release(operator);
    drop(tx);
    let _ = writer.await;
    result
}

async fn serve_lines<R>(
    session: &RelaySession,
    reader: &mut R,
    tx: &mpsc::UnboundedSender<Reply>,
    addr: SocketAddr,
    config: &ServerConfig,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let read = match config.idle_timeout() {
            Some(idle) => match tokio::time::timeout(idle, read_line(reader, config.max_line_length)).await {
                Ok(read) => read?,
                Err(_) => {
                    info!("Console {} idle for {:?}, closing", addr, idle);
                    return Ok(());
                }
            },
            None => read_line(reader, config.max_line_length).await?,
        };

        let line = match read {
            LineRead::Eof => return Ok(()),
            LineRead::TooLong => {
                let _ = tx.send(Reply::error(format!(
                    "command longer than {} bytes",
                    config.max_line_length
                )));
                continue;
            }
            LineRead::Line(line) if line.is_empty() => continue,
            LineRead::Line(line) => line,
        };

        info!("Command from {}: {}", addr, line);
        dispatch(session, &line, tx).await;
    }
}

/// Execute one command line, sending every reply it produces
pub async fn dispatch(session: &RelaySession, line: &str, tx: &mpsc::UnboundedSender<Reply>) {
    let command = match ClientCommand::parse(line) {
        Ok(command) => command,
        Err(e) => {
            debug!("Rejected line {:?}: {}", line, e);
            let _ = tx.send(Reply::from_error(&e, None));
            return;
        }
    };

    match command {
        ClientCommand::Navigate(index) => {
            let reply = match session.navigate(index).await {
                Ok(goal) => Reply::cmd_ack(index, &goal.goal_id),
                Err(e) => {
                    warn!("Navigation to station {} failed: {}", index, e);
                    Reply::from_error(&e, Some(command))
                }
            };
            let _ = tx.send(reply);
        }
        ClientCommand::Turn(degrees) => {
            let _ = tx.send(Reply::turn_ack(degrees));
            if let Err(e) = session.turn(degrees).await {
                warn!("Turn of {} degrees failed: {}", degrees, e);
                let _ = tx.send(Reply::from_error(&e, Some(command)));
            }
        }
    }
}
