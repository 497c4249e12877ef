//! STOMP over a plain TCP byte stream.
//!
//! The binding spawns a writer task draining an unbounded channel into the
//! socket and a reader task feeding every received chunk to
//! [`Connection::handle_message`]. TCP is a byte stream, so outbound frames
//! split by `max_frame_size` are reassembled by the broker.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};

use crate::config::Config;
use crate::connection::Connection;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::transport::Transport;

/// [`Transport`] handle for a stream driven by [`attach`].
pub struct TcpTransport {
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Transport for TcpTransport {
    fn send(&self, data: Bytes) -> io::Result<()> {
        self.outbound_tx
            .send(data)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "tcp writer closed"))
    }

    fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Open a TCP connection to `addr` and bind a [`Connection`] to it.
///
/// Heartbeats run on a [`TokioScheduler`] for the current runtime. The
/// returned connection is open but not yet STOMP-connected; call
/// [`Connection::connect`] next.
pub async fn connect(addr: impl ToSocketAddrs, config: Config) -> io::Result<Connection> {
    let stream = TcpStream::connect(addr).await?;
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown peer".to_string());
    stream.set_nodelay(true)?;
    let scheduler = Arc::new(TokioScheduler::current()?);
    Ok(attach(stream, peer, scheduler, config))
}

/// Bind a [`Connection`] to an already-established stream.
///
/// Must be called from within a tokio runtime. `peer` only appears in the
/// close reason reported to the event sink.
pub fn attach<S>(
    stream: S,
    peer: String,
    scheduler: Arc<dyn Scheduler>,
    config: Config,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read_half, BytesCodec::new());
    let mut writer = FramedWrite::new(write_half, BytesCodec::new());

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut writer_shutdown = shutdown_tx.subscribe();
    let mut reader_shutdown = shutdown_tx.subscribe();

    let transport = Arc::new(TcpTransport {
        outbound_tx,
        shutdown_tx,
    });
    let conn = Connection::new(transport, scheduler, config);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                maybe = outbound_rx.recv() => {
                    match maybe {
                        Some(data) => {
                            if let Err(e) = writer.send(data).await {
                                tracing::debug!("tcp write failed: {}", e);
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = writer_shutdown.recv() => {
                    // flush whatever was queued before the close request
                    while let Ok(data) = outbound_rx.try_recv() {
                        if writer.send(data).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }
        let _ = SinkExt::<Bytes>::close(&mut writer).await;
    });

    let conn_reader = conn.clone();
    tokio::spawn(async move {
        let reason = loop {
            tokio::select! {
                _ = reader_shutdown.recv() => break "closed locally".to_string(),
                item = reader.next() => {
                    match item {
                        Some(Ok(chunk)) => conn_reader.handle_message(&chunk),
                        Some(Err(e)) => break format!("read error: {}", e),
                        None => break "connection closed by peer".to_string(),
                    }
                }
            }
        };
        conn_reader.handle_close(&format!("Lost connection to {}: {}", peer, reason));
    });

    conn.handle_open();
    conn
}
