//! Publisher-side accept loop and per-subscriber writer tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nitros_frame::{Frame, FrameCodec, FrameConfig, Kind, ProtocolError, Topic};
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionSet, ConnectionState, PeerConnection};
use crate::handshake::{self, MAX_HANDSHAKE_PAYLOAD};
use crate::observe::{emit, EventKind, EventSink, TopicEvent};
use crate::options::PublisherOptions;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) struct ListenerContext {
    pub topic: Topic,
    pub connections: Arc<ConnectionSet>,
    pub options: PublisherOptions,
    pub sink: Option<Arc<dyn EventSink>>,
    pub cancel: CancellationToken,
    pub tracker: TaskTracker,
}

/// Why a subscriber connection ended.
#[derive(Debug)]
enum Disconnect {
    PeerClosed,
    Shutdown,
    Write(ProtocolError),
    Protocol(String),
}

pub(crate) async fn accept_loop(listener: TcpListener, ctx: Arc<ListenerContext>) {
    loop {
        tokio::select! {
            () = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer, error = %err, "failed to set TCP_NODELAY");
                    }
                    let ctx_task = Arc::clone(&ctx);
                    ctx.tracker.spawn(serve(stream, peer, ctx_task));
                }
                Err(err) => {
                    warn!(topic = %ctx.topic, error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
    debug!(topic = %ctx.topic, "accept loop stopped");
}

async fn serve(stream: TcpStream, peer: SocketAddr, ctx: Arc<ListenerContext>) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(
        read_half,
        FrameCodec::new(FrameConfig {
            max_payload_size: MAX_HANDSHAKE_PAYLOAD,
        }),
    );
    let mut writer = FramedWrite::new(
        write_half,
        FrameCodec::new(FrameConfig {
            max_payload_size: ctx.options.max_payload,
        }),
    );

    let timeout = ctx.options.handshake_timeout;
    let request = tokio::select! {
        () = ctx.cancel.cancelled() => return,
        result = tokio::time::timeout(timeout, handshake::read_request(&mut reader)) => {
            match result {
                Ok(Ok(request)) => request,
                Ok(Err(err)) => {
                    debug!(topic = %ctx.topic, %peer, error = %err, "handshake failed");
                    return;
                }
                Err(_) => {
                    debug!(topic = %ctx.topic, %peer, ?timeout, "handshake timed out");
                    return;
                }
            }
        }
    };

    let conn = Arc::new(PeerConnection::new(
        ctx.connections.next_id(),
        peer,
        ctx.options.queue_capacity,
        ctx.options.overflow,
    ));
    let max = ctx.options.max_subscribers;
    let admitted = handshake::check_request(&request, &ctx.topic).and_then(|()| {
        ctx.connections
            .try_insert(Arc::clone(&conn), max)
            .ok_or_else(|| format!("subscriber limit reached ({max})"))
    });
    let verdict = admitted.as_ref().map(|_| ()).map_err(Clone::clone);

    if let Err(reason) = &verdict {
        info!(topic = %ctx.topic, %peer, %reason, "rejecting subscriber");
    }
    if let Err(err) = handshake::respond(&mut writer, &ctx.topic, verdict).await {
        debug!(topic = %ctx.topic, %peer, error = %err, "failed to send handshake response");
        return;
    }
    let Ok(guard) = admitted else {
        return;
    };

    info!(
        topic = %ctx.topic,
        %peer,
        id = conn.id(),
        subscribers = ctx.connections.len(),
        "subscriber connected"
    );
    emit(&ctx.sink, || {
        TopicEvent::new(&ctx.topic, EventKind::Connected).with_peer(peer)
    });

    let reason = pump(&conn, &mut reader, &mut writer, &ctx).await;

    drop(guard);
    match &reason {
        Disconnect::PeerClosed | Disconnect::Shutdown => {
            info!(topic = %ctx.topic, %peer, dropped = conn.dropped(), ?reason, "subscriber disconnected")
        }
        Disconnect::Write(err) => {
            info!(topic = %ctx.topic, %peer, error = %err, "subscriber write failed")
        }
        Disconnect::Protocol(msg) => {
            warn!(topic = %ctx.topic, %peer, error = %msg, "subscriber violated protocol")
        }
    }
    emit(&ctx.sink, || {
        TopicEvent::new(&ctx.topic, EventKind::Disconnected).with_peer(peer)
    });
}

/// Move frames from the connection's queue onto the socket until the
/// subscriber leaves or the publisher shuts down.
async fn pump<R, W>(
    conn: &PeerConnection,
    reader: &mut FramedRead<R, FrameCodec>,
    writer: &mut FramedWrite<W, FrameCodec>,
    ctx: &ListenerContext,
) -> Disconnect
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            () = ctx.cancel.cancelled() => {
                drain(conn, writer, ctx.options.drain_timeout).await;
                return Disconnect::Shutdown;
            }
            frame = conn.queue().recv() => {
                let Some(frame) = frame else {
                    return Disconnect::Shutdown;
                };
                tokio::select! {
                    () = ctx.cancel.cancelled() => {
                        drain(conn, writer, ctx.options.drain_timeout).await;
                        return Disconnect::Shutdown;
                    }
                    result = write_batch(conn, writer, frame) => {
                        if let Err(err) = result {
                            return Disconnect::Write(err);
                        }
                    }
                }
            }
            incoming = reader.next() => match incoming {
                None | Some(Err(ProtocolError::ConnectionClosed)) => return Disconnect::PeerClosed,
                Some(Ok(frame)) if frame.kind == Kind::Control => {
                    trace!(topic = %ctx.topic, peer = %conn.peer(), "ignoring control frame");
                }
                Some(Ok(frame)) => {
                    return Disconnect::Protocol(format!("unexpected {} frame from subscriber", frame.kind));
                }
                Some(Err(ProtocolError::Io(err))) => {
                    debug!(topic = %ctx.topic, peer = %conn.peer(), error = %err, "subscriber read failed");
                    return Disconnect::PeerClosed;
                }
                Some(Err(err)) => return Disconnect::Protocol(err.to_string()),
            }
        }
    }
}

/// Write `first` plus whatever else is already queued, then flush once.
async fn write_batch<W>(
    conn: &PeerConnection,
    writer: &mut FramedWrite<W, FrameCodec>,
    first: Frame,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.feed(first).await?;
    while let Some(frame) = conn.queue().try_pop() {
        writer.feed(frame).await?;
    }
    SinkExt::<Frame>::flush(writer).await
}

/// Flush what is left in the queue, bounded by `timeout`.
async fn drain<W>(conn: &PeerConnection, writer: &mut FramedWrite<W, FrameCodec>, timeout: Duration)
where
    W: AsyncWrite + Unpin,
{
    conn.set_state(ConnectionState::Draining);
    let pending = conn.queued();
    let flush = async {
        while let Some(frame) = conn.queue().try_pop() {
            writer.feed(frame).await?;
        }
        SinkExt::<Frame>::flush(writer).await?;
        SinkExt::<Frame>::close(writer).await
    };
    match tokio::time::timeout(timeout, flush).await {
        Ok(Ok(())) => trace!(peer = %conn.peer(), pending, "drained"),
        Ok(Err(err)) => debug!(peer = %conn.peer(), error = %err, "drain failed"),
        Err(_) => debug!(
            peer = %conn.peer(),
            remaining = conn.queued(),
            ?timeout,
            "drain timed out; discarding queued frames"
        ),
    }
}
