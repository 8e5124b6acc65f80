//! Unix socket bridge so viewers and producers in other processes can attach
//! to a relay.
//!
//! Every socket client is paired with an ordinary relay attachment. The relay
//! side greets the client with a welcome frame carrying the id it was
//! assigned, then streams fan-out traffic to it while forwarding whatever the
//! client sends, re-stamped with that id. A client that drops its
//! subscription but keeps publishing sends an unsubscribe frame, and the
//! relay side stops streaming to it.

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::levels::{Envelope, Frame, SenderId, FRAME_HEADER_LEN};
use crate::relay::{Attachment, Publisher, RelayEvent, RelayHandle, Subscription};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Get the socket path for the relay
pub fn socket_path() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(dir).join("levelcast.sock")
    } else {
        PathBuf::from("/tmp/levelcast.sock")
    }
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut body = vec![0u8; Frame::body_len(header[0])?];
    reader
        .read_exact(&mut body)
        .await
        .context("Connection closed inside a frame")?;
    Ok(Some(Frame::decode(&header, &body)?))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.to_bytes()).await?;
    Ok(())
}

/// Bind the relay socket. A socket left behind by a relay that is no longer
/// running is replaced; a live relay keeps its path.
pub fn bind(path: &Path) -> Result<UnixListener> {
    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => bail!("A relay is already running at {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            debug!("Removing stale relay socket at {}", path.display());
            let _ = std::fs::remove_file(path);
        }
        Err(_) => {}
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind relay socket at {}", path.display()))?;
    info!("Relay listening on {}", path.display());
    Ok(listener)
}

/// Accept socket clients and bridge each one to a fresh relay attachment.
/// Runs until the relay shuts down or accepting fails.
pub async fn serve(listener: UnixListener, relay: RelayHandle) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let attachment = match relay.attach() {
            Ok(attachment) => attachment,
            Err(e) => {
                debug!("Refusing socket client: {}", e);
                return Ok(());
            }
        };

        tokio::spawn(async move {
            let id = attachment.id();
            match bridge_client(stream, attachment).await {
                Ok(()) => debug!("Socket client {} disconnected", id),
                Err(e) => warn!("Socket client {} dropped: {:#}", id, e),
            }
        });
    }
}

async fn bridge_client(stream: UnixStream, attachment: Attachment) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (publisher, mut subscription) = attachment.split();

    write_frame(&mut writer, &Frame::Welcome(publisher.id())).await?;

    let outbound = tokio::spawn(async move {
        while let Some(envelope) = subscription.recv().await {
            if write_frame(&mut writer, &Frame::Message(envelope)).await.is_err() {
                break;
            }
        }
    });

    let result = forward_inbound(&mut reader, &publisher, &outbound).await;
    outbound.abort();
    result
}

async fn forward_inbound<R: AsyncRead + Unpin>(
    reader: &mut R,
    publisher: &Publisher,
    outbound: &JoinHandle<()>,
) -> Result<()> {
    while let Some(frame) = read_frame(reader).await? {
        match frame {
            // Whatever id the client claims, the relay knows it by its own.
            Frame::Message(envelope) => publisher.publish(envelope.payload)?,
            // Dropping the subscription lets the relay prune the endpoint on
            // its next delivery, while the client keeps publishing.
            Frame::Unsubscribe(_) => {
                debug!("Socket client {} stopped listening", publisher.id());
                outbound.abort();
            }
            Frame::Welcome(_) => return Err(anyhow!("Client sent a welcome frame")),
        }
    }
    Ok(())
}

/// Attach to the relay listening at `path`.
///
/// The returned attachment behaves like a local one: publishes are written to
/// the socket and fan-out traffic arrives through `recv`.
pub async fn connect(path: &Path) -> Result<Attachment> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(path))
        .await
        .context("Connection timed out")?
        .with_context(|| format!("Could not connect to a relay at {}. Is one running?", path.display()))?;

    let (mut reader, writer) = stream.into_split();

    let id = match tokio::time::timeout(CONNECT_TIMEOUT, read_frame(&mut reader))
        .await
        .context("Relay did not greet us")??
    {
        Some(Frame::Welcome(id)) => id,
        Some(other) => return Err(anyhow!("Expected a welcome frame, got {:?}", other)),
        None => return Err(anyhow!("Relay closed the connection")),
    };
    info!("Attached to relay at {} as {}", path.display(), id);

    let (inbox, outgoing) = mpsc::unbounded_channel::<RelayEvent>();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (unsubscribed_tx, unsubscribed) = oneshot::channel();
    tokio::spawn(write_outgoing(writer, id, outgoing, unsubscribed));
    tokio::spawn(read_incoming(reader, inbound_tx, unsubscribed_tx));

    Ok(Attachment::from_parts(
        Publisher::new(id, inbox),
        Subscription::new(id, inbound),
    ))
}

/// Client side: write publishes to the socket. The write half stays open
/// until both the publisher and the subscription are gone, so dropping one
/// half of a split attachment leaves the other working.
async fn write_outgoing(
    mut writer: OwnedWriteHalf,
    id: SenderId,
    mut outgoing: mpsc::UnboundedReceiver<RelayEvent>,
    mut unsubscribed: oneshot::Receiver<()>,
) {
    let mut listening = true;
    loop {
        tokio::select! {
            event = outgoing.recv() => match event {
                Some(RelayEvent::Message(envelope)) => {
                    if let Err(e) = write_frame(&mut writer, &Frame::Message(envelope)).await {
                        debug!("Relay connection closed: {:#}", e);
                        return;
                    }
                }
                Some(_) => {}
                None => break,
            },
            result = &mut unsubscribed, if listening => {
                listening = false;
                if result.is_ok() && write_frame(&mut writer, &Frame::Unsubscribe(id)).await.is_err() {
                    return;
                }
            }
        }
    }

    if listening {
        let _ = unsubscribed.await;
    }
}

/// Client side: hand fan-out frames to the subscription. Once the
/// subscription is dropped the relay is told to stop sending, and anything
/// already in flight is discarded so the relay side never stalls on a write.
async fn read_incoming(
    mut reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Envelope>,
    unsubscribed: oneshot::Sender<()>,
) {
    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(Frame::Message(envelope))) => {
                    let _ = inbound.send(envelope);
                }
                Ok(Some(other)) => debug!("Ignoring unexpected {:?} frame", other),
                Ok(None) => return,
                Err(e) => {
                    warn!("Relay stream error: {:#}", e);
                    return;
                }
            },
            _ = inbound.closed() => break,
        }
    }

    let _ = unsubscribed.send(());
    drop(inbound);
    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::{LevelSummary, Payload};
    use crate::relay::Relay;
    use tokio::time::timeout;

    const STEP: Duration = Duration::from_secs(2);

    fn temp_socket(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("levelcast-test-{}-{}.sock", name, std::process::id()))
    }

    #[tokio::test]
    async fn frames_survive_a_byte_stream() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let frames = [
            Frame::Welcome(SenderId(9)),
            Frame::Message(Envelope {
                sender: SenderId(3),
                payload: Payload::Levels(LevelSummary::new(-1.0, -2.0, -3.0)),
            }),
            Frame::Message(Envelope {
                sender: SenderId(3),
                payload: Payload::Silence,
            }),
        ];
        for frame in &frames {
            write_frame(&mut a, frame).await.unwrap();
        }
        drop(a);

        for frame in &frames {
            assert_eq!(read_frame(&mut b).await.unwrap().as_ref(), Some(frame));
        }
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_tag_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[7u8; FRAME_HEADER_LEN]).await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn remote_viewer_receives_local_broadcasts() {
        let path = temp_socket("viewer");
        let relay = Relay::spawn();
        let server = tokio::spawn(serve(bind(&path).unwrap(), relay.handle()));

        let mut remote = connect(&path).await.unwrap();
        let local = relay.handle().attach().unwrap();
        // The bridge attaches before greeting, so the remote is already live.
        local.publish(Payload::Silence).unwrap();

        let envelope = timeout(STEP, remote.recv()).await.unwrap().unwrap();
        assert_eq!(envelope.sender, local.id());
        assert_eq!(envelope.payload, Payload::Silence);

        server.abort();
        relay.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn remote_messages_are_stamped_with_the_assigned_id() {
        let path = temp_socket("producer");
        let relay = Relay::spawn();
        let mut local = relay.handle().attach().unwrap();
        let server = tokio::spawn(serve(bind(&path).unwrap(), relay.handle()));

        let remote = connect(&path).await.unwrap();
        let levels = LevelSummary::new(-10.0, -14.0, -8.0);
        remote.publish(Payload::Levels(levels)).unwrap();

        let envelope = timeout(STEP, local.recv()).await.unwrap().unwrap();
        assert_eq!(envelope.sender, remote.id());
        assert_eq!(envelope.payload, Payload::Levels(levels));
        assert_eq!(relay.handle().attachment_count().await.unwrap(), 2);

        server.abort();
        relay.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn viewer_keeps_receiving_after_dropping_its_publisher() {
        let path = temp_socket("split-viewer");
        let relay = Relay::spawn();
        let server = tokio::spawn(serve(bind(&path).unwrap(), relay.handle()));

        let (_, mut subscription) = connect(&path).await.unwrap().split();
        let local = relay.handle().attach().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let levels = LevelSummary::new(-4.0, -7.0, -2.0);
        local.publish(Payload::Levels(levels)).unwrap();
        let envelope = timeout(STEP, subscription.recv()).await.unwrap().unwrap();
        assert_eq!(envelope.payload, Payload::Levels(levels));
        assert_eq!(relay.handle().attachment_count().await.unwrap(), 2);

        server.abort();
        relay.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn producer_that_stops_listening_is_pruned() {
        let path = temp_socket("split-producer");
        let relay = Relay::spawn();
        let mut local = relay.handle().attach().unwrap();
        let server = tokio::spawn(serve(bind(&path).unwrap(), relay.handle()));

        let (publisher, subscription) = connect(&path).await.unwrap().split();
        drop(subscription);

        let mut pruned = false;
        for _ in 0..50 {
            publisher.publish(Payload::Silence).unwrap();
            let envelope = timeout(STEP, local.recv()).await.unwrap().unwrap();
            assert_eq!(envelope.sender, publisher.id());
            if relay.handle().attachment_count().await.unwrap() == 1 {
                pruned = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(pruned, "remote endpoint still attached");

        server.abort();
        relay.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn a_live_relay_keeps_its_socket() {
        let path = temp_socket("live");
        let relay = Relay::spawn();
        let server = tokio::spawn(serve(bind(&path).unwrap(), relay.handle()));

        let err = bind(&path).unwrap_err();
        assert!(err.to_string().contains("already running"), "{err}");
        assert!(connect(&path).await.is_ok());

        server.abort();
        relay.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn a_stale_socket_is_replaced() {
        let path = temp_socket("stale");
        drop(bind(&path).unwrap());
        assert!(path.exists());

        assert!(bind(&path).is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn connecting_without_a_relay_fails() {
        let path = temp_socket("absent");
        let _ = std::fs::remove_file(&path);
        assert!(connect(&path).await.is_err());
    }
}
