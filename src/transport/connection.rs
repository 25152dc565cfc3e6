//! Duplex connection loops.
//!
//! A [`Connection`] owns one TCP stream split into halves, each driven by
//! its own task:
//!
//! - the **read loop** decodes frames and pushes packets onto the inbound
//!   queue until the peer closes, a frame is malformed, or it is cancelled
//! - the **write loop** waits on the outbound queue and writes each packet
//!   as one flushed frame until a write fails or it is cancelled
//!
//! Both loops race their work against a shared cancellation signal, so a
//! read parked on an idle socket ends as soon as the connection shuts down.
//! A loop that ends on its own records why in the connection's
//! [`LinkStatus`].

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use super::frame::FrameCodec;
use super::lifecycle::Queues;
use super::queue::PacketQueue;
use crate::core::{FrameError, READ_BUFFER_SIZE, TransportResult};

/// Why a connection's link went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The peer closed the stream at a frame boundary.
    PeerClosed,
    /// A read, write or decode failed.
    Failed(String),
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::PeerClosed => f.write_str("peer closed the connection"),
            Disconnect::Failed(reason) => write!(f, "connection failed: {reason}"),
        }
    }
}

/// Link health shared between a connection's loops and its owner.
///
/// The first loop to end on its own sets the reason; later reports are
/// ignored.
#[derive(Debug, Default)]
pub struct LinkStatus {
    down: OnceLock<Disconnect>,
}

impl LinkStatus {
    /// Record that the link went down. Returns `false` if it already was.
    pub fn mark_down(&self, reason: Disconnect) -> bool {
        self.down.set(reason).is_ok()
    }

    /// Get the reason the link went down, if it has.
    pub fn reason(&self) -> Option<Disconnect> {
        self.down.get().cloned()
    }

    /// Check whether both directions are still running.
    pub fn is_up(&self) -> bool {
        self.down.get().is_none()
    }
}

/// Wait until `cancel` is raised or its sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

fn signal(activity: &Option<Arc<Notify>>) {
    if let Some(activity) = activity {
        activity.notify_one();
    }
}

/// A running duplex connection.
#[derive(Debug)]
pub struct Connection {
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    link: Arc<LinkStatus>,
    cancel: watch::Sender<bool>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Connection {
    /// Split `stream` and spawn its read and write loops.
    ///
    /// Packets read are pushed onto `queues.inbound`; packets pushed onto
    /// `queues.outbound` are written. If `activity` is given it is notified
    /// after every received packet and when the link goes down.
    pub fn spawn(
        stream: TcpStream,
        queues: &Queues,
        codec: FrameCodec,
        activity: Option<Arc<Notify>>,
    ) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (cancel, _) = watch::channel(false);
        let link = Arc::new(LinkStatus::default());

        let reader = tokio::spawn(read_loop(
            BufReader::with_capacity(READ_BUFFER_SIZE, read_half),
            Arc::clone(&queues.inbound),
            codec,
            cancel.subscribe(),
            Arc::clone(&link),
            activity.clone(),
            peer_addr,
        ));
        let writer = tokio::spawn(write_loop(
            write_half,
            Arc::clone(&queues.outbound),
            codec,
            cancel.subscribe(),
            Arc::clone(&link),
            activity,
            peer_addr,
        ));

        Ok(Self {
            peer_addr,
            local_addr,
            link,
            cancel,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    /// Remote address of the stream.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local address of the stream.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the shared link status.
    pub fn link(&self) -> &Arc<LinkStatus> {
        &self.link
    }

    /// Check whether both loops have finished.
    pub fn is_finished(&self) -> bool {
        [&self.reader, &self.writer]
            .into_iter()
            .flatten()
            .all(JoinHandle::is_finished)
    }

    /// Cancel both loops and wait for them to end.
    ///
    /// The stream halves are owned by the loops, so the socket is closed by
    /// the time this returns.
    pub async fn shutdown(mut self) -> TransportResult<()> {
        let _ = self.cancel.send(true);

        let mut result: TransportResult<()> = Ok(());
        for handle in [self.reader.take(), self.writer.take()].into_iter().flatten() {
            if let Err(e) = handle.await {
                tracing::warn!(peer = %self.peer_addr, error = %e, "connection task failed");
                result = Err(io::Error::other(e).into());
            }
        }
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Loops still running end on their next poll.
        let _ = self.cancel.send(true);
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    inbound: Arc<PacketQueue>,
    codec: FrameCodec,
    mut cancel: watch::Receiver<bool>,
    link: Arc<LinkStatus>,
    activity: Option<Arc<Notify>>,
    peer: SocketAddr,
) {
    let reason = tokio::select! {
        _ = cancelled(&mut cancel) => return,
        reason = async {
            loop {
                match codec.read_frame(&mut reader).await {
                    Ok(Some(packet)) => {
                        inbound.push(packet);
                        signal(&activity);
                    }
                    Ok(None) => break Disconnect::PeerClosed,
                    Err(e) => break Disconnect::Failed(e.to_string()),
                }
            }
        } => reason,
    };

    match &reason {
        Disconnect::PeerClosed => tracing::debug!(%peer, "peer closed connection"),
        Disconnect::Failed(error) => tracing::warn!(%peer, %error, "read loop failed"),
    }
    link.mark_down(reason);
    signal(&activity);
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    outbound: Arc<PacketQueue>,
    codec: FrameCodec,
    mut cancel: watch::Receiver<bool>,
    link: Arc<LinkStatus>,
    activity: Option<Arc<Notify>>,
    peer: SocketAddr,
) {
    let reason = tokio::select! {
        _ = cancelled(&mut cancel) => return,
        reason = async {
            let mut scratch = Vec::new();
            loop {
                while let Some(packet) = outbound.pop() {
                    match codec.write_frame(&mut writer, &packet, &mut scratch).await {
                        Ok(()) => {}
                        Err(FrameError::TooLarge { len, max }) => {
                            tracing::warn!(%peer, len, max, "dropping oversized packet");
                        }
                        Err(e) => return Disconnect::Failed(e.to_string()),
                    }
                }
                outbound.ready().await;
            }
        } => reason,
    };

    tracing::warn!(%peer, error = %reason, "write loop failed");
    link.mark_down(reason);
    signal(&activity);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_link_status_first_reason_wins() {
        let link = LinkStatus::default();
        assert!(link.is_up());
        assert!(link.mark_down(Disconnect::PeerClosed));
        assert!(!link.mark_down(Disconnect::Failed("late".into())));
        assert_eq!(link.reason(), Some(Disconnect::PeerClosed));
        assert!(!link.is_up());
    }

    #[tokio::test]
    async fn test_packets_cross_in_both_directions() {
        let (left, right) = socket_pair().await;
        let left_queues = Queues::new();
        let right_queues = Queues::new();
        let left = Connection::spawn(left, &left_queues, FrameCodec::default(), None).unwrap();
        let right = Connection::spawn(right, &right_queues, FrameCodec::default(), None).unwrap();

        for packet in ["A", "B", "C"] {
            left_queues.outbound.push(packet.into());
        }
        right_queues.outbound.push("reply".into());

        wait_for(|| right_queues.inbound.len() == 3 && left_queues.inbound.len() == 1).await;
        assert_eq!(right_queues.inbound.drain(), vec!["A", "B", "C"]);
        assert_eq!(left_queues.inbound.drain(), vec!["reply"]);

        left.shutdown().await.unwrap();
        right.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_marks_link_down() {
        let (local, mut remote) = socket_pair().await;
        let queues = Queues::new();
        let activity = Arc::new(Notify::new());
        let conn =
            Connection::spawn(local, &queues, FrameCodec::default(), Some(Arc::clone(&activity)))
                .unwrap();

        remote.write_all(&[0x02, b'h', b'i']).await.unwrap();
        remote.shutdown().await.unwrap();
        drop(remote);

        let link = Arc::clone(conn.link());
        wait_for(|| !link.is_up()).await;
        assert_eq!(link.reason(), Some(Disconnect::PeerClosed));
        assert_eq!(queues.inbound.drain(), vec!["hi"]);

        conn.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_marks_link_failed() {
        let (local, mut remote) = socket_pair().await;
        let queues = Queues::new();
        let conn = Connection::spawn(local, &queues, FrameCodec::new(4), None).unwrap();

        // Declares 16 bytes against a 4 byte limit
        remote.write_all(&[0x10]).await.unwrap();

        let link = Arc::clone(conn.link());
        wait_for(|| !link.is_up()).await;
        assert!(matches!(link.reason(), Some(Disconnect::Failed(_))));

        conn.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_joins_loops_and_closes_socket() {
        let (local, remote) = socket_pair().await;
        let queues = Queues::new();
        let conn = Connection::spawn(local, &queues, FrameCodec::default(), None).unwrap();
        let link = Arc::clone(conn.link());

        conn.shutdown().await.unwrap();
        // Cancellation is not a link failure
        assert!(link.is_up());

        // The remote side sees the stream end
        let remote_queues = Queues::new();
        let remote = Connection::spawn(remote, &remote_queues, FrameCodec::default(), None).unwrap();
        let remote_link = Arc::clone(remote.link());
        wait_for(|| !remote_link.is_up()).await;
        assert_eq!(remote_link.reason(), Some(Disconnect::PeerClosed));
        remote.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_packet_is_dropped_not_fatal() {
        let (left, right) = socket_pair().await;
        let left_queues = Queues::new();
        let right_queues = Queues::new();
        let left = Connection::spawn(left, &left_queues, FrameCodec::new(8), None).unwrap();
        let right = Connection::spawn(right, &right_queues, FrameCodec::default(), None).unwrap();

        left_queues.outbound.push("far too long for eight".into());
        left_queues.outbound.push("ok".into());

        wait_for(|| right_queues.inbound.len() == 1).await;
        assert_eq!(right_queues.inbound.drain(), vec!["ok"]);
        assert!(left.link().is_up());

        left.shutdown().await.unwrap();
        right.shutdown().await.unwrap();
    }
}
