//! WebSocket write pump: owns the sink, framing and keepalive.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use sliceup_protocol::constants::WS_PING_PERIOD;

/// Something the client wants on the wire.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// A serialized request envelope.
    Text(String),
    /// An encoded slice frame.
    Slice(Vec<u8>),
    /// Reply to a server ping, echoing its payload.
    Pong(Vec<u8>),
}

impl From<Outbound> for tungstenite::Message {
    fn from(out: Outbound) -> Self {
        match out {
            Outbound::Text(text) => tungstenite::Message::Text(text.into()),
            Outbound::Slice(frame) => tungstenite::Message::Binary(frame.into()),
            Outbound::Pong(payload) => tungstenite::Message::Pong(payload.into()),
        }
    }
}

/// Drains the outbound queue into the sink until cancelled or every
/// sender is gone.
///
/// A ping goes out only when nothing was written for a full
/// [`WS_PING_PERIOD`]; a connection busy streaming slices needs none. A
/// failed write cancels the connection so pending requests fail fast.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval(WS_PING_PERIOD);
    keepalive.reset();
    let mut last_write = Instant::now();

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = keepalive.tick() => {
                if last_write.elapsed() < WS_PING_PERIOD {
                    continue;
                }
                tungstenite::Message::Ping(Vec::new().into())
            }
            out = outbound.recv() => match out {
                Some(out) => {
                    if let Outbound::Slice(frame) = &out {
                        trace!(bytes = frame.len(), "sending slice frame");
                    }
                    out.into()
                }
                None => break,
            },
        };

        if let Err(e) = sink.send(msg).await {
            warn!("WebSocket write error: {e}");
            cancel.cancel();
            return;
        }
        last_write = Instant::now();
    }

    let _ = sink.send(tungstenite::Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;
    use std::time::Duration;

    fn recording_sink(
        tx: mpsc::UnboundedSender<tungstenite::Message>,
    ) -> impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(sink::unfold(tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg);
            Ok::<_, tungstenite::Error>(tx)
        }))
    }

    fn failing_sink() -> impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(sink::unfold((), |(), _msg: tungstenite::Message| async move {
            Err::<(), _>(tungstenite::Error::ConnectionClosed)
        }))
    }

    #[tokio::test]
    async fn maps_each_kind_then_closes_on_cancel() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(recording_sink(sink_tx), out_rx, cancel.clone()));

        out_tx.send(Outbound::Text("{}".into())).await.unwrap();
        out_tx.send(Outbound::Slice(vec![0, 0, 0, 2, b'{', b'}'])).await.unwrap();
        out_tx.send(Outbound::Pong(vec![7])).await.unwrap();

        assert!(matches!(sink_rx.recv().await, Some(tungstenite::Message::Text(_))));
        match sink_rx.recv().await {
            Some(tungstenite::Message::Binary(b)) => assert_eq!(b.len(), 6),
            other => panic!("expected binary frame, got {other:?}"),
        }
        match sink_rx.recv().await {
            Some(tungstenite::Message::Pong(p)) => assert_eq!(p.to_vec(), vec![7]),
            other => panic!("expected pong, got {other:?}"),
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
        assert!(matches!(sink_rx.recv().await, Some(tungstenite::Message::Close(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn pings_only_when_idle() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(recording_sink(sink_tx), out_rx, cancel.clone()));

        // Traffic just before the first tick suppresses that ping.
        tokio::time::sleep(WS_PING_PERIOD - Duration::from_secs(1)).await;
        out_tx.send(Outbound::Text("{}".into())).await.unwrap();
        assert!(matches!(sink_rx.recv().await, Some(tungstenite::Message::Text(_))));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sink_rx.try_recv().is_err());

        // A full idle period later a ping goes out.
        tokio::time::sleep(WS_PING_PERIOD).await;
        assert!(matches!(sink_rx.recv().await, Some(tungstenite::Message::Ping(_))));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn write_failure_cancels_connection() {
        let (out_tx, out_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(failing_sink(), out_rx, cancel.clone()));

        out_tx.send(Outbound::Text("{}".into())).await.unwrap();
        handle.await.unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn closes_when_senders_are_gone() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::channel(16);
        drop(out_tx);

        write_pump(recording_sink(sink_tx), out_rx, CancellationToken::new()).await;
        assert!(matches!(sink_rx.recv().await, Some(tungstenite::Message::Close(_))));
    }
}
