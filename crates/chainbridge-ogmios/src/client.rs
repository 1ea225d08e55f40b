//! WebSocket chain-sync client.
//!
//! Each subscription owns one connection. It sends `findIntersection` with
//! the candidate points, then keeps up to `pipeline_depth` `nextBlock`
//! requests in flight and hands every text frame back to the caller
//! undecoded. Reconnecting is the sync loop's job.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainbridge_core::error::BridgeError;
use chainbridge_core::feed::{ChainFeed, FeedSubscription, SubscriptionCloser};
use chainbridge_core::frame::{find_intersection_request, next_block_request};
use chainbridge_core::types::ResumePoint;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the chain-sync client.
#[derive(Debug, Clone)]
pub struct OgmiosConfig {
    /// `ws://` or `wss://` endpoint.
    pub endpoint: String,
    /// Time allowed for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// `nextBlock` requests kept in flight.
    pub pipeline_depth: usize,
}

impl Default for OgmiosConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:1337".into(),
            connect_timeout: Duration::from_secs(10),
            pipeline_depth: 1,
        }
    }
}

/// Chain feed backed by an Ogmios server.
pub struct OgmiosFeed {
    config: OgmiosConfig,
}

impl OgmiosFeed {
    pub fn new(config: OgmiosConfig) -> Self {
        Self { config }
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

fn feed_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Feed(e.to_string())
}

#[async_trait]
impl ChainFeed for OgmiosFeed {
    async fn subscribe(
        &self,
        points: &[ResumePoint],
    ) -> Result<Box<dyn FeedSubscription>, BridgeError> {
        let url = &self.config.endpoint;
        tracing::info!(url = %url, candidates = points.len(), "connecting via WebSocket");

        let (ws, _) = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| feed_err(format!("connect to {url} timed out")))?
        .map_err(feed_err)?;

        let (mut sink, stream) = ws.split();
        sink.send(Message::Text(find_intersection_request(points).into()))
            .await
            .map_err(feed_err)?;

        Ok(Box::new(OgmiosSubscription {
            sink,
            stream,
            closer: SubscriptionCloser::new(),
            pipeline_depth: self.config.pipeline_depth.max(1),
            in_flight: 1,
            intersected: false,
        }))
    }
}

struct OgmiosSubscription {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    closer: SubscriptionCloser,
    pipeline_depth: usize,
    /// Requests sent but not yet answered.
    in_flight: usize,
    /// `findIntersection` has been answered.
    intersected: bool,
}

impl OgmiosSubscription {
    async fn top_up(&mut self) -> Result<(), BridgeError> {
        while self.intersected && self.in_flight < self.pipeline_depth {
            self.sink
                .send(Message::Text(next_block_request().into()))
                .await
                .map_err(feed_err)?;
            self.in_flight += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl FeedSubscription for OgmiosSubscription {
    async fn next_frame(&mut self) -> Result<Option<String>, BridgeError> {
        if self.closer.is_closed() {
            return Ok(None);
        }
        self.top_up().await?;

        loop {
            tokio::select! {
                _ = self.closer.closed() => {
                    let _ = self.sink.close().await;
                    return Ok(None);
                }
                msg = self.stream.next() => match msg {
                    None => return Err(feed_err("connection closed by server")),
                    Some(Err(e)) => return Err(feed_err(e)),
                    Some(Ok(Message::Text(text))) => {
                        self.in_flight = self.in_flight.saturating_sub(1);
                        self.intersected = true;
                        return Ok(Some(text.to_string()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(feed_err(format!("server closed the connection: {frame:?}")));
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    fn closer(&self) -> SubscriptionCloser {
        self.closer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainbridge_core::frame::{decode_frame, Frame};
    use chainbridge_core::types::Point;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serve one connection, answering each request with the next canned response.
    async fn serve(responses: Vec<String>) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut responses = responses.into_iter();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(req) = msg {
                    let _ = seen_tx.send(serde_json::from_str::<Value>(&req.to_string()).unwrap());
                    match responses.next() {
                        Some(r) => ws.send(Message::Text(r.into())).await.unwrap(),
                        None => break,
                    }
                }
            }
        });

        (format!("ws://{addr}"), seen_rx)
    }

    fn feed(url: String) -> OgmiosFeed {
        OgmiosFeed::new(OgmiosConfig {
            endpoint: url,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn intersects_then_requests_blocks() {
        let (url, mut seen) = serve(vec![
            json!({"jsonrpc": "2.0", "method": "findIntersection",
                   "result": {"intersection": {"slot": 5, "id": "h5"}, "tip": {"slot": 9, "id": "h9"}}})
            .to_string(),
            json!({"jsonrpc": "2.0", "method": "nextBlock",
                   "result": {"direction": "backward", "point": {"slot": 5, "id": "h5"}}})
            .to_string(),
        ])
        .await;

        let mut sub = feed(url)
            .subscribe(&[ResumePoint::At(Point::new(5, "h5")), ResumePoint::Origin])
            .await
            .unwrap();

        let first = sub.next_frame().await.unwrap().unwrap();
        assert!(matches!(decode_frame(&first).unwrap(), Frame::IntersectionFound(Some(_))));
        let second = sub.next_frame().await.unwrap().unwrap();
        assert!(matches!(decode_frame(&second).unwrap(), Frame::RollBackward(Some(_))));

        let req = seen.recv().await.unwrap();
        assert_eq!(req["method"], "findIntersection");
        assert_eq!(req["params"]["points"][1], "origin");
        assert_eq!(seen.recv().await.unwrap()["method"], "nextBlock");
    }

    #[tokio::test]
    async fn server_hangup_is_a_feed_error() {
        let (url, _seen) = serve(vec![]).await;
        let mut sub = feed(url).subscribe(&[ResumePoint::Origin]).await.unwrap();
        assert!(matches!(sub.next_frame().await, Err(BridgeError::Feed(_))));
    }

    #[tokio::test]
    async fn closing_ends_the_subscription() {
        let (url, _seen) = serve(vec![json!({"jsonrpc": "2.0", "method": "findIntersection",
            "result": {"intersection": "origin", "tip": "origin"}})
        .to_string()])
        .await;
        let mut sub = feed(url).subscribe(&[ResumePoint::Origin]).await.unwrap();
        sub.closer().close();
        assert_eq!(sub.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_fast() {
        let feed = OgmiosFeed::new(OgmiosConfig {
            endpoint: "ws://127.0.0.1:1".into(),
            connect_timeout: Duration::from_millis(500),
            pipeline_depth: 1,
        });
        assert!(matches!(
            feed.subscribe(&[ResumePoint::Origin]).await,
            Err(BridgeError::Feed(_))
        ));
    }
}
