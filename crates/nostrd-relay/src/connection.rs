// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Connection state machine
//!
//! One actor per WebSocket: a reader task decoding frames into commands and
//! a writer task that is the sole owner of the socket write half, fed by a
//! bounded channel. Frames are delivered in enqueue order.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nostrd_protocol::message::MessageHandleError;
use nostrd_protocol::nips::nip42;
use nostrd_protocol::{
    ClientMessage, Event, EventId, Filter, Kind, MachineReadablePrefix, RelayMessage,
    SubscriptionId, Timestamp,
};
use nostrd_store::{EventStore, RejectedReason, SaveEventStatus};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::config::Config;
use crate::dispatcher::{ConnectionId, Dispatcher};
use crate::error::Error;
use crate::limiter::{Decision, RateLimiter};
use crate::processor::{EventProcessor, ProcessError, SubmitError};
use crate::session::Session;
use crate::validator::Validator;

type WsTx<S> = SplitSink<WebSocketStream<S>, Message>;
type WsRx<S> = SplitStream<WebSocketStream<S>>;

/// Shared services handed to every connection
#[derive(Debug, Clone)]
pub(crate) struct Services {
    pub config: Arc<Config>,
    pub store: Arc<dyn EventStore>,
    pub dispatcher: Dispatcher,
    pub processor: EventProcessor,
    pub limiter: Arc<RateLimiter>,
    pub validator: Arc<Validator>,
}

/// Drive a WebSocket connection until it closes or the node shuts down
pub(crate) async fn handle_connection<S>(
    services: Services,
    ws_stream: WebSocketStream<S>,
    conn_id: ConnectionId,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::debug!(%addr, "WebSocket connection established.");

    let (ws_tx, ws_rx) = ws_stream.split();
    let (msg_tx, msg_rx) = mpsc::channel::<RelayMessage>(services.config.send_queue_size);
    let (pong_tx, pong_rx) = watch::channel::<Vec<u8>>(Vec::new());
    let kick: Arc<Notify> = Arc::new(Notify::new());

    let mut session: Session = Session::new();
    services
        .dispatcher
        .register_connection(conn_id, msg_tx.clone(), kick.clone())
        .await;

    // Opening state: challenge the client before anything else
    let _ = msg_tx
        .send(RelayMessage::auth(session.challenge().to_string()))
        .await;

    let conn = Connection {
        services,
        conn_id,
        addr,
    };

    tokio::select! {
        res = conn.receiver_message_handler(ws_rx, &msg_tx, pong_tx, &mut session) => match res {
            Ok(()) => tracing::trace!(%addr, "Relay receiver exited."),
            Err(e) => tracing::debug!(%addr, error = %e, "Relay receiver exited with error."),
        },
        res = conn.sender_message_handler(ws_tx, msg_rx, pong_rx) => match res {
            Ok(()) => tracing::trace!(%addr, "Relay sender exited."),
            Err(e) => tracing::debug!(%addr, error = %e, "Relay sender exited with error."),
        },
        _ = kick.notified() => {
            tracing::warn!(%addr, "Disconnecting slow consumer.");
        }
        _ = shutdown.recv() => {}
    }

    conn.services.dispatcher.unregister_connection(conn_id).await;

    tracing::debug!(%addr, "WebSocket connection terminated.");

    Ok(())
}

struct Connection {
    services: Services,
    conn_id: ConnectionId,
    addr: SocketAddr,
}

impl Connection {
    async fn receiver_message_handler<S>(
        &self,
        mut ws_rx: WsRx<S>,
        tx: &mpsc::Sender<RelayMessage>,
        pong_tx: watch::Sender<Vec<u8>>,
        session: &mut Session,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle = self.services.config.idle_timeout();

        loop {
            let msg = match timeout(idle, ws_rx.next()).await {
                Ok(Some(msg)) => msg?,
                Ok(None) => break,
                Err(..) => {
                    tracing::debug!(addr = %self.addr, "Idle timeout.");
                    break;
                }
            };

            match msg {
                Message::Text(json) => {
                    tracing::trace!("Received {json}");
                    if json.len() > self.services.config.max_message_length {
                        self.send(tx, RelayMessage::notice("message too large")).await?;
                        break;
                    }
                    self.handle_client_msg(session, tx, &json).await?;
                }
                Message::Binary(..) => {
                    self.send(
                        tx,
                        RelayMessage::notice("binary messages are not processed by this relay"),
                    )
                    .await?;
                }
                Message::Ping(val) => {
                    let _ = pong_tx.send(val);
                }
                Message::Pong(..) => {}
                Message::Close(..) => break,
                Message::Frame(..) => {}
            }
        }

        Ok(())
    }

    async fn sender_message_handler<S>(
        &self,
        mut ws_tx: WsTx<S>,
        mut msg_rx: mpsc::Receiver<RelayMessage>,
        mut pong_rx: watch::Receiver<Vec<u8>>,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let write_timeout = self.services.config.write_timeout();

        loop {
            tokio::select! {
                msg = msg_rx.recv() => match msg {
                    Some(msg) => {
                        let json: String = msg.as_json();
                        tracing::trace!("Sending {json}");
                        timeout(write_timeout, ws_tx.send(Message::Text(json)))
                            .await
                            .map_err(|_| Error::WriteTimeout)??;
                    }
                    None => break,
                },
                Ok(()) = pong_rx.changed() => {
                    let data: Vec<u8> = pong_rx.borrow_and_update().to_vec();
                    timeout(write_timeout, ws_tx.send(Message::Pong(data)))
                        .await
                        .map_err(|_| Error::WriteTimeout)??;
                }
                else => break,
            }
        }

        // Closing state: best-effort close frame
        let _ = timeout(write_timeout, ws_tx.send(Message::Close(None))).await;

        Ok(())
    }

    async fn handle_client_msg(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<RelayMessage>,
        json: &str,
    ) -> Result<(), Error> {
        match ClientMessage::from_json(json) {
            Ok(ClientMessage::Event(event)) => self.handle_event(session, tx, *event).await,
            Ok(ClientMessage::Req {
                subscription_id,
                filters,
            }) => self.handle_req(session, tx, subscription_id, filters).await,
            Ok(ClientMessage::Count {
                subscription_id,
                filters,
            }) => self.handle_count(session, tx, subscription_id, filters).await,
            Ok(ClientMessage::Close(subscription_id)) => {
                session.subscriptions.remove(&subscription_id);
                self.services
                    .dispatcher
                    .unregister_subscription(self.conn_id, &subscription_id)
                    .await;
                Ok(())
            }
            Ok(ClientMessage::Auth(event)) => self.handle_auth(session, tx, *event).await,
            Err(MessageHandleError::UnknownCommand(..)) => {
                self.send(tx, RelayMessage::notice("unknown command")).await
            }
            Err(e) => {
                self.send(tx, RelayMessage::notice(format!("invalid: {e}")))
                    .await
            }
        }
    }

    async fn handle_event(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<RelayMessage>,
        event: Event,
    ) -> Result<(), Error> {
        let config: &Config = &self.services.config;
        let event_id: EventId = event.id;

        // Validation
        let now: Timestamp = Timestamp::now();
        if let Err(reason) = self.services.validator.validate(&event, now) {
            return self.send_ok(tx, event_id, false, reason.to_string()).await;
        }

        // Rate limit by author and by remote
        for (key, rate) in [
            (
                format!("pub:{}", event.pubkey),
                config.rate_limit.max_events_per_second,
            ),
            (
                format!("conn:{}", self.addr.ip()),
                config.rate_limit.max_events_per_second,
            ),
        ] {
            match self.services.limiter.allow(&key, rate) {
                Decision::Allowed => {}
                Decision::Limited => {
                    return self
                        .send_ok(tx, event_id, false, rate_limited("slow down"))
                        .await;
                }
                Decision::Banned => {
                    return self
                        .send_ok(tx, event_id, false, rate_limited("you are banned"))
                        .await;
                }
            }
        }

        // Admission set
        if config.blacklist_pubkeys.contains(&event.pubkey) {
            return self
                .send_ok(tx, event_id, false, blocked("pubkey is banned on this relay"))
                .await;
        }
        if !config.whitelist_pubkeys.is_empty()
            && !config.whitelist_pubkeys.contains(&event.pubkey)
        {
            return self
                .send_ok(tx, event_id, false, blocked("writes are restricted on this relay"))
                .await;
        }

        // Protected events require the author on this connection (NIP70)
        if event.is_protected() && !session.is_authed(&event.pubkey) {
            return self
                .send_ok(
                    tx,
                    event_id,
                    false,
                    auth_required("this event may only be published by its author"),
                )
                .await;
        }

        // Vanished authors stay vanished
        match self.services.store.is_vanished(&event.pubkey).await {
            Ok(true) => {
                return self
                    .send_ok(tx, event_id, false, blocked("pubkey vanished"))
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, "Vanish lookup failed.");
                return self
                    .send_ok(tx, event_id, false, error_msg("storage unavailable"))
                    .await;
            }
        }

        // NIP42 auth can arrive as a plain EVENT frame
        if event.kind == Kind::AUTHENTICATION {
            return self.authenticate(session, tx, event).await;
        }

        // Hand over to the processor
        let class = self.services.validator.classify(&event);
        let reply = match self.services.processor.submit(self.conn_id, event, class) {
            Ok(reply) => reply,
            Err(SubmitError::Busy) => {
                return self
                    .send_ok(tx, event_id, false, error_msg("relay busy"))
                    .await;
            }
            Err(SubmitError::Closed) => {
                return self
                    .send_ok(tx, event_id, false, error_msg("relay shutting down"))
                    .await;
            }
        };

        let msg: RelayMessage = match reply.await {
            Ok(Ok(SaveEventStatus::Success)) => RelayMessage::ok(event_id, true, ""),
            Ok(Ok(SaveEventStatus::Rejected(reason))) => rejection_message(event_id, reason),
            Ok(Err(ProcessError::Store(e))) => {
                tracing::error!(error = %e, "Can't save event into the store.");
                RelayMessage::ok(event_id, false, error_msg("storage unavailable"))
            }
            Ok(Err(ProcessError::Internal)) | Err(..) => {
                RelayMessage::ok(event_id, false, error_msg("internal error"))
            }
        };

        self.send(tx, msg).await
    }

    async fn handle_req(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<RelayMessage>,
        subscription_id: SubscriptionId,
        filters: Vec<Filter>,
    ) -> Result<(), Error> {
        let config: &Config = &self.services.config;

        // Request rate limit
        if !self
            .services
            .limiter
            .allow(
                &format!("req:{}", self.addr.ip()),
                config.rate_limit.max_requests_per_second,
            )
            .is_allowed()
        {
            return self
                .send(
                    tx,
                    RelayMessage::closed(subscription_id, rate_limited("slow down")),
                )
                .await;
        }

        // Subscription id and filter sanity
        if subscription_id.is_empty() || subscription_id.len() > config.max_subid_length {
            return self
                .send(
                    tx,
                    RelayMessage::closed(subscription_id, invalid("subscription id length")),
                )
                .await;
        }
        if filters.is_empty() {
            return self
                .send(
                    tx,
                    RelayMessage::closed(subscription_id, invalid("no filters")),
                )
                .await;
        }
        if filters.len() > config.max_filters_per_req {
            return self
                .send(
                    tx,
                    RelayMessage::closed(subscription_id, invalid("too many filters")),
                )
                .await;
        }

        // Reject new subscriptions over the ceiling; never evict existing ones
        if session.subscriptions.len() >= config.max_subscriptions
            && !session.subscriptions.contains_key(&subscription_id)
        {
            return self
                .send(
                    tx,
                    RelayMessage::closed(subscription_id, rate_limited("too many REQs")),
                )
                .await;
        }

        // Clamp limits
        let filters: Vec<Filter> = filters
            .into_iter()
            .map(|mut f| {
                f.limit = Some(f.limit.unwrap_or(config.max_limit).min(config.max_limit));
                f
            })
            .collect();

        session
            .subscriptions
            .insert(subscription_id.clone(), filters.clone());

        // Register first so live matches are parked while the replay runs
        self.services
            .dispatcher
            .register_subscription(self.conn_id, subscription_id.clone(), filters.clone())
            .await;

        let (results, watermark) = match self.services.store.query_with_watermark(&filters).await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "Historical query failed.");
                session.subscriptions.remove(&subscription_id);
                self.services
                    .dispatcher
                    .unregister_subscription(self.conn_id, &subscription_id)
                    .await;
                return self
                    .send(
                        tx,
                        RelayMessage::closed(subscription_id, error_msg("storage unavailable")),
                    )
                    .await;
            }
        };

        // Historical replay, deduplicated across filters
        let mut seen: HashSet<EventId> = HashSet::new();
        let mut replayed: usize = 0;
        for events in results.into_iter() {
            for event in events.into_iter() {
                if seen.insert(event.id) {
                    replayed += 1;
                    self.send(tx, RelayMessage::event(subscription_id.clone(), event))
                        .await?;
                }
            }
        }

        tracing::debug!(
            id = %subscription_id,
            replayed,
            "Subscription replay complete."
        );

        self.send(tx, RelayMessage::eose(subscription_id.clone())).await?;

        // Live from the watermark onward
        self.services
            .dispatcher
            .activate_subscription(self.conn_id, &subscription_id, watermark)
            .await;

        Ok(())
    }

    async fn handle_count(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<RelayMessage>,
        subscription_id: SubscriptionId,
        filters: Vec<Filter>,
    ) -> Result<(), Error> {
        let config: &Config = &self.services.config;

        if !self
            .services
            .limiter
            .allow(
                &format!("req:{}", self.addr.ip()),
                config.rate_limit.max_requests_per_second,
            )
            .is_allowed()
        {
            return self
                .send(
                    tx,
                    RelayMessage::closed(subscription_id, rate_limited("slow down")),
                )
                .await;
        }

        if config.count_requires_auth && !session.has_authed() {
            return self
                .send(
                    tx,
                    RelayMessage::closed(
                        subscription_id,
                        auth_required("auth required for COUNT"),
                    ),
                )
                .await;
        }

        if filters.is_empty() || filters.len() > config.max_filters_per_req {
            return self
                .send(
                    tx,
                    RelayMessage::closed(subscription_id, invalid("filter count")),
                )
                .await;
        }

        let count: Result<usize, Error> = if filters.len() == 1 {
            self.services
                .store
                .count(filters[0].clone())
                .await
                .map_err(Error::from)
        } else {
            // Union across filters, counted by distinct id
            let mut seen: HashSet<EventId> = HashSet::new();
            let mut res: Result<usize, Error> = Ok(0);
            for mut filter in filters.into_iter() {
                filter.limit = None;
                match self.services.store.query(filter).await {
                    Ok(events) => seen.extend(events.into_iter().map(|e| e.id)),
                    Err(e) => {
                        res = Err(Error::from(e));
                        break;
                    }
                }
            }
            res.map(|_| seen.len())
        };

        match count {
            Ok(count) => {
                self.send(tx, RelayMessage::count(subscription_id, count))
                    .await
            }
            Err(e) => {
                tracing::error!(error = %e, "Count query failed.");
                self.send(
                    tx,
                    RelayMessage::closed(subscription_id, error_msg("storage unavailable")),
                )
                .await
            }
        }
    }

    async fn handle_auth(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<RelayMessage>,
        event: Event,
    ) -> Result<(), Error> {
        let event_id: EventId = event.id;

        // An AUTH frame carries a regular signed event: same checks
        let now: Timestamp = Timestamp::now();
        if let Err(reason) = self.services.validator.validate(&event, now) {
            return self.send_ok(tx, event_id, false, reason.to_string()).await;
        }

        match self.services.store.is_vanished(&event.pubkey).await {
            Ok(true) => {
                return self
                    .send_ok(tx, event_id, false, blocked("pubkey vanished"))
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, "Vanish lookup failed.");
                return self
                    .send_ok(tx, event_id, false, error_msg("storage unavailable"))
                    .await;
            }
        }

        self.authenticate(session, tx, event).await
    }

    /// Check the NIP42 envelope of an already-validated, non-vanished event
    async fn authenticate(
        &self,
        session: &mut Session,
        tx: &mpsc::Sender<RelayMessage>,
        event: Event,
    ) -> Result<(), Error> {
        let event_id: EventId = event.id;

        if nip42::is_valid_auth_event(&event, &self.services.config.public_url, session.challenge())
        {
            session.authenticate(event.pubkey);
            tracing::debug!(addr = %self.addr, pubkey = %event.pubkey, "Client authenticated.");
            self.send_ok(tx, event_id, true, "").await
        } else {
            self.send_ok(tx, event_id, false, auth_required("invalid auth event"))
                .await
        }
    }

    #[inline]
    async fn send(&self, tx: &mpsc::Sender<RelayMessage>, msg: RelayMessage) -> Result<(), Error> {
        tx.send(msg).await.map_err(|_| Error::ChannelClosed)
    }

    #[inline]
    async fn send_ok<S>(
        &self,
        tx: &mpsc::Sender<RelayMessage>,
        event_id: EventId,
        status: bool,
        message: S,
    ) -> Result<(), Error>
    where
        S: Into<String>,
    {
        self.send(tx, RelayMessage::ok(event_id, status, message))
            .await
    }
}

/// Map a store rejection onto the wire
fn rejection_message(event_id: EventId, reason: RejectedReason) -> RelayMessage {
    match reason {
        // An already-known event is an accepted outcome
        RejectedReason::Duplicate => {
            RelayMessage::ok(event_id, true, duplicate("already have this event"))
        }
        RejectedReason::Replaced => {
            RelayMessage::ok(event_id, false, blocked("replaced by a newer event"))
        }
        RejectedReason::Deleted => {
            RelayMessage::ok(event_id, false, blocked("this event was deleted"))
        }
        RejectedReason::Vanished => {
            RelayMessage::ok(event_id, false, blocked("pubkey vanished"))
        }
        RejectedReason::Expired => {
            RelayMessage::ok(event_id, false, invalid("event is expired"))
        }
        RejectedReason::InvalidDelete => RelayMessage::ok(
            event_id,
            false,
            blocked("can't delete events of other authors"),
        ),
        RejectedReason::Ephemeral | RejectedReason::Other => {
            RelayMessage::ok(event_id, false, error_msg("unknown"))
        }
    }
}

fn duplicate(msg: &str) -> String {
    format!("{}: {msg}", MachineReadablePrefix::Duplicate)
}

fn invalid(msg: &str) -> String {
    format!("{}: {msg}", MachineReadablePrefix::Invalid)
}

fn blocked(msg: &str) -> String {
    format!("{}: {msg}", MachineReadablePrefix::Blocked)
}

fn rate_limited(msg: &str) -> String {
    format!("{}: {msg}", MachineReadablePrefix::RateLimited)
}

fn auth_required(msg: &str) -> String {
    format!("{}: {msg}", MachineReadablePrefix::AuthRequired)
}

fn error_msg(msg: &str) -> String {
    format!("{}: {msg}", MachineReadablePrefix::Error)
}
