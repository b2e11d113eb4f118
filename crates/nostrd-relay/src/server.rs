// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay server
//!
//! HTTP/1 front end on a single port: requests accepting
//! `application/nostr+json` get the NIP11 information document, WebSocket
//! upgrades become relay connections, anything else a landing page.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::header::{ACCEPT, CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::server::conn::http1;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::connection::{self, Services};
use crate::dispatcher::ConnectionId;

const NOSTR_JSON_MIME: &str = "application/nostr+json";

/// Accept TCP connections until shutdown
pub(crate) async fn accept_loop(
    listener: TcpListener,
    services: Services,
    shutdown: broadcast::Sender<()>,
    connections_limit: Arc<Semaphore>,
    info_json: Arc<String>,
) {
    let next_conn_id: Arc<AtomicU64> = Arc::new(AtomicU64::new(0));
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            output = listener.accept() => {
                match output {
                    Ok((stream, addr)) => {
                        let service = RelayService {
                            services: services.clone(),
                            shutdown: shutdown.clone(),
                            connections_limit: connections_limit.clone(),
                            next_conn_id: next_conn_id.clone(),
                            info_json: info_json.clone(),
                            remote: addr,
                        };
                        tokio::spawn(async move {
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service)
                                .with_upgrades()
                                .await
                            {
                                tracing::debug!(%addr, "HTTP connection error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Can't accept incoming connection: {e}");
                    }
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    tracing::info!("Relay listener loop terminated.");
}

/// Per-TCP-connection HTTP service
struct RelayService {
    services: Services,
    shutdown: broadcast::Sender<()>,
    connections_limit: Arc<Semaphore>,
    next_conn_id: Arc<AtomicU64>,
    info_json: Arc<String>,
    remote: SocketAddr,
}

impl RelayService {
    fn accepts_nostr_json(req: &Request<Incoming>) -> bool {
        req.headers()
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains(NOSTR_JSON_MIME))
            .unwrap_or(false)
    }

    fn is_websocket_upgrade(req: &Request<Incoming>) -> bool {
        let connection_upgrade: bool = req
            .headers()
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_lowercase().contains("upgrade"))
            .unwrap_or(false);
        let upgrade_websocket: bool = req
            .headers()
            .get(UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        connection_upgrade && upgrade_websocket
    }
}

impl Service<Request<Incoming>> for RelayService {
    type Response = Response<String>;
    type Error = hyper::http::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        // NIP11 content negotiation
        if Self::accepts_nostr_json(&req) {
            let info: Arc<String> = self.info_json.clone();
            return Box::pin(async move {
                Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", NOSTR_JSON_MIME)
                    .header("access-control-allow-origin", "*")
                    .body(info.as_ref().clone())
            });
        }

        // WebSocket upgrade
        if Self::is_websocket_upgrade(&req) {
            let derived: Option<String> = req
                .headers()
                .get(SEC_WEBSOCKET_KEY)
                .map(|key| derive_accept_key(key.as_bytes()));

            let Some(derived) = derived else {
                return Box::pin(async move {
                    Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .body("missing sec-websocket-key".to_string())
                });
            };

            let services: Services = self.services.clone();
            let shutdown_rx = self.shutdown.subscribe();
            let connections_limit: Arc<Semaphore> = self.connections_limit.clone();
            let conn_id: ConnectionId = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
            let addr: SocketAddr = self.remote;

            tokio::spawn(async move {
                // Admission ceiling
                let permit = match connections_limit.try_acquire() {
                    Ok(permit) => permit,
                    Err(..) => {
                        tracing::warn!(%addr, "Connection limit reached, rejecting.");
                        return;
                    }
                };

                match hyper::upgrade::on(req).await {
                    Ok(upgraded) => {
                        let ws_stream = WebSocketStream::from_raw_socket(
                            TokioIo::new(upgraded),
                            Role::Server,
                            None,
                        )
                        .await;
                        if let Err(e) = connection::handle_connection(
                            services,
                            ws_stream,
                            conn_id,
                            addr,
                            shutdown_rx,
                        )
                        .await
                        {
                            tracing::debug!(%addr, "Connection error: {e}");
                        }
                    }
                    Err(e) => tracing::debug!(%addr, "Upgrade error: {e}"),
                }

                drop(permit);
            });

            return Box::pin(async move {
                Response::builder()
                    .status(StatusCode::SWITCHING_PROTOCOLS)
                    .header(CONNECTION, "upgrade")
                    .header(UPGRADE, "websocket")
                    .header(SEC_WEBSOCKET_ACCEPT, derived)
                    .body(String::new())
            });
        }

        // Landing page
        Box::pin(async move {
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/html")
                .body("<html><body><h1>nostrd</h1><p>A Nostr relay. Connect with a WebSocket client.</p></body></html>".to_string())
        })
    }
}
