//! TCP server implementation.

use crate::broker::Broker;
use crate::config::Config;
use crate::error::ServerError;
use crate::handler::{FrameHandler, Reply};
use crate::session::{Session, SessionState};
use bytes::BytesMut;
use relaymq_codec::{Close, Decoder, Encoder, ErrorInfo, Performative, DEFAULT_MAX_FRAME_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest frame accepted or sent.
    pub max_frame_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5672)),
            idle_timeout: Duration::from_secs(300),
            max_connections: 1000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds the server settings from the broker configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            idle_timeout: config.network.idle_timeout(),
            max_connections: config.network.max_connections,
            max_frame_size: config.codec.max_frame_size,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for relaymq.
pub struct Server {
    config: ServerConfig,
    handler: Arc<FrameHandler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, broker: Arc<Broker>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler: Arc::new(FrameHandler::new(broker)),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                tracing::info!("Client connected: {}", addr);
                                let result = Self::handle_connection(
                                    stream,
                                    addr,
                                    &handler,
                                    &config,
                                    &stats,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Runs one connection to completion. Whatever the connection's
    /// transaction still holds is rolled back when it ends.
    pub async fn handle_connection<S>(
        mut stream: S,
        addr: SocketAddr,
        handler: &FrameHandler,
        config: &ServerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let broker = handler.broker();
        let connection_id = broker.next_connection_id();
        let mut session = Session::new(connection_id, addr, broker.begin_transaction(connection_id));
        let mut decoder = Decoder::new(broker.value_handler(), config.max_frame_size);

        let result = Self::connection_loop(
            &mut stream,
            &mut session,
            &mut decoder,
            handler,
            config,
            stats,
            shutdown,
        )
        .await;

        let discarded = session.end();
        if discarded > 0 {
            tracing::debug!(
                "[{}] Rolled back {} uncommitted messages on disconnect",
                addr,
                discarded
            );
        }
        result
    }

    async fn connection_loop<S>(
        stream: &mut S,
        session: &mut Session,
        decoder: &mut Decoder,
        handler: &FrameHandler,
        config: &ServerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let addr = session.remote_addr;
        let mut buf = [0u8; 8192];

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by client", addr);
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::trace!("[{}] Received {} bytes", addr, n);
                            session.touch();
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                _ = tokio::time::sleep(config.idle_timeout) => {
                    if session.idle_duration() > config.idle_timeout {
                        tracing::debug!("[{}] Idle timeout", addr);
                        return Ok(());
                    }
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    if session.state() == SessionState::Open {
                        // Best effort; the peer may already be gone
                        let _ = Self::send_close(stream, None, config.max_frame_size).await;
                    }
                    return Err(ServerError::ShuttingDown);
                }
            }

            if session.state() == SessionState::AwaitingHeader {
                match decoder.decode_header() {
                    Ok(None) => continue,
                    Ok(Some(())) => {
                        let mut header = BytesMut::new();
                        Encoder::encode_header(&mut header);
                        stream.write_all(&header).await?;
                        session.set_state(SessionState::Open);
                        tracing::debug!("[{}] Protocol header exchanged", addr);
                    }
                    Err(e) => {
                        tracing::warn!("[{}] Rejecting connection: {}", addr, e);
                        let mut header = BytesMut::new();
                        Encoder::encode_header(&mut header);
                        stream.write_all(&header).await?;
                        return Err(e.into());
                    }
                }
            }

            loop {
                let frame = match decoder.decode_performative() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("[{}] Malformed input: {}", addr, e);
                        let error = ErrorInfo::new(e.error_condition(), e.to_string());
                        Self::send_close(stream, Some(error), config.max_frame_size).await?;
                        return Err(e.into());
                    }
                };
                stats.frames_total.fetch_add(1, Ordering::Relaxed);

                match handler.handle(session, frame).await {
                    Reply::None => {}
                    Reply::Send(channel, performative) => {
                        let bytes = Encoder::encode_performative(
                            channel,
                            &performative,
                            &[],
                            config.max_frame_size,
                        )?;
                        stream.write_all(&bytes).await?;
                    }
                    Reply::Close(error) => {
                        Self::send_close(stream, error, config.max_frame_size).await?;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn send_close<S>(
        stream: &mut S,
        error: Option<ErrorInfo>,
        max_frame_size: u32,
    ) -> Result<(), ServerError>
    where
        S: AsyncWrite + Unpin,
    {
        let close = Performative::Close(Close { error });
        let bytes = Encoder::encode_performative(0, &close, &[], max_frame_size)?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use relaymq_codec::{
        Discharge, Disposition, ErrorCondition, IncomingFrame, Role, Transfer, PROTOCOL_HEADER,
    };
    use relaymq_core::MemoryEventLogger;
    use tempfile::TempDir;
    use tokio::net::TcpStream;

    async fn start_server() -> (TempDir, Arc<Server>, Arc<Broker>, SocketAddr) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        let broker = Broker::open(config, Arc::new(MemoryEventLogger::new())).unwrap();
        broker.start().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(ServerConfig::new(addr), broker.clone()));
        let running = server.clone();
        tokio::spawn(async move { running.serve(listener).await });

        (dir, server, broker, addr)
    }

    /// Minimal client side of the connection protocol.
    struct Client {
        stream: TcpStream,
        decoder: Decoder,
    }

    impl Client {
        async fn connect(addr: SocketAddr, broker: &Broker) -> Self {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&PROTOCOL_HEADER).await.unwrap();
            let mut client = Self {
                stream,
                decoder: Decoder::new(broker.value_handler(), DEFAULT_MAX_FRAME_SIZE),
            };
            loop {
                if client.decoder.decode_header().unwrap().is_some() {
                    break;
                }
                client.read_more().await;
            }
            client
        }

        async fn read_more(&mut self) -> usize {
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await.unwrap();
            self.decoder.extend(&buf[..n]);
            n
        }

        async fn send(&mut self, performative: Performative, payload: &[u8]) {
            let bytes =
                Encoder::encode_performative(0, &performative, payload, DEFAULT_MAX_FRAME_SIZE)
                    .unwrap();
            self.stream.write_all(&bytes).await.unwrap();
        }

        async fn receive(&mut self) -> Option<IncomingFrame> {
            loop {
                if let Some(frame) = self.decoder.decode_performative().unwrap() {
                    return Some(frame);
                }
                if self.read_more().await == 0 {
                    return None;
                }
            }
        }
    }

    fn transfer(delivery_id: u32, address: &str) -> Performative {
        Performative::Transfer(Transfer {
            delivery_id,
            address: Some(address.to_string()),
        })
    }

    #[tokio::test]
    async fn test_server_not_running_before_serve() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        let broker = Broker::open(config, Arc::new(MemoryEventLogger::new())).unwrap();
        let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()), broker);
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_transfer_and_commit_over_tcp() {
        let (_dir, server, broker, addr) = start_server().await;
        let mut client = Client::connect(addr, &broker).await;

        client.send(transfer(1, "orders"), b"first").await;
        client.send(transfer(2, "orders"), b"second").await;
        for expected in [1, 2] {
            let frame = client.receive().await.unwrap();
            assert_eq!(
                frame.performative,
                Some(Performative::Disposition(Disposition {
                    role: Role::Receiver,
                    first: expected,
                    settled: true,
                }))
            );
        }

        client
            .send(Performative::Discharge(Discharge { fail: false }), &[])
            .await;
        let frame = client.receive().await.unwrap();
        assert!(matches!(frame.performative, Some(Performative::Disposition(_))));

        let queue = broker.queues().get("orders").unwrap();
        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.pop().unwrap().content().unwrap().as_ref(), b"first");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_with_decode_error() {
        let (_dir, server, broker, addr) = start_server().await;
        let mut client = Client::connect(addr, &broker).await;

        // Frame whose body starts with an unassigned format code
        let mut frame = BytesMut::new();
        frame.extend_from_slice(&[0, 0, 0, 9, 2, 0, 0, 0, 0xff]);
        client.stream.write_all(&frame).await.unwrap();

        let reply = client.receive().await.unwrap();
        match reply.performative {
            Some(Performative::Close(Close { error: Some(error) })) => {
                assert_eq!(error.known_condition(), Some(ErrorCondition::DecodeError));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(client.receive().await.is_none());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_rolls_back() {
        let (_dir, server, broker, addr) = start_server().await;
        {
            let mut client = Client::connect(addr, &broker).await;
            client.send(transfer(1, "audit"), b"uncommitted").await;
            client.receive().await.unwrap();
        }

        // Give the connection task time to observe the disconnect
        for _ in 0..100 {
            if server.stats().connections_active.load(Ordering::Relaxed) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.stats().connections_active.load(Ordering::Relaxed), 0);
        assert_eq!(broker.queues().get("audit").unwrap().depth(), 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_peer_close_is_echoed() {
        let (_dir, server, broker, addr) = start_server().await;
        let mut client = Client::connect(addr, &broker).await;

        client.send(Performative::Close(Close::default()), &[]).await;
        let frame = client.receive().await.unwrap();
        assert_eq!(frame.performative, Some(Performative::Close(Close { error: None })));
        assert!(client.receive().await.is_none());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_bad_protocol_header_gets_server_header() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        let broker = Broker::open(config, Arc::new(MemoryEventLogger::new())).unwrap();
        let handler = FrameHandler::new(broker);

        let mock = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1")
            .write(&PROTOCOL_HEADER)
            .build();
        let (_tx, mut shutdown) = broadcast::channel(1);
        let result = Server::handle_connection(
            mock,
            "127.0.0.1:1".parse().unwrap(),
            &handler,
            &ServerConfig::default(),
            &ServerStats::default(),
            &mut shutdown,
        )
        .await;
        assert!(matches!(
            result,
            Err(ServerError::Protocol(relaymq_codec::ProtocolError::InvalidHeader(_)))
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_is_ignored() {
        let (_dir, server, broker, addr) = start_server().await;
        let mut client = Client::connect(addr, &broker).await;

        let heartbeat = relaymq_codec::Frame::heartbeat()
            .encode(DEFAULT_MAX_FRAME_SIZE)
            .unwrap();
        client.stream.write_all(&heartbeat).await.unwrap();
        client.send(transfer(9, "q"), &Bytes::from_static(b"x")).await;

        let frame = client.receive().await.unwrap();
        assert!(matches!(
            frame.performative,
            Some(Performative::Disposition(Disposition { first: 9, .. }))
        ));

        server.shutdown();
    }
}
