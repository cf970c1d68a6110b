//! Broker assembly.
//!
//! A [`Broker`] owns everything shared between connections: the message
//! store, queues, exchanges, the type registry used by every decoder, key
//! stores and the lifecycle.

use crate::config::Config;
use crate::error::ServerError;
use crate::keystore::KeyStore;
use crate::lifecycle::{BrokerLifecycle, BrokerState};
use dashmap::DashMap;
use relaymq_codec::{TypeRegistry, ValueHandler};
use relaymq_core::{
    EventLogger, Exchange, ExchangeRegistry, LocalTransaction, LogSubject, QueueRegistry,
};
use relaymq_store::MessageStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared broker state.
pub struct Broker {
    config: Config,
    store: Arc<MessageStore>,
    type_registry: Arc<TypeRegistry>,
    exchange_registry: ExchangeRegistry,
    exchanges: DashMap<String, Exchange>,
    queues: QueueRegistry,
    lifecycle: BrokerLifecycle,
    keystores: Vec<Arc<KeyStore>>,
    event_logger: Arc<dyn EventLogger>,
    next_transaction_id: AtomicU64,
    next_connection_id: AtomicU64,
}

impl Broker {
    /// Builds the broker from validated configuration and recovers
    /// committed messages into their queues.
    ///
    /// Registry and exchange type errors are fatal: the broker does not
    /// start with a partial set of types.
    pub fn open(config: Config, event_logger: Arc<dyn EventLogger>) -> Result<Arc<Self>, ServerError> {
        config.validate()?;

        let type_registry = Arc::new(TypeRegistry::standard()?);
        tracing::info!("Type registry ready with {} constructors", type_registry.len());

        let exchange_registry = ExchangeRegistry::with_defaults()?;
        let exchanges = DashMap::new();
        for attributes in &config.exchanges {
            let exchange = exchange_registry.create_exchange(attributes)?;
            tracing::info!(
                "Declared exchange '{}' ({})",
                exchange.name,
                exchange.exchange_type
            );
            exchanges.insert(exchange.name.clone(), exchange);
        }

        let store = Arc::new(MessageStore::open(config.storage.store_config())?);
        let queues = QueueRegistry::new();
        let recovered = store.recover()?;
        let mut max_transaction_id = 0;
        for message in &recovered {
            max_transaction_id = max_transaction_id.max(message.transaction_id);
            queues.declare(&message.queue).deliver(store.restore(message));
        }
        if !recovered.is_empty() {
            tracing::info!(
                "Restored {} messages into {} queues",
                recovered.len(),
                queues.len()
            );
        }

        let keystores = config
            .keystores
            .stores
            .iter()
            .map(|ks| KeyStore::new(ks, &config.keystores, event_logger.clone()))
            .collect();

        Ok(Arc::new(Self {
            lifecycle: BrokerLifecycle::new(event_logger.clone()),
            config,
            store,
            type_registry,
            exchange_registry,
            exchanges,
            queues,
            keystores,
            event_logger,
            next_transaction_id: AtomicU64::new(max_transaction_id + 1),
            next_connection_id: AtomicU64::new(1),
        }))
    }

    /// Arms key store expiry checks and moves the broker to active.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ServerError> {
        for keystore in &self.keystores {
            keystore.initialize_expiry_checking(&self.lifecycle)?;
        }
        self.lifecycle.transition(BrokerState::Active)
    }

    /// Stops background work and syncs the store.
    pub fn stop(&self) -> Result<(), ServerError> {
        self.lifecycle.transition(BrokerState::Stopping)?;
        for keystore in &self.keystores {
            keystore.close();
        }
        if let Err(e) = self.store.close() {
            tracing::error!("Failed to sync message store on shutdown: {}", e);
        }
        self.lifecycle.transition(BrokerState::Stopped)
    }

    /// Returns a value handler bound to the shared type registry.
    pub fn value_handler(&self) -> ValueHandler {
        ValueHandler::new(self.type_registry.clone()).with_max_depth(self.config.codec.max_nesting_depth)
    }

    /// Starts the transaction for a new connection.
    pub fn begin_transaction(&self, connection_id: u64) -> LocalTransaction {
        let id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        LocalTransaction::with_subject(
            id,
            self.store.clone(),
            self.config.transactions.max_uncommitted_in_memory_bytes,
            LogSubject::transaction(connection_id, id),
            self.event_logger.clone(),
        )
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    pub fn exchange(&self, name: &str) -> Option<Exchange> {
        self.exchanges.get(name).map(|e| e.clone())
    }

    pub fn exchange_registry(&self) -> &ExchangeRegistry {
        &self.exchange_registry
    }

    pub fn lifecycle(&self) -> &BrokerLifecycle {
        &self.lifecycle
    }

    pub fn keystores(&self) -> &[Arc<KeyStore>] {
        &self.keystores
    }

    pub fn event_logger(&self) -> &Arc<dyn EventLogger> {
        &self.event_logger
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("state", &self.lifecycle.state())
            .field("queues", &self.queues.len())
            .field("exchanges", &self.exchanges.len())
            .field("keystores", &self.keystores.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyStoreConfig;
    use crate::keystore::Certificate;
    use bytes::Bytes;
    use relaymq_core::MemoryEventLogger;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_open_declares_exchanges() {
        let dir = TempDir::new().unwrap();
        let broker = Broker::open(config_in(&dir), Arc::new(MemoryEventLogger::new())).unwrap();
        assert_eq!(broker.exchange("amq.topic").unwrap().exchange_type, "topic");
        assert_eq!(broker.exchange("amq.match").unwrap().exchange_type, "headers");
        assert!(broker.exchange("missing").is_none());
        assert_eq!(broker.lifecycle().state(), BrokerState::Initialising);
    }

    #[test]
    fn test_unknown_exchange_type_stops_startup() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        let mut attributes = serde_json::Map::new();
        attributes.insert("name".into(), "bad".into());
        attributes.insert("type".into(), "x-unknown".into());
        config.exchanges.push(attributes);

        let err = Broker::open(config, Arc::new(MemoryEventLogger::new())).unwrap_err();
        assert!(matches!(err, ServerError::Exchange(_)));
    }

    #[test]
    fn test_duplicate_exchange_name_stops_startup() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        let mut attributes = serde_json::Map::new();
        attributes.insert("name".into(), "amq.direct".into());
        attributes.insert("type".into(), "fanout".into());
        config.exchanges.push(attributes);

        let err = Broker::open(config, Arc::new(MemoryEventLogger::new())).unwrap_err();
        match err {
            ServerError::Config(e) => assert!(e.to_string().contains("amq.direct")),
            other => panic!("unexpected error: {other:?}"),
        }
        // Nothing was opened, so the directory holds no store
        assert!(!dir.path().join("messages").exists());
    }

    #[test]
    fn test_invalid_config_stops_startup() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.codec.max_nesting_depth = 0;
        let err = Broker::open(config, Arc::new(MemoryEventLogger::new())).unwrap_err();
        assert!(err.is_fatal_at_startup());
    }

    #[test]
    fn test_recovers_committed_messages_into_queues() {
        let dir = TempDir::new().unwrap();
        {
            let broker = Broker::open(config_in(&dir), Arc::new(MemoryEventLogger::new())).unwrap();
            let mut txn = broker.begin_transaction(1);
            let queue = broker.queues().declare("orders");
            txn.enqueue(queue.clone(), broker.store().add_message(Bytes::from_static(b"one")))
                .unwrap();
            txn.enqueue(queue, broker.store().add_message(Bytes::from_static(b"two")))
                .unwrap();
            txn.commit().unwrap();

            // Uncommitted work is lost on restart
            let audit = broker.queues().declare("audit");
            txn.enqueue(audit, broker.store().add_message(Bytes::from_static(b"lost")))
                .unwrap();
        }

        let broker = Broker::open(config_in(&dir), Arc::new(MemoryEventLogger::new())).unwrap();
        let orders = broker.queues().get("orders").unwrap();
        assert_eq!(orders.depth(), 2);
        assert_eq!(orders.pop().unwrap().content().unwrap().as_ref(), b"one");
        assert!(broker.queues().get("audit").is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.keystores.stores.push(KeyStoreConfig {
            name: "tls".into(),
            certificates: vec![Certificate {
                alias: "server".into(),
                not_after: chrono::Utc::now() + chrono::Duration::days(400),
            }],
        });
        let logger = Arc::new(MemoryEventLogger::new());
        let broker = Broker::open(config, logger.clone()).unwrap();
        assert_eq!(logger.count("KST-1001"), 1);

        broker.start().unwrap();
        assert_eq!(broker.lifecycle().state(), BrokerState::Active);
        assert!(broker.keystores()[0].is_scheduled());

        broker.stop().unwrap();
        assert_eq!(broker.lifecycle().state(), BrokerState::Stopped);
        assert!(!broker.keystores()[0].is_scheduled());
        assert_eq!(logger.count("KST-1003"), 1);
    }
}
