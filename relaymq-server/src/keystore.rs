//! Key stores and certificate expiry checking.
//!
//! A key store checks its certificates periodically once the broker is
//! active. If it is created before the broker becomes active, it registers a
//! lifecycle listener that schedules the check on the transition to
//! [`BrokerState::Active`] and then removes itself.

use crate::config::{KeyStoreConfig, KeyStoresConfig, DEFAULT_CERTIFICATE_EXPIRY_CHECK_FREQUENCY};
use crate::error::ServerError;
use crate::lifecycle::{BrokerLifecycle, BrokerState, ListenerAction, StateChangeListener};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use relaymq_core::{EventLogger, LogMessage, LogSubject};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Upper bound on the warning window, in days.
const MAX_WARN_DAYS: i64 = 36_500;

/// A certificate held by a key store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub alias: String,
    /// End of the certificate's validity period.
    pub not_after: DateTime<Utc>,
}

/// A named set of certificates with periodic expiry checks.
pub struct KeyStore {
    name: String,
    subject: LogSubject,
    certificates: Vec<Certificate>,
    check_frequency: Duration,
    warn_window: ChronoDuration,
    event_logger: Arc<dyn EventLogger>,
    check_task: Mutex<Option<JoinHandle<()>>>,
    closed: Mutex<bool>,
}

impl KeyStore {
    /// Creates a key store and logs its creation.
    pub fn new(
        config: &KeyStoreConfig,
        expiry: &KeyStoresConfig,
        event_logger: Arc<dyn EventLogger>,
    ) -> Arc<Self> {
        let subject = LogSubject::keystore(&config.name);
        event_logger.message(&subject, LogMessage::keystore_create(&config.name));

        Arc::new(Self {
            name: config.name.clone(),
            subject,
            certificates: config.certificates.clone(),
            check_frequency: check_frequency(&config.name, expiry.expiry_check_frequency_days),
            warn_window: ChronoDuration::days(expiry.expiry_warn_days.clamp(0, MAX_WARN_DAYS)),
            event_logger,
            check_task: Mutex::new(None),
            closed: Mutex::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// Interval between expiry checks.
    pub fn check_frequency(&self) -> Duration {
        self.check_frequency
    }

    /// Returns whether the periodic check is running.
    pub fn is_scheduled(&self) -> bool {
        self.check_task.lock().is_some()
    }

    /// Arranges for the periodic expiry check to run while the broker is
    /// active. Must be called from within a tokio runtime.
    pub fn initialize_expiry_checking(
        self: &Arc<Self>,
        lifecycle: &BrokerLifecycle,
    ) -> Result<(), ServerError> {
        let handle = Handle::try_current()
            .map_err(|_| ServerError::NoRuntime(format!("expiry check for key store '{}'", self.name)))?;

        if lifecycle.state() == BrokerState::Active {
            self.schedule(&handle);
        } else {
            lifecycle.add_listener(Arc::new(ScheduleOnActive {
                keystore: Arc::downgrade(self),
                handle,
            }));
        }
        Ok(())
    }

    fn schedule(self: &Arc<Self>, handle: &Handle) {
        let closed = self.closed.lock();
        if *closed {
            return;
        }
        let mut task = self.check_task.lock();
        if task.is_some() {
            return;
        }

        let keystore = Arc::downgrade(self);
        let frequency = self.check_frequency;
        *task = Some(handle.spawn(async move {
            let mut interval = tokio::time::interval(frequency);
            loop {
                interval.tick().await;
                match keystore.upgrade() {
                    Some(ks) => {
                        ks.check_certificate_expiry();
                    }
                    None => break,
                }
            }
        }));
        tracing::debug!(
            "Scheduled certificate expiry check for key store '{}' every {:?}",
            self.name,
            frequency
        );
    }

    /// Reports certificates that expire within the warning window.
    /// Returns how many were reported.
    pub fn check_certificate_expiry(&self) -> usize {
        self.check_certificate_expiry_at(Utc::now())
    }

    pub fn check_certificate_expiry_at(&self, now: DateTime<Utc>) -> usize {
        let deadline = now + self.warn_window;
        let mut reported = 0;
        for certificate in &self.certificates {
            if certificate.not_after <= deadline {
                let days = (certificate.not_after - now).num_days();
                self.event_logger.message(
                    &self.subject,
                    LogMessage::keystore_expiring(
                        &certificate.alias,
                        days,
                        &certificate.not_after.to_rfc3339(),
                    ),
                );
                reported += 1;
            }
        }
        reported
    }

    /// Cancels the scheduled check. Later scheduling attempts do nothing.
    pub fn close(&self) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;
        if let Some(task) = self.check_task.lock().take() {
            task.abort();
        }
        self.event_logger
            .message(&self.subject, LogMessage::keystore_close(&self.name));
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("name", &self.name)
            .field("certificates", &self.certificates.len())
            .field("check_frequency", &self.check_frequency)
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

/// Resolves the check frequency, falling back to the default for values
/// below one day.
fn check_frequency(name: &str, days: i64) -> Duration {
    let days = if days < 1 {
        tracing::warn!(
            "Invalid certificate expiry check frequency {} for key store '{}', using {} day(s)",
            days,
            name,
            DEFAULT_CERTIFICATE_EXPIRY_CHECK_FREQUENCY
        );
        DEFAULT_CERTIFICATE_EXPIRY_CHECK_FREQUENCY
    } else {
        days
    };
    Duration::from_secs(days.unsigned_abs().saturating_mul(SECONDS_PER_DAY))
}

/// Schedules a key store's check once the broker becomes active.
struct ScheduleOnActive {
    keystore: Weak<KeyStore>,
    handle: Handle,
}

impl StateChangeListener for ScheduleOnActive {
    fn state_changed(&self, _old: BrokerState, new: BrokerState) -> ListenerAction {
        match new {
            BrokerState::Active => {
                if let Some(keystore) = self.keystore.upgrade() {
                    keystore.schedule(&self.handle);
                }
                ListenerAction::Remove
            }
            // Never became active; nothing left to schedule
            BrokerState::Stopping | BrokerState::Stopped => ListenerAction::Remove,
            BrokerState::Initialising => ListenerAction::Keep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use relaymq_core::MemoryEventLogger;

    fn certificate(alias: &str, not_after: DateTime<Utc>) -> Certificate {
        Certificate {
            alias: alias.to_string(),
            not_after,
        }
    }

    fn keystore_with(
        certificates: Vec<Certificate>,
        frequency_days: i64,
    ) -> (Arc<KeyStore>, Arc<MemoryEventLogger>) {
        let logger = Arc::new(MemoryEventLogger::new());
        let config = KeyStoreConfig {
            name: "tls".to_string(),
            certificates,
        };
        let expiry = KeyStoresConfig {
            expiry_check_frequency_days: frequency_days,
            ..Default::default()
        };
        (KeyStore::new(&config, &expiry, logger.clone()), logger)
    }

    async fn wait_for_events(logger: &MemoryEventLogger, id: &str, count: usize) {
        for _ in 0..100 {
            if logger.count(id) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_create_is_logged() {
        let (_ks, logger) = keystore_with(vec![], 1);
        assert_eq!(logger.count("KST-1001"), 1);
    }

    #[test]
    fn test_expiry_window() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let (ks, logger) = keystore_with(
            vec![
                certificate("expired", now - ChronoDuration::days(3)),
                certificate("soon", now + ChronoDuration::days(10)),
                certificate("later", now + ChronoDuration::days(365)),
            ],
            1,
        );

        assert_eq!(ks.check_certificate_expiry_at(now), 2);
        let texts: Vec<String> = logger
            .events()
            .iter()
            .filter(|(_, m)| m.id() == "KST-1004")
            .map(|(_, m)| m.text().to_string())
            .collect();
        assert!(texts[0].contains("expired will expire in -3 days"));
        assert!(texts[1].contains("soon will expire in 10 days"));
    }

    #[test]
    fn test_invalid_frequency_falls_back() {
        let (ks, _) = keystore_with(vec![], 0);
        assert_eq!(ks.check_frequency(), Duration::from_secs(SECONDS_PER_DAY));

        let (ks, _) = keystore_with(vec![], 7);
        assert_eq!(ks.check_frequency(), Duration::from_secs(7 * SECONDS_PER_DAY));
    }

    #[test]
    fn test_requires_runtime() {
        let (ks, _) = keystore_with(vec![], 1);
        let lifecycle = BrokerLifecycle::new(Arc::new(MemoryEventLogger::new()));
        assert!(matches!(
            ks.initialize_expiry_checking(&lifecycle),
            Err(ServerError::NoRuntime(_))
        ));
    }

    #[tokio::test]
    async fn test_schedules_immediately_when_active() {
        let expiring = certificate("server", Utc::now() + ChronoDuration::days(1));
        let (ks, logger) = keystore_with(vec![expiring], 1);
        let lifecycle = BrokerLifecycle::new(Arc::new(MemoryEventLogger::new()));
        lifecycle.transition(BrokerState::Active).unwrap();

        ks.initialize_expiry_checking(&lifecycle).unwrap();
        assert!(ks.is_scheduled());
        assert_eq!(lifecycle.listener_count(), 0);

        // The first tick fires immediately
        wait_for_events(&logger, "KST-1004", 1).await;
        assert_eq!(logger.count("KST-1004"), 1);
        ks.close();
    }

    #[tokio::test]
    async fn test_schedules_on_transition_to_active() {
        let expiring = certificate("server", Utc::now() + ChronoDuration::days(1));
        let (ks, logger) = keystore_with(vec![expiring], 1);
        let lifecycle = BrokerLifecycle::new(Arc::new(MemoryEventLogger::new()));

        ks.initialize_expiry_checking(&lifecycle).unwrap();
        assert!(!ks.is_scheduled());
        assert_eq!(lifecycle.listener_count(), 1);

        lifecycle.transition(BrokerState::Active).unwrap();
        assert!(ks.is_scheduled());
        // The listener unsubscribed itself
        assert_eq!(lifecycle.listener_count(), 0);

        wait_for_events(&logger, "KST-1004", 1).await;
        assert_eq!(logger.count("KST-1004"), 1);
        ks.close();
    }

    #[tokio::test]
    async fn test_close_cancels_check() {
        let (ks, logger) = keystore_with(vec![], 1);
        let lifecycle = BrokerLifecycle::new(Arc::new(MemoryEventLogger::new()));
        lifecycle.transition(BrokerState::Active).unwrap();
        ks.initialize_expiry_checking(&lifecycle).unwrap();
        assert!(ks.is_scheduled());

        ks.close();
        ks.close();
        assert!(!ks.is_scheduled());
        assert_eq!(logger.count("KST-1003"), 1);
    }

    #[tokio::test]
    async fn test_close_before_active_prevents_scheduling() {
        let (ks, _) = keystore_with(vec![], 1);
        let lifecycle = BrokerLifecycle::new(Arc::new(MemoryEventLogger::new()));
        ks.initialize_expiry_checking(&lifecycle).unwrap();

        ks.close();
        lifecycle.transition(BrokerState::Active).unwrap();
        assert!(!ks.is_scheduled());
        assert_eq!(lifecycle.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_listener_dropped_when_broker_stops_first() {
        let (ks, _) = keystore_with(vec![], 1);
        let lifecycle = BrokerLifecycle::new(Arc::new(MemoryEventLogger::new()));
        ks.initialize_expiry_checking(&lifecycle).unwrap();

        lifecycle.transition(BrokerState::Stopping).unwrap();
        assert_eq!(lifecycle.listener_count(), 0);
        assert!(!ks.is_scheduled());
    }
}
