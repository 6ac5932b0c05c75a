//! TLS session tickets (RFC 5077 style resumption).
//!
//! # Responsibilities
//! - Build a ticket key rotation context with a configured key lifetime
//! - Attach it to a rustls server configuration on request
//! - Stay inert when ticket support is not compiled in or setup fails

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rustls::server::ProducesTickets;
use rustls::ServerConfig;

/// Produces a fresh ticket key. Keys are seeded from the platform RNG.
pub type TicketKeySource = fn() -> Result<Arc<dyn ProducesTickets>, rustls::Error>;

#[cfg(feature = "session-tickets")]
fn platform_key_source() -> Option<TicketKeySource> {
    Some(rustls::crypto::ring::Ticketer::new)
}

#[cfg(not(feature = "session-tickets"))]
fn platform_key_source() -> Option<TicketKeySource> {
    None
}

/// Session ticket support for TLS connections.
#[derive(Debug)]
pub struct SessionTickets {
    tag: String,
    rotation: Option<Arc<KeyRotation>>,
}

impl SessionTickets {
    /// Initialize ticket keys with the given lifetime.
    pub fn new(tag: &str, key_lifetime_secs: u32) -> Self {
        Self::with_key_source(tag, key_lifetime_secs, platform_key_source())
    }

    /// Like [`SessionTickets::new`] with an explicit key source.
    ///
    /// `None` behaves as if ticket support were not compiled in.
    pub fn with_key_source(tag: &str, key_lifetime_secs: u32, source: Option<TicketKeySource>) -> Self {
        let disabled = Self {
            tag: tag.to_string(),
            rotation: None,
        };

        let Some(source) = source else {
            tracing::debug!(tag, "TLS session tickets not supported");
            return disabled;
        };
        if key_lifetime_secs == 0 {
            tracing::warn!(tag, "TLS session tickets disabled: key lifetime is zero");
            return disabled;
        }

        match KeyRotation::new(key_lifetime_secs, source) {
            Ok(rotation) => {
                tracing::info!(tag, lifetime_secs = key_lifetime_secs, "Using TLS session tickets");
                Self {
                    tag: tag.to_string(),
                    rotation: Some(Arc::new(rotation)),
                }
            }
            Err(e) => {
                tracing::warn!(tag, error = %e, "TLS session ticket setup failed");
                disabled
            }
        }
    }

    /// Whether initialization succeeded.
    pub fn is_initialized(&self) -> bool {
        self.rotation.is_some()
    }

    /// Enable ticket processing for sessions built from `config`.
    ///
    /// Returns `false` and leaves `config` untouched if not initialized.
    pub fn enable(&self, config: &mut ServerConfig) -> bool {
        match &self.rotation {
            Some(rotation) => {
                config.ticketer = rotation.clone();
                tracing::debug!(tag = %self.tag, "Session tickets enabled");
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
struct RotationState {
    current: Arc<dyn ProducesTickets>,
    previous: Option<Arc<dyn ProducesTickets>>,
    rotate_at: Instant,
}

/// Ticket keys that rotate after a fixed lifetime.
///
/// Tickets issued under the previous key stay decryptable for one more
/// lifetime.
#[derive(Debug)]
pub struct KeyRotation {
    lifetime_secs: u32,
    source: TicketKeySource,
    state: Mutex<RotationState>,
}

impl KeyRotation {
    pub fn new(lifetime_secs: u32, source: TicketKeySource) -> Result<Self, rustls::Error> {
        let current = source()?;
        Ok(Self {
            lifetime_secs,
            source,
            state: Mutex::new(RotationState {
                current,
                previous: None,
                rotate_at: Instant::now() + Self::lifetime_of(lifetime_secs),
            }),
        })
    }

    fn lifetime_of(secs: u32) -> Duration {
        Duration::from_secs(u64::from(secs))
    }

    /// Current and previous keys, rotating first if the current expired.
    fn keys(&self) -> (Arc<dyn ProducesTickets>, Option<Arc<dyn ProducesTickets>>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if now >= state.rotate_at {
            match (self.source)() {
                Ok(next) => {
                    let old = std::mem::replace(&mut state.current, next);
                    state.previous = Some(old);
                    tracing::debug!("Rotated TLS session ticket key");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ticket key rotation failed, keeping current key");
                }
            }
            state.rotate_at = now + Self::lifetime_of(self.lifetime_secs);
        }
        (state.current.clone(), state.previous.clone())
    }
}

impl ProducesTickets for KeyRotation {
    fn enabled(&self) -> bool {
        true
    }

    fn lifetime(&self) -> u32 {
        self.lifetime_secs
    }

    fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>> {
        let (current, _) = self.keys();
        current.encrypt(plain)
    }

    fn decrypt(&self, cipher: &[u8]) -> Option<Vec<u8>> {
        let (current, previous) = self.keys();
        current
            .decrypt(cipher)
            .or_else(|| previous.and_then(|key| key.decrypt(cipher)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::server::{ClientHello, ResolvesServerCert};
    use rustls::sign::CertifiedKey;

    #[derive(Debug)]
    struct NoCertificate;

    impl ResolvesServerCert for NoCertificate {
        fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
            None
        }
    }

    fn server_config() -> ServerConfig {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(NoCertificate))
    }

    fn failing_source() -> Result<Arc<dyn ProducesTickets>, rustls::Error> {
        Err(rustls::Error::General("no entropy".into()))
    }

    fn ring_source() -> Result<Arc<dyn ProducesTickets>, rustls::Error> {
        rustls::crypto::ring::Ticketer::new()
    }

    #[test]
    fn unsupported_helper_leaves_config_untouched() {
        let tickets = SessionTickets::with_key_source("test", 3600, None);
        let mut config = server_config();

        assert!(!tickets.is_initialized());
        assert!(!tickets.enable(&mut config));
        assert!(!config.ticketer.enabled());
    }

    #[test]
    fn failed_setup_disables_helper() {
        let tickets = SessionTickets::with_key_source("test", 3600, Some(failing_source));
        let mut config = server_config();

        assert!(!tickets.enable(&mut config));
        assert!(!config.ticketer.enabled());
    }

    #[test]
    fn zero_lifetime_disables_helper() {
        let tickets = SessionTickets::with_key_source("test", 0, Some(ring_source));
        assert!(!tickets.is_initialized());
    }

    #[test]
    fn enable_installs_ticketer_with_lifetime() {
        let tickets = SessionTickets::with_key_source("test", 600, Some(ring_source));
        let mut config = server_config();

        assert!(tickets.enable(&mut config));
        assert!(config.ticketer.enabled());
        assert_eq!(config.ticketer.lifetime(), 600);
    }

    #[test]
    fn tickets_round_trip_through_rotation() {
        let rotation = KeyRotation::new(600, ring_source).unwrap();
        let ticket = rotation.encrypt(b"session state").unwrap();
        assert_eq!(rotation.decrypt(&ticket).unwrap(), b"session state");
    }

    #[test]
    fn previous_key_still_decrypts_after_rotation() {
        let rotation = KeyRotation::new(600, ring_source).unwrap();
        let ticket = rotation.encrypt(b"old").unwrap();

        rotation
            .state
            .lock()
            .unwrap()
            .rotate_at = Instant::now() - Duration::from_secs(1);

        assert_eq!(rotation.decrypt(&ticket).unwrap(), b"old");
        assert!(rotation.state.lock().unwrap().previous.is_some());
    }

    #[cfg(not(feature = "session-tickets"))]
    #[test]
    fn helper_is_inert_without_ticket_support() {
        let tickets = SessionTickets::new("test", 3600);
        let mut config = server_config();
        assert!(!tickets.enable(&mut config));
        assert!(!config.ticketer.enabled());
    }
}
