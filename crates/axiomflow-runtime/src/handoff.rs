use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use axiomflow_core::config::AppConfig;
use axiomflow_core::error::{AxiomError, Result};
use axiomflow_core::traits::{IdentityTransmit, Transmit};

use crate::context::{content_hash, Context, ContextData};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffEvent {
    Rejected,
    HandoffStarted,
    Completed,
    TimedOut,
    IntegrityFailure,
    FidelityFailure,
    TransmitFailed,
    Cancelled,
}

impl fmt::Display for HandoffEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rejected => "rejected",
            Self::HandoffStarted => "handoff_started",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::IntegrityFailure => "integrity_failure",
            Self::FidelityFailure => "fidelity_failure",
            Self::TransmitFailed => "transmit_failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub event: HandoffEvent,
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
}

/// Symmetric key for handoff encryption.
#[derive(Clone, PartialEq, Eq)]
pub struct HandoffKey([u8; KEY_LEN]);

impl HandoffKey {
    pub fn generate() -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse URL-safe base64 of exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = URL_SAFE
            .decode(encoded.trim())
            .map_err(|e| AxiomError::Config(format!("handoff key is not valid base64: {}", e)))?;
        let bytes: [u8; KEY_LEN] = raw.try_into().map_err(|raw: Vec<u8>| {
            AxiomError::Config(format!(
                "handoff key must be {} bytes, got {}",
                KEY_LEN,
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl fmt::Debug for HandoffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandoffKey(..)")
    }
}

/// Terminal outcomes after transmit returned.
enum Received {
    Corrupt(String),
    Unfaithful,
}

/// Hands contexts to allow-listed recipients, one handoff at a time.
///
/// ```text
/// Idle ──► Rejected
///   └────► HandoffStarted ──► Completed
///                        ├──► TimedOut
///                        ├──► IntegrityFailure
///                        ├──► FidelityFailure
///                        ├──► TransmitFailed
///                        └──► Cancelled
/// ```
///
/// Every transition appends one [`AuditEntry`].
pub struct ContextManager {
    cipher: ChaCha20Poly1305,
    allowed: HashSet<String>,
    timeout: Duration,
    audit: StdMutex<Vec<AuditEntry>>,
    in_flight: Mutex<()>,
}

impl ContextManager {
    pub fn new<I, S>(key: &HandoffKey, allowed_recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cipher: key.cipher(),
            allowed: allowed_recipients.into_iter().map(Into::into).collect(),
            timeout: Duration::from_millis(200),
            audit: StdMutex::new(Vec::new()),
            in_flight: Mutex::new(()),
        }
    }

    /// Recipients and deadline from the `[runtime]` table.
    pub fn from_config(key: &HandoffKey, config: &AppConfig) -> Self {
        Self::new(key, config.runtime.allowed_recipients.iter().cloned())
            .with_timeout(Duration::from_millis(config.runtime.handoff_timeout_ms))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_allowed(&self, recipient: &str) -> bool {
        self.allowed.contains(recipient)
    }

    /// Copy of every audit entry so far, oldest first.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, event: HandoffEvent, recipient: &str) {
        debug!(event = %event, recipient, "Handoff audit");
        self.audit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AuditEntry {
                event,
                recipient: recipient.to_string(),
                timestamp: Utc::now(),
            });
    }

    /// Canonical bytes of the context's data.
    pub fn serialize(&self, context: &Context) -> Vec<u8> {
        context.canonical_bytes()
    }

    /// Rebuild a context from canonical bytes, checking its hash.
    pub fn deserialize(&self, payload: &[u8], expected_hash: &str) -> Result<Context> {
        let data: ContextData = serde_json::from_slice(payload)?;
        let actual = content_hash(&data);
        if actual != expected_hash {
            return Err(AxiomError::HashMismatch {
                expected: expected_hash.to_string(),
                actual,
            });
        }
        Ok(Context::from_map(data))
    }

    /// `nonce || ciphertext`, fresh nonce per call.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| AxiomError::Execution("context encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, token: &[u8]) -> std::result::Result<Vec<u8>, String> {
        if token.len() < NONCE_LEN {
            return Err(format!("token too short ({} bytes)", token.len()));
        }
        let (nonce, ciphertext) = token.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| "authentication failed".to_string())
    }

    /// Hand `context` to `recipient` in-process, with the configured deadline.
    pub async fn handoff(&self, context: &Context, recipient: &str) -> Result<Context> {
        self.handoff_with(
            context,
            recipient,
            &IdentityTransmit,
            self.timeout,
            &CancellationToken::new(),
        )
        .await
    }

    /// Hand `context` to `recipient` across `transmit`.
    ///
    /// `timeout` bounds everything after the handoff starts, including
    /// verification of the returned payload. Handoffs on one manager are
    /// serialized; waiting for the previous one does not count against
    /// the deadline.
    pub async fn handoff_with(
        &self,
        context: &Context,
        recipient: &str,
        transmit: &dyn Transmit,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Context> {
        if !self.is_allowed(recipient) {
            self.record(HandoffEvent::Rejected, recipient);
            warn!(recipient, "Handoff rejected, recipient not allowed");
            return Err(AxiomError::InvalidRecipient(recipient.to_string()));
        }

        let _guard = self.in_flight.lock().await;
        self.record(HandoffEvent::HandoffStarted, recipient);
        let deadline = Instant::now() + timeout;
        let timeout_ms = timeout.as_millis() as u64;
        let timed_out = || AxiomError::HandoffTimeout {
            recipient: recipient.to_string(),
            timeout_ms,
        };

        let token = self.encrypt(&self.serialize(context))?;
        let returned = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.record(HandoffEvent::Cancelled, recipient);
                return Err(AxiomError::Cancelled);
            }
            r = tokio::time::timeout_at(deadline, transmit.transmit(token)) => r,
        };
        let returned = match returned {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                self.record(HandoffEvent::TransmitFailed, recipient);
                warn!(recipient, error = %e, "Handoff transmit failed");
                return Err(e);
            }
            Err(_) => {
                self.record(HandoffEvent::TimedOut, recipient);
                warn!(recipient, timeout_ms, "Handoff timed out in transmit");
                return Err(timed_out());
            }
        };

        let received = match self.receive(&returned, context) {
            Ok(received) => received,
            Err(Received::Corrupt(reason)) => {
                self.record(HandoffEvent::IntegrityFailure, recipient);
                warn!(recipient, reason = %reason, "Handoff integrity failure");
                return Err(AxiomError::ContextCorruption {
                    recipient: recipient.to_string(),
                    reason,
                });
            }
            Err(Received::Unfaithful) => {
                self.record(HandoffEvent::FidelityFailure, recipient);
                warn!(recipient, "Handoff fidelity failure");
                return Err(AxiomError::ContextFidelity {
                    recipient: recipient.to_string(),
                });
            }
        };

        if Instant::now() > deadline {
            self.record(HandoffEvent::TimedOut, recipient);
            warn!(recipient, timeout_ms, "Handoff exceeded deadline");
            return Err(timed_out());
        }

        self.record(HandoffEvent::Completed, recipient);
        info!(recipient, hash = %received.hash(), "Handoff completed");
        Ok(received)
    }

    fn receive(
        &self,
        returned: &[u8],
        original: &Context,
    ) -> std::result::Result<Context, Received> {
        let plaintext = self.decrypt(returned).map_err(Received::Corrupt)?;
        let received = self
            .deserialize(&plaintext, original.hash())
            .map_err(|e| Received::Corrupt(e.to_string()))?;
        check_fidelity(original, &received)?;
        Ok(received)
    }
}

fn check_fidelity(original: &Context, received: &Context) -> std::result::Result<(), Received> {
    if original.data() == received.data() {
        Ok(())
    } else {
        Err(Received::Unfaithful)
    }
}
