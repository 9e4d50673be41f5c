//! Hash-chained, append-only audit log with sensitive-data masking.
//!
//! Each record's hash is `SHA256(message + previous_hash)`; the first record
//! of a process lifetime chains off a fixed seed. The read-modify-write of
//! the chain head happens under a mutex so no two records are ever computed
//! against the same predecessor. A process restart starts a fresh chain from
//! the seed; callers needing cross-restart evidence must persist and re-seed
//! the last hash themselves.

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// Seed for the first record of a process lifetime.
pub const CHAIN_SEED: &str = "INIT_HASH_SEED_2026";

/// Actor used by background workers and internal paths.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub hash: String,
    pub previous_hash: String,
}

/// Redacts credential-like pairs and card-number-like digit runs.
struct Masker {
    credential: Regex,
    card: Regex,
}

impl Masker {
    fn new() -> Self {
        Self {
            credential: Regex::new(
                r#"(?i)\b(password|passwd|merchant_secret|merchantpassword|secret|cvv|cvc|pin|api_key)\b["']?\s*[:=]\s*["']?([^\s,"'}|]+)"#,
            )
            .expect("credential pattern is valid"),
            card: Regex::new(r"\b(?:\d{4}[ -]?){3,4}\d{1,4}\b").expect("card pattern is valid"),
        }
    }

    fn mask(&self, input: &str) -> String {
        let masked = self.credential.replace_all(input, "$1=***");
        self.card
            .replace_all(&masked, |caps: &regex::Captures<'_>| {
                let digits: String = caps[0].chars().filter(|c| c.is_ascii_digit()).collect();
                // Card numbers are 13-19 digits; longer runs are something
                // else (IBAN fragments, tracking numbers) and stay as-is.
                if (13..=19).contains(&digits.len()) {
                    format!(
                        "{}******{}",
                        &digits[..6],
                        &digits[digits.len() - 4..]
                    )
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }
}

pub struct AuditChain {
    last_hash: Mutex<String>,
    masker: Masker,
    events: AtomicU64,
    alerts: AtomicU64,
}

impl AuditChain {
    pub fn new() -> Self {
        Self::with_seed(CHAIN_SEED)
    }

    pub fn with_seed(seed: &str) -> Self {
        Self {
            last_hash: Mutex::new(seed.to_string()),
            masker: Masker::new(),
            events: AtomicU64::new(0),
            alerts: AtomicU64::new(0),
        }
    }

    /// Records appended over this process lifetime, alerts included.
    pub fn event_count(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Security alerts raised over this process lifetime.
    pub fn alert_count(&self) -> u64 {
        self.alerts.load(Ordering::Relaxed)
    }

    /// Log a regular security-relevant event. Details are masked before the
    /// hash is computed, so the chain attests to the masked form.
    pub fn log_event(
        &self,
        actor: &str,
        client_addr: &str,
        action: &str,
        status: &str,
        details: &str,
    ) -> AuditRecord {
        let message = format!(
            "User: {} | Action: {} | Status: {} | IP: {} | Details: {}",
            actor,
            action,
            status,
            client_addr,
            self.masker.mask(details)
        );
        self.append(message, false)
    }

    /// Log a security alert (auth failure, downstream unavailable, tamper
    /// suspicion). Same chain, higher log level.
    pub fn log_security_alert(
        &self,
        actor: &str,
        client_addr: &str,
        action: &str,
        reason: &str,
    ) -> AuditRecord {
        let message = format!(
            "SECURITY_ALERT | User: {} | Action: {} | Reason: {} | IP: {}",
            actor,
            action,
            self.masker.mask(reason),
            client_addr
        );
        self.append(message, true)
    }

    fn append(&self, message: String, alert: bool) -> AuditRecord {
        // Lock covers compute-hash and advance-previous-hash so the chain is
        // strictly totally ordered across concurrent callers.
        let mut last = self.last_hash.lock().unwrap_or_else(|e| e.into_inner());
        let previous_hash = last.clone();
        let hash = chain_hash(&message, &previous_hash);

        if alert {
            warn!(
                target: "audit",
                hash = %hash,
                chain_prev = %previous_hash,
                "{}",
                message
            );
        } else {
            info!(
                target: "audit",
                hash = %hash,
                chain_prev = %previous_hash,
                "{}",
                message
            );
        }

        *last = hash.clone();
        self.events.fetch_add(1, Ordering::Relaxed);
        if alert {
            self.alerts.fetch_add(1, Ordering::Relaxed);
        }
        AuditRecord {
            timestamp: Utc::now(),
            message,
            hash,
            previous_hash,
        }
    }

    /// Recompute the chain over an ordered record sequence. Returns the index
    /// of the first record whose stored hash does not match, if any.
    pub fn verify_chain(seed: &str, records: &[AuditRecord]) -> Result<(), usize> {
        let mut previous = seed.to_string();
        for (index, record) in records.iter().enumerate() {
            let expected = chain_hash(&record.message, &previous);
            if expected != record.hash {
                return Err(index);
            }
            previous = record.hash.clone();
        }
        Ok(())
    }
}

impl Default for AuditChain {
    fn default() -> Self {
        Self::new()
    }
}

fn chain_hash(message: &str, previous_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(previous_hash.as_bytes());
    hex::encode(hasher.finalize())
}
