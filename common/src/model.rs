//! The knock sequence data model.
//!
//! These types are owned by the caller (typically loaded from an external
//! sequence repository) and are read-only to the engine for the duration of
//! one run. Out-of-range numeric fields are clamped into their documented
//! bounds at run time rather than rejected.

use std::time::Duration;

use crate::constants::{
    CHECK_PERIOD_STEP_SECS, MAX_CHECK_PERIOD_SECS, MAX_CHECK_RETRIES, MAX_CHECK_TIMEOUT_SECS,
    MAX_DELAY_MS, MIN_CHECK_PERIOD_SECS, MIN_CHECK_RETRIES, MIN_CHECK_TIMEOUT_SECS, MIN_PORT,
};

/// Key type of the external sequence repository.
pub type SequenceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepKind {
    #[default]
    Udp,
    Tcp,
    Icmp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Raw,
    Hex,
    Base64,
    Escaped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolPreference {
    #[default]
    PreferIpv4,
    PreferIpv6,
    Ipv4Only,
    Ipv6Only,
}

/// How a step's `icmp_size` relates to the bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IcmpSizeMode {
    /// `icmp_size` is the echo payload length.
    #[default]
    PayloadOnly,
    /// `icmp_size` includes the 8-byte ICMP header.
    WithIcmpHeader,
    /// `icmp_size` includes the IP header and the ICMP header.
    WithIpHeader,
}

/// One packet to send as part of a knock sequence.
#[derive(Debug, Clone, Default)]
pub struct SequenceStep {
    pub kind: StepKind,
    /// Destination port, required for UDP and TCP steps.
    pub port: Option<u16>,
    /// Packet size, required for ICMP steps. Interpreted per [`IcmpSizeMode`].
    pub icmp_size: Option<u16>,
    /// How many identical echo requests the step sends, default 1.
    pub icmp_count: Option<u16>,
    pub content: Option<String>,
    pub encoding: ContentEncoding,
}

impl SequenceStep {
    pub fn is_valid(&self) -> bool {
        match self.kind {
            StepKind::Udp | StepKind::Tcp => self.port.is_some_and(|p| p >= MIN_PORT),
            StepKind::Icmp => self.icmp_size.is_some(),
        }
    }
}

/// Post-knock reachability probe configuration.
#[derive(Debug, Clone)]
pub struct ResourceCheck {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub period_secs: u64,
    pub max_retries: u32,
}

impl ResourceCheck {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .clamp(MIN_CHECK_TIMEOUT_SECS, MAX_CHECK_TIMEOUT_SECS),
        )
    }

    /// Re-check period, clamped and rounded down to a 15 second step.
    pub fn period(&self) -> Duration {
        let secs = self
            .period_secs
            .clamp(MIN_CHECK_PERIOD_SECS, MAX_CHECK_PERIOD_SECS);
        Duration::from_secs(secs / CHECK_PERIOD_STEP_SECS * CHECK_PERIOD_STEP_SECS)
    }

    pub fn retries(&self) -> u32 {
        self.max_retries.clamp(MIN_CHECK_RETRIES, MAX_CHECK_RETRIES)
    }
}

/// A named knock definition. Immutable once a run starts.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    pub id: SequenceId,
    pub name: String,
    /// Target host, resolved once per run.
    pub host: String,
    pub steps: Vec<SequenceStep>,
    /// Delay between steps in milliseconds, 0..=15000.
    pub delay_ms: u64,
    pub preference: ProtocolPreference,
    /// Fixed local source port, if any.
    pub local_port: Option<u16>,
    /// TTL / hop-limit override; 0 or `None` keeps the system default.
    pub ttl: Option<u8>,
    pub icmp_size_mode: IcmpSizeMode,
    pub resource_check: Option<ResourceCheck>,
}

impl Sequence {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.min(MAX_DELAY_MS))
    }

    pub fn valid_steps(&self) -> Vec<&SequenceStep> {
        self.steps.iter().filter(|s| s.is_valid()).collect()
    }
}

/// Live progress snapshot published while a run is active.
///
/// Absence of a `KnockState` for a sequence id means "not running".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnockState {
    pub id: SequenceId,
    pub name: String,
    /// Current resource-check attempt, 1-based. Stays 1 while sending.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Current step, 1-based.
    pub step: usize,
    pub total_steps: usize,
    /// `true` once the sending phase is over and the engine polls the target.
    pub waiting_for_resource: bool,
}

/// Last known reachability verdict for a sequence's check target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceState {
    #[default]
    Unknown,
    Checking,
    Reachable,
    Unreachable,
}
