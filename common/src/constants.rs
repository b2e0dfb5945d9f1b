//! Protocol and validation bounds shared across the workspace.

pub const MIN_PORT: u16 = 1;
pub const MAX_PORT: u16 = 65_535;

pub const MAX_TTL: u8 = 255;

pub const MIN_DELAY_MS: u64 = 0;
pub const MAX_DELAY_MS: u64 = 15_000;

pub const ICMP_HEADER_SIZE: usize = 8;
pub const MIN_IP4_HEADER_SIZE: usize = 20;
pub const MAX_IP4_HEADER_SIZE: usize = 60;
pub const IP6_HEADER_SIZE: usize = 40;
pub const MAX_PACKET_SIZE: usize = 65_535;

pub const MIN_CHECK_TIMEOUT_SECS: u64 = 1;
pub const MAX_CHECK_TIMEOUT_SECS: u64 = 10;
pub const MIN_CHECK_PERIOD_SECS: u64 = 30;
pub const MAX_CHECK_PERIOD_SECS: u64 = 300;
pub const CHECK_PERIOD_STEP_SECS: u64 = 15;
pub const MIN_CHECK_RETRIES: u32 = 1;
pub const MAX_CHECK_RETRIES: u32 = 5;
