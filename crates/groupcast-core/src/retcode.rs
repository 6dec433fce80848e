//! Bit-flag send result codes.
//!
//! Send paths report failures as OR-able integer flags instead of errors
//! because sends happen from arbitrary threads and fire-and-forget
//! contexts where propagating a `Result` across the boundary is not
//! observable. `0` means success; a caller aggregating several sends may
//! OR the codes together and inspect individual causes afterwards.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Result code of a send-path operation. Zero is success.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RetCode(u32);

impl RetCode {
    /// Success.
    pub const OK: RetCode = RetCode(0);
    /// Message content or type invalid for the session's current mode.
    pub const ILLEGAL_PACKET: RetCode = RetCode(1 << 1);
    /// Session already closed or closing.
    pub const SESSION_CLOSED: RetCode = RetCode(1 << 2);
    /// Transport-level buffer state invalid (outbound queue full).
    pub const ILLEGAL_BUFFER: RetCode = RetCode(1 << 3);
    /// Low-level I/O failure reported by the writer; caller may retry.
    pub const SEND_EXCEPTION: RetCode = RetCode(1 << 4);
    /// No engine reachable from this session.
    pub const ENGINE_NULL: RetCode = RetCode(1 << 5);
    /// Group fan-out requested but no node service configured.
    pub const NODE_SERVICE_NULL: RetCode = RetCode(1 << 6);
    /// Target group currently has no members.
    pub const GROUP_EMPTY: RetCode = RetCode(1 << 7);
    /// Target session or group known but not connected anywhere.
    pub const TARGET_OFFLINE: RetCode = RetCode(1 << 8);

    /// True when the code is success.
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// True when the code carries at least one failure flag.
    pub const fn is_err(self) -> bool {
        self.0 != 0
    }

    /// True when all of `flag`'s bits are set in this code.
    pub const fn contains(self, flag: RetCode) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Raw flag bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Reconstruct from raw bits (e.g. off the cluster wire).
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    fn flag_names(self) -> Vec<&'static str> {
        const NAMED: [(RetCode, &str); 8] = [
            (RetCode::ILLEGAL_PACKET, "ILLEGAL_PACKET"),
            (RetCode::SESSION_CLOSED, "SESSION_CLOSED"),
            (RetCode::ILLEGAL_BUFFER, "ILLEGAL_BUFFER"),
            (RetCode::SEND_EXCEPTION, "SEND_EXCEPTION"),
            (RetCode::ENGINE_NULL, "ENGINE_NULL"),
            (RetCode::NODE_SERVICE_NULL, "NODE_SERVICE_NULL"),
            (RetCode::GROUP_EMPTY, "GROUP_EMPTY"),
            (RetCode::TARGET_OFFLINE, "TARGET_OFFLINE"),
        ];
        NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for RetCode {
    type Output = RetCode;

    fn bitor(self, rhs: RetCode) -> RetCode {
        RetCode(self.0 | rhs.0)
    }
}

impl BitOrAssign for RetCode {
    fn bitor_assign(&mut self, rhs: RetCode) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for RetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("OK");
        }
        write!(f, "{}({})", self.flag_names().join("|"), self.0)
    }
}
