// src/constants.rs

//! Protocol-wide constants shared by the broker and its clients.

/// Socket the broker listens on unless configured otherwise.
pub const DEFAULT_SOCKET_PATH: &str = "/run/binder.sock";

/// Environment variable that overrides [`DEFAULT_SOCKET_PATH`].
pub const SOCKET_PATH_ENV: &str = "BINDER_SOCKET_PATH";

/// Handle that always addresses whichever session holds the context-manager role.
pub const CONTEXT_MANAGER_HANDLE: u64 = 0;

/// Number of workers a client starts for inbound commands by default.
pub const DEFAULT_NUM_WORKERS: usize = 15;

/// Largest frame the transport can carry (its length prefix is a `u16`).
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

const fn pack_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
  ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | (c4 as u32)
}

pub const FIRST_CALL_TRANSACTION: u32 = 0x0000_0001;
pub const LAST_CALL_TRANSACTION: u32 = 0x00ff_ffff;

// Reserved codes every binder object understands.
pub const PING_TRANSACTION: u32 = pack_chars(b'_', b'P', b'N', b'G');
pub const DUMP_TRANSACTION: u32 = pack_chars(b'_', b'D', b'M', b'P');
pub const SHELL_COMMAND_TRANSACTION: u32 = pack_chars(b'_', b'C', b'M', b'D');
pub const INTERFACE_TRANSACTION: u32 = pack_chars(b'_', b'N', b'T', b'F');
pub const SYSPROPS_TRANSACTION: u32 = pack_chars(b'_', b'S', b'P', b'R');

/// Flag OR-ed into the strict mode policy of every interface token.
pub const STRICT_MODE_PENALTY_GATHER: i32 = 0x40 << 16;

pub(crate) const B_TYPE_LARGE: u8 = 0x85;

pub(crate) const fn pack_object_type(c1: u8, c2: u8) -> u32 {
  pack_chars(c1, c2, b'*', B_TYPE_LARGE)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reserved_codes_sit_outside_the_user_range() {
    for code in [
      PING_TRANSACTION,
      DUMP_TRANSACTION,
      SHELL_COMMAND_TRANSACTION,
      INTERFACE_TRANSACTION,
      SYSPROPS_TRANSACTION,
    ] {
      assert!(code > LAST_CALL_TRANSACTION);
    }
    assert_eq!(PING_TRANSACTION, 0x5f50_4e47);
  }
}
