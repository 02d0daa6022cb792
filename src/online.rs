//! Decoding of glftpd's `ONLINE` session records.
//!
//! The daemon keeps a flat array of `struct ONLINE` in its shared memory
//! segment. [`RawOnline`] mirrors that layout field for field; the layout
//! is owned and versioned by the daemon, so any change there is a breaking
//! external change. Decoding never fails: every possible byte pattern maps
//! to some [`SessionEntry`], garbage text included.

use serde::Serialize;
use std::mem;

/// ABI mirror of glftpd's `struct ONLINE`.
///
/// Text fields are fixed-capacity buffers the daemon NUL-terminates within
/// their declared capacity. A slot is unused when `username[0] == 0`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawOnline {
    pub tagline: [u8; 64],
    pub username: [u8; 24],
    pub status: [u8; 256],
    pub ssl_flag: libc::c_short,
    pub host: [u8; 256],
    pub currentdir: [u8; 512],
    pub groupid: libc::c_long,
    pub login_time: libc::time_t,
    pub tstart: libc::timeval,
    pub txfer: libc::timeval,
    pub bytes_xfer: libc::c_ulonglong,
    pub bytes_txfer: libc::c_ulonglong,
    pub procid: libc::pid_t,
}

/// Size of one record slot in the segment.
pub const ONLINE_SIZE: usize = mem::size_of::<RawOnline>();

/// One decoded session, in the exact field order of the JSON contract.
#[derive(Debug, Serialize)]
pub struct SessionEntry {
    pub tagline: String,
    pub username: String,
    pub status: String,
    pub ssl_flag: i32,
    pub host: String,
    pub currentdir: String,
    pub groupid: i64,
    pub login_time: i64,
    pub tstart: Stamp,
    pub txfer: Stamp,
    pub bytes_xfer: i64,
    pub bytes_txfer: i64,
    pub procid: i32,
}

/// Seconds/microseconds pair, mirroring `struct timeval` in the output.
#[derive(Debug, Serialize)]
pub struct Stamp {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl From<libc::timeval> for Stamp {
    fn from(tv: libc::timeval) -> Self {
        Self {
            tv_sec: i64::from(tv.tv_sec),
            tv_usec: i64::from(tv.tv_usec),
        }
    }
}

/// Decodes the segment's bytes into session entries, in ascending slot
/// order.
///
/// The slot count is `min(record_cap, bytes.len() / ONLINE_SIZE)`; the
/// truncating division is the safety bound that keeps every per-record
/// read inside the mapping and drops a trailing partial record. Each slot
/// is taken with one bulk copy and no synchronization with the writing
/// daemon, so a concurrently updated slot can yield a torn record; that is
/// accepted and never retried.
pub fn decode_sessions(bytes: &[u8], record_cap: usize) -> Vec<SessionEntry> {
    let slots = record_cap.min(bytes.len() / ONLINE_SIZE);
    let mut entries = Vec::new();
    for slot in 0..slots {
        let offset = slot * ONLINE_SIZE;
        // SAFETY: offset + ONLINE_SIZE <= bytes.len() by the bound above,
        // and RawOnline is plain integer/array data, valid for any bits.
        let raw: RawOnline =
            unsafe { std::ptr::read_unaligned(bytes[offset..].as_ptr().cast::<RawOnline>()) };
        if raw.username[0] == 0 {
            continue;
        }
        entries.push(SessionEntry::from_raw(&raw));
    }
    entries
}

impl SessionEntry {
    fn from_raw(raw: &RawOnline) -> Self {
        Self {
            tagline: fixed_str(&raw.tagline),
            username: fixed_str(&raw.username),
            status: fixed_str(&raw.status),
            ssl_flag: i32::from(raw.ssl_flag),
            host: fixed_str(&raw.host),
            currentdir: fixed_str(&raw.currentdir),
            groupid: i64::from(raw.groupid),
            login_time: i64::from(raw.login_time),
            tstart: Stamp::from(raw.tstart),
            txfer: Stamp::from(raw.txfer),
            bytes_xfer: clamp_counter(raw.bytes_xfer),
            bytes_txfer: clamp_counter(raw.bytes_txfer),
            procid: raw.procid,
        }
    }
}

/// Extracts the text up to the first NUL, or the full capacity when the
/// daemon left the field unterminated. Invalid UTF-8 is replaced, never
/// rejected.
fn fixed_str(buf: &[u8]) -> String {
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

/// The daemon's byte counters are unsigned 64-bit; JSON consumers expect a
/// signed integer, so values past `i64::MAX` clamp instead of wrapping.
fn clamp_counter(value: libc::c_ulonglong) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
