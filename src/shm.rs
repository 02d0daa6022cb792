//! SysV shared memory attachment.
//!
//! The daemon owns the segment; this side takes at most one scoped,
//! read-only attachment per run and never writes through it. Absence of
//! the segment is a normal condition ("daemon not running"), distinct
//! from attach failure.

use anyhow::{Context, Result};
use std::io;
use std::ptr;

/// A scoped read-only view of the daemon's segment.
///
/// Detaches on drop, unconditionally. The daemon keeps writing to the
/// segment with no coordination primitive shared with this reader, so
/// everything read through the view is a best-effort, possibly torn
/// snapshot.
pub struct SegmentView {
    addr: *const libc::c_void,
    size: usize,
    shm_id: libc::c_int,
    creator_pid: libc::pid_t,
}

/// Looks up and attaches the segment for `segment_key`.
///
/// Returns `Ok(None)` when no segment exists for the key; any other
/// lookup, stat, or attach failure is an error.
pub fn locate(segment_key: i32) -> Result<Option<SegmentView>> {
    // SAFETY: shmget with size 0 and no creation flags only looks up an
    // existing segment id.
    let shm_id = unsafe { libc::shmget(segment_key as libc::key_t, 0, 0) };
    if shm_id == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            return Ok(None);
        }
        return Err(err).with_context(|| format!("shmget failed for key 0x{segment_key:08x}"));
    }

    // SAFETY: stat is a plain-data out parameter the kernel fills in.
    let mut stat: libc::shmid_ds = unsafe { std::mem::zeroed() };
    if unsafe { libc::shmctl(shm_id, libc::IPC_STAT, &mut stat) } == -1 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("shmctl(IPC_STAT) failed for key 0x{segment_key:08x}"));
    }

    // SAFETY: shm_id was just validated; SHM_RDONLY maps the segment
    // read-only at a kernel-chosen address.
    let addr = unsafe { libc::shmat(shm_id, ptr::null(), libc::SHM_RDONLY) };
    if addr as isize == -1 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("shmat failed for key 0x{segment_key:08x}"));
    }

    Ok(Some(SegmentView {
        addr,
        size: stat.shm_segsz as usize,
        shm_id,
        creator_pid: stat.shm_cpid,
    }))
}

impl SegmentView {
    /// Current byte size of the segment, as reported at stat time.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The mapped bytes.
    ///
    /// This is a non-atomic snapshot: the daemon can rewrite any slot
    /// while the caller reads, and multi-byte fields can be observed
    /// mid-write. Callers copy what they need once and do not retry.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: addr..addr+size is the mapping obtained from shmat and
        // stays valid until shmdt in drop.
        unsafe { std::slice::from_raw_parts(self.addr.cast::<u8>(), self.size) }
    }
}

impl Drop for SegmentView {
    fn drop(&mut self) {
        // SAFETY: addr came from a successful shmat and is detached
        // exactly once.
        unsafe {
            libc::shmdt(self.addr);
        }
        // Historical housekeeping: remove the segment if this process is
        // its creator. A pure reader never is, so in normal deployments
        // this branch does nothing.
        if self.creator_pid == unsafe { libc::getpid() } {
            // SAFETY: IPC_RMID with a null buf only marks the id for
            // removal; failure is ignorable here.
            unsafe {
                libc::shmctl(self.shm_id, libc::IPC_RMID, ptr::null_mut());
            }
        }
    }
}
