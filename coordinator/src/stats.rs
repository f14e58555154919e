use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracking the activity of a [`PointsWriter`].
///
/// [`PointsWriter`]: crate::PointsWriter
#[derive(Debug, Default)]
pub struct WriteStats {
    write_req: AtomicU64,
    point_write_req: AtomicU64,
    point_write_req_local: AtomicU64,
    point_write_req_remote: AtomicU64,
    point_write_req_hh: AtomicU64,
    write_ok: AtomicU64,
    write_dropped: AtomicU64,
    write_timeout: AtomicU64,
    write_partial: AtomicU64,
    write_err: AtomicU64,
}

impl WriteStats {
    pub(crate) fn inc_write_req(&self) {
        self.write_req.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_point_write_req(&self, n: u64) {
        self.point_write_req.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_local(&self, n: u64) {
        self.point_write_req_local.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_remote(&self, n: u64) {
        self.point_write_req_remote.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_hinted(&self, n: u64) {
        self.point_write_req_hh.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_ok(&self) {
        self.write_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: u64) {
        self.write_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_timeout(&self) {
        self.write_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_partial(&self) {
        self.write_partial.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_err(&self) {
        self.write_err.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of all counters.
    pub fn snapshot(&self) -> WriteStatsSnapshot {
        WriteStatsSnapshot {
            write_req: self.write_req.load(Ordering::Relaxed),
            point_write_req: self.point_write_req.load(Ordering::Relaxed),
            point_write_req_local: self.point_write_req_local.load(Ordering::Relaxed),
            point_write_req_remote: self.point_write_req_remote.load(Ordering::Relaxed),
            point_write_req_hh: self.point_write_req_hh.load(Ordering::Relaxed),
            write_ok: self.write_ok.load(Ordering::Relaxed),
            write_dropped: self.write_dropped.load(Ordering::Relaxed),
            write_timeout: self.write_timeout.load(Ordering::Relaxed),
            write_partial: self.write_partial.load(Ordering::Relaxed),
            write_err: self.write_err.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`WriteStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStatsSnapshot {
    pub write_req: u64,
    pub point_write_req: u64,
    pub point_write_req_local: u64,
    pub point_write_req_remote: u64,
    pub point_write_req_hh: u64,
    pub write_ok: u64,
    pub write_dropped: u64,
    pub write_timeout: u64,
    pub write_partial: u64,
    pub write_err: u64,
}
