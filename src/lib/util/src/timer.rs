/* SPDX-License-Identifier: GPL-2.0-only */

pub const USECS_PER_MSEC: u64 = 1000;
pub const USECS_PER_SEC: u64 = 1_000_000;

/// A free-running microsecond counter.
///
/// Boards provide this from whatever monotonic source they have (arch timer,
/// TSC scaled by a known frequency, a SoC timer block). The counter must never
/// go backwards while firmware runs.
pub trait MonotonicTimer {
    fn now_usecs(&self) -> u64;

    /// Busy-wait for at least `us` microseconds.
    fn udelay(&self, us: u64) {
        let start = self.now_usecs();
        while self.now_usecs().wrapping_sub(start) < us {
            core::hint::spin_loop();
        }
    }

    fn mdelay(&self, ms: u64) {
        self.udelay(ms * USECS_PER_MSEC);
    }
}

impl<T: MonotonicTimer + ?Sized> MonotonicTimer for &T {
    fn now_usecs(&self) -> u64 {
        (**self).now_usecs()
    }
}

/// Tracks elapsed time and an optional expiry point, in the manner of
/// coreboot's `struct stopwatch`.
pub struct Stopwatch<'a, T: MonotonicTimer + ?Sized> {
    timer: &'a T,
    start: u64,
    expires: u64,
}

impl<'a, T: MonotonicTimer + ?Sized> Stopwatch<'a, T> {
    /// Starts a stopwatch that is already expired.
    pub fn new(timer: &'a T) -> Self {
        let now = timer.now_usecs();
        Self {
            timer,
            start: now,
            expires: now,
        }
    }

    pub fn with_usecs_expire(timer: &'a T, us: u64) -> Self {
        let mut sw = Self::new(timer);
        sw.init_usecs_expire(us);
        sw
    }

    pub fn with_msecs_expire(timer: &'a T, ms: u64) -> Self {
        Self::with_usecs_expire(timer, ms * USECS_PER_MSEC)
    }

    /// Restarts the stopwatch and sets the expiry `us` from now.
    pub fn init_usecs_expire(&mut self, us: u64) {
        self.start = self.timer.now_usecs();
        self.expires = self.start.saturating_add(us);
    }

    pub fn init_msecs_expire(&mut self, ms: u64) {
        self.init_usecs_expire(ms * USECS_PER_MSEC);
    }

    pub fn expired(&self) -> bool {
        self.timer.now_usecs() >= self.expires
    }

    pub fn duration_usecs(&self) -> u64 {
        self.timer.now_usecs().saturating_sub(self.start)
    }

    pub fn duration_msecs(&self) -> u64 {
        self.duration_usecs() / USECS_PER_MSEC
    }
}

/// Evaluates `f` until it yields a value or `timeout_us` passes.
///
/// `f` always runs at least once, so a zero timeout still samples the
/// condition.
pub fn poll_usecs<T, R, F>(timer: &T, timeout_us: u64, mut f: F) -> Option<R>
where
    T: MonotonicTimer + ?Sized,
    F: FnMut() -> Option<R>,
{
    let sw = Stopwatch::with_usecs_expire(timer, timeout_us);
    loop {
        if let Some(r) = f() {
            return Some(r);
        }
        if sw.expired() {
            return None;
        }
        core::hint::spin_loop();
    }
}

pub fn poll_msecs<T, R, F>(timer: &T, timeout_ms: u64, f: F) -> Option<R>
where
    T: MonotonicTimer + ?Sized,
    F: FnMut() -> Option<R>,
{
    poll_usecs(timer, timeout_ms * USECS_PER_MSEC, f)
}
