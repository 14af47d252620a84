//! Caller priority gate
//!
//! Decides whether the calling thread may dip into the reserve band below a
//! bucket's low watermark. Privileged contexts are those carrying an explicit
//! priority tag, running in the foreground, acting in a critical system role,
//! or scheduled under a real-time policy.

use std::cell::Cell;

/// Predicate over the calling context
pub trait PriorityProbe: Send + Sync {
    fn is_privileged(&self) -> bool;
}

impl<F> PriorityProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_privileged(&self) -> bool {
        self()
    }
}

/// Fixed system roles that always get the reserve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticalRole {
    /// Display compositor
    Compositor,
    /// Primary system coordinator process
    SystemCoordinator,
}

/// Priority attributes of the current thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallerContext {
    /// Explicit latency-critical tag
    pub priority_tag: bool,
    /// Foreground-scheduled work
    pub foreground: bool,
    pub role: Option<CriticalRole>,
}

thread_local! {
    static CURRENT: Cell<CallerContext> = const {
        Cell::new(CallerContext {
            priority_tag: false,
            foreground: false,
            role: None,
        })
    };
}

impl CallerContext {
    /// Context with the explicit priority tag set
    pub fn tagged() -> Self {
        Self {
            priority_tag: true,
            ..Self::default()
        }
    }

    pub fn foreground() -> Self {
        Self {
            foreground: true,
            ..Self::default()
        }
    }

    pub fn with_role(role: CriticalRole) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    /// Context installed on the calling thread
    pub fn current() -> Self {
        CURRENT.with(Cell::get)
    }

    /// Install this context on the calling thread until the guard drops
    pub fn enter(self) -> ContextGuard {
        let previous = CURRENT.with(|c| c.replace(self));
        ContextGuard { previous }
    }

    /// Whether the context alone grants privilege
    pub fn is_privileged(&self) -> bool {
        self.priority_tag || self.foreground || self.role.is_some()
    }
}

/// Restores the previous thread context on drop
#[must_use = "the context is reset as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    previous: CallerContext,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}

/// Default probe: thread context plus OS scheduling policy
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPriorityProbe;

impl PriorityProbe for ThreadPriorityProbe {
    fn is_privileged(&self) -> bool {
        CallerContext::current().is_privileged() || is_realtime_thread()
    }
}

/// Whether the calling thread runs under SCHED_FIFO or SCHED_RR
#[cfg(target_os = "linux")]
pub fn is_realtime_thread() -> bool {
    // SAFETY: sched_getscheduler(0) only queries the calling thread.
    let policy = unsafe { libc::sched_getscheduler(0) };
    policy == libc::SCHED_FIFO || policy == libc::SCHED_RR
}

#[cfg(not(target_os = "linux"))]
pub fn is_realtime_thread() -> bool {
    false
}
