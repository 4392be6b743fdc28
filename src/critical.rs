//! The uninterruptible scope the sampling loop runs in.
//!
//! A kernel driver would simply disable local IRQs and FIQs. From user space the closest
//! equivalent is to pin the sampling thread to one core and run it at the highest
//! `SCHED_FIFO` priority with its memory locked, then put everything back afterwards.

use crate::Result;

/// Runs a closure without being preempted.
///
/// Entering and leaving must be balanced: if the previous state cannot be restored the
/// error is fatal and the caller must stop sampling.
pub trait CriticalSection {
    fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R>;
}

/// No protection at all, for simulated hardware and tests
#[derive(Clone, Copy, Debug, Default)]
pub struct Unguarded;

impl CriticalSection for Unguarded {
    fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        Ok(f())
    }
}

#[cfg(target_os = "linux")]
pub use linux::Realtime;

#[cfg(target_os = "linux")]
mod linux {
    use std::{fs, io, mem};

    use tracing::{debug, error};

    use super::CriticalSection;
    use crate::{Error, Result};

    fn os_err(what: &str) -> Error {
        Error::CriticalSection(format!("{what}: {}", io::Error::last_os_error()))
    }

    /// Locked memory in kB, from the `VmLck` line of a `/proc/<pid>/status` dump
    pub(super) fn locked_kb(status: &str) -> Option<u64> {
        status
            .lines()
            .find_map(|line| line.strip_prefix("VmLck:"))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|kb| kb.parse().ok())
    }

    /// Whether somebody already locked this process's memory
    fn memory_already_locked() -> bool {
        fs::read_to_string("/proc/self/status")
            .ok()
            .as_deref()
            .and_then(locked_kb)
            .map_or(false, |kb| kb > 0)
    }

    /// Highest real-time priority, optionally pinned to a single core
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Realtime {
        pub cpu: Option<usize>,
    }

    struct Saved {
        affinity: libc::cpu_set_t,
        policy: libc::c_int,
        param: libc::sched_param,
        // We did the mlockall, so we undo it
        locked_here: bool,
    }

    /// Puts the saved scheduling state back when dropped, even while unwinding
    struct Restore<'a> {
        realtime: &'a Realtime,
        saved: Saved,
        done: bool,
    }

    impl Restore<'_> {
        fn finish(mut self) -> Result<()> {
            self.done = true;
            self.realtime.leave(&self.saved)
        }
    }

    impl Drop for Restore<'_> {
        fn drop(&mut self) {
            if !self.done {
                if let Err(e) = self.realtime.leave(&self.saved) {
                    error!("Could not leave real-time scope while unwinding: {e}");
                }
            }
        }
    }

    impl Realtime {
        pub fn new(cpu: Option<usize>) -> Self {
            Self { cpu }
        }

        fn enter(&self) -> Result<Saved> {
            // Safety: all pointers handed to libc point at live, correctly sized locals
            unsafe {
                let mut affinity: libc::cpu_set_t = mem::zeroed();
                if libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut affinity)
                    != 0
                {
                    return Err(os_err("sched_getaffinity"));
                }
                let policy = libc::sched_getscheduler(0);
                if policy < 0 {
                    return Err(os_err("sched_getscheduler"));
                }
                let mut param: libc::sched_param = mem::zeroed();
                if libc::sched_getparam(0, &mut param) != 0 {
                    return Err(os_err("sched_getparam"));
                }
                let mut saved = Saved {
                    affinity,
                    policy,
                    param,
                    locked_here: false,
                };

                if let Some(cpu) = self.cpu {
                    if cpu >= libc::CPU_SETSIZE as usize {
                        return Err(Error::CriticalSection(format!("no such cpu {cpu}")));
                    }
                    let mut pinned: libc::cpu_set_t = mem::zeroed();
                    libc::CPU_SET(cpu, &mut pinned);
                    if libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &pinned) != 0
                    {
                        return Err(os_err("sched_setaffinity"));
                    }
                }
                if !memory_already_locked() {
                    if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) != 0 {
                        let err = os_err("mlockall");
                        self.leave(&saved)?;
                        return Err(err);
                    }
                    saved.locked_here = true;
                }
                let mut fifo: libc::sched_param = mem::zeroed();
                fifo.sched_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
                if libc::sched_setscheduler(0, libc::SCHED_FIFO, &fifo) != 0 {
                    let err = os_err("sched_setscheduler");
                    self.leave(&saved)?;
                    return Err(err);
                }
                Ok(saved)
            }
        }

        fn leave(&self, saved: &Saved) -> Result<()> {
            // Safety: `saved` was filled in by the kernel in `enter`
            unsafe {
                if saved.locked_here {
                    libc::munlockall();
                }
                if libc::sched_setscheduler(0, saved.policy, &saved.param) != 0 {
                    return Err(os_err("restoring scheduler"));
                }
                if libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &saved.affinity)
                    != 0
                {
                    return Err(os_err("restoring affinity"));
                }
            }
            Ok(())
        }
    }

    impl CriticalSection for Realtime {
        fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
            let restore = Restore {
                realtime: self,
                saved: self.enter()?,
                done: false,
            };
            debug!(cpu = ?self.cpu, "Entered real-time scope");
            let out = f();
            restore.finish().map_err(|e| {
                error!("Could not leave real-time scope: {e}");
                e
            })?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unguarded_runs_closure() {
        let mut hits = 0;
        let out = Unguarded
            .run(|| {
                hits += 1;
                42
            })
            .unwrap();
        assert_eq!(out, 42);
        assert_eq!(hits, 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_locked_memory_from_status() {
        let status = "Name:\tpi_scope\nVmPeak:\t  10240 kB\nVmLck:\t    2048 kB\nVmPin:\t0 kB\n";
        assert_eq!(linux::locked_kb(status), Some(2048));
        assert_eq!(linux::locked_kb("VmLck:\t       0 kB\n"), Some(0));
        assert_eq!(linux::locked_kb("Name:\tpi_scope\n"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_panic_inside_realtime_restores_scheduler() {
        let realtime = Realtime::new(None);
        // Needs CAP_SYS_NICE, nothing to check without it
        if realtime.run(|| ()).is_err() {
            return;
        }
        // Safety: plain queries about the calling thread
        let policy = unsafe { libc::sched_getscheduler(0) };
        let locked = std::fs::read_to_string("/proc/self/status")
            .ok()
            .as_deref()
            .and_then(linux::locked_kb);

        let result = std::panic::catch_unwind(|| realtime.run(|| panic!("sampling blew up")));
        assert!(result.is_err());
        // Safety: as above
        assert_eq!(unsafe { libc::sched_getscheduler(0) }, policy);
        let locked_after = std::fs::read_to_string("/proc/self/status")
            .ok()
            .as_deref()
            .and_then(linux::locked_kb);
        assert_eq!(locked_after, locked);
    }
}
