//
// The orchestrator: owns the FdRegistry, TimerSet and Waker, and runs the
// poll(2)-driven dispatch loop described in the crate's design notes.
//
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::fd_registry::{FdCallback, FdRegistry};
use crate::interest::Interest;
use crate::syscall;
use crate::timer::{TimerCallback, TimerId, TimerSet};
use crate::waker::Waker;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl From<u8> for RunState {
    fn from(v: u8) -> RunState {
        match v {
            0 => RunState::Idle,
            1 => RunState::Running,
            2 => RunState::Stopping,
            _ => RunState::Stopped,
        }
    }
}

struct Inner {
    fds: FdRegistry,
    timers: TimerSet,
    waker: Waker,
    state: AtomicU8,
}

/// Cheap to clone; every clone refers to the same underlying state.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<Inner>,
}

impl Reactor {
    pub fn new() -> io::Result<Reactor> {
        let fds = FdRegistry::new();
        let waker = Waker::new()?;

        let waker_fd = waker.read_fd();
        // The waker callback is wired up after `Reactor` exists so it can
        // hold a handle back to the same Inner (for `waker.drain()`).
        let inner = Arc::new(Inner {
            fds,
            timers: TimerSet::new(),
            waker,
            state: AtomicU8::new(RunState::Idle as u8),
        });

        let drain_inner = inner.clone();
        let registered = inner.fds.add(waker_fd, Interest::READABLE, Box::new(move |_, _, _| {
            drain_inner.waker.drain();
        }));
        debug_assert!(registered, "waker fd must not already be registered");

        Ok(Reactor { inner })
    }

    pub fn add_fd(&self, fd: RawFd, interest: Interest, callback: FdCallback) -> bool {
        let ok = self.inner.fds.add(fd, interest, callback);
        self.inner.waker.wake();
        ok
    }

    pub fn remove_fd(&self, fd: RawFd) -> bool {
        let ok = self.inner.fds.remove(fd);
        self.inner.waker.wake();
        ok
    }

    pub fn update_events(&self, fd: RawFd, interest: Interest) -> bool {
        let ok = self.inner.fds.update_interest(fd, interest);
        self.inner.waker.wake();
        ok
    }

    pub fn add_timer(&self, interval: Duration, callback: TimerCallback, repeat: bool) -> Option<TimerId> {
        let id = self.inner.timers.add(interval, callback, repeat);
        self.inner.waker.wake();
        id
    }

    pub fn remove_timer(&self, id: TimerId) -> bool {
        let ok = self.inner.timers.remove(id);
        self.inner.waker.wake();
        ok
    }

    pub fn update_timer_interval(&self, id: TimerId, interval: Duration) -> bool {
        let ok = self.inner.timers.update_interval(id, interval);
        self.inner.waker.wake();
        ok
    }

    // Includes the reactor's own waker registration.
    pub fn fd_count(&self) -> usize {
        self.inner.fds.count()
    }

    pub fn timer_count(&self) -> usize {
        self.inner.timers.count()
    }

    // Idempotent; safe to call from any thread, including before run().
    pub fn stop(&self) {
        let _ = self.inner.state.compare_exchange(
            RunState::Running as u8,
            RunState::Stopping as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.inner.waker.wake();
    }

    // default_timeout of None means "wait indefinitely subject to timer deadlines".
    pub fn run(&self, default_timeout: Option<Duration>) -> io::Result<()> {
        self.inner.state.compare_exchange(
            RunState::Idle as u8,
            RunState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ).or_else(|_| self.inner.state.compare_exchange(
            RunState::Stopped as u8,
            RunState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )).map_err(|_| io::Error::from(io::ErrorKind::AlreadyExists))?;

        let default_timeout_ms = match default_timeout {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
        };

        let result = self.run_loop(default_timeout_ms);
        self.inner.state.store(RunState::Stopped as u8, Ordering::SeqCst);
        result
    }

    fn run_loop(&self, default_timeout_ms: i32) -> io::Result<()> {
        loop {
            let timeout = self.inner.timers.compute_timeout(default_timeout_ms);
            let mut pollfds = self.inner.fds.snapshot();
            if pollfds.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "reactor has no registered descriptors to poll",
                ));
            }

            syscall::poll(&mut pollfds, timeout)?;
            self.inner.fds.dispatch(&pollfds);
            self.inner.fds.cleanup();

            self.inner.timers.dispatch();
            self.inner.timers.cleanup();

            if RunState::from(self.inner.state.load(Ordering::SeqCst)) != RunState::Running {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::thread;

    #[test]
    fn fresh_reactor_has_only_the_waker() {
        let r = Reactor::new().unwrap();
        assert_eq!(r.fd_count(), 1);
        assert_eq!(r.timer_count(), 0);
    }

    #[test]
    fn validation_failures_use_sentinels() {
        let r = Reactor::new().unwrap();
        assert!(!r.add_fd(-1, Interest::READABLE, Box::new(|_, _, _| {})));
        assert!(r.add_timer(Duration::ZERO, Box::new(|_| {}), true).is_none());
        assert!(!r.remove_timer(TimerId(999)));
    }

    #[test]
    fn fd_becomes_readable_and_fires_once() {
        let r = Reactor::new().unwrap();
        let (read_file, write_file) = syscall::pipe().unwrap();
        let fd = read_file.as_raw_fd();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let r2 = r.clone();
        r.add_fd(fd, Interest::READABLE, Box::new(move |fd, _, events| {
            count2.fetch_add(1, Ordering::SeqCst);
            assert!(events.contains(crate::interest::Events::READABLE));
            let mut buf = [0u8; 16];
            let _ = syscall::read(fd, &mut buf);
            r2.stop();
        }));
        assert_eq!(r.fd_count(), 2);

        syscall::write(write_file.as_raw_fd(), b"hi").unwrap();
        r.run(Some(Duration::from_millis(1000))).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_from_another_thread_returns_promptly() {
        let r = Reactor::new().unwrap();
        let r2 = r.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            r2.stop();
        });
        let start = std::time::Instant::now();
        r.run(Some(Duration::from_secs(60))).unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
        handle.join().unwrap();
    }

    #[test]
    fn removing_one_fd_from_anothers_callback_skips_it_this_iteration() {
        let r = Reactor::new().unwrap();
        let pipes: Vec<_> = (0..3).map(|_| syscall::pipe().unwrap()).collect();
        let fds: Vec<RawFd> = pipes.iter().map(|(read, _)| read.as_raw_fd()).collect();
        for (_, write) in &pipes {
            syscall::write(write.as_raw_fd(), b"x").unwrap();
        }

        let order = Arc::new(StdMutex::new(Vec::new()));
        let r_for_4 = r.clone();
        let fd4 = fds[1];
        let fd5 = fds[2];
        let order4 = order.clone();
        r.add_fd(fd4, Interest::READABLE, Box::new(move |fd, _, _| {
            order4.lock().unwrap().push(fd);
            r_for_4.remove_fd(fd4);
            r_for_4.remove_fd(fd5);
        }));
        let order5 = order.clone();
        r.add_fd(fd5, Interest::READABLE, Box::new(move |fd, _, _| {
            order5.lock().unwrap().push(fd);
        }));
        let order3 = order.clone();
        let fd3 = fds[0];
        let r_stop = r.clone();
        r.add_fd(fd3, Interest::READABLE, Box::new(move |fd, _, _| {
            order3.lock().unwrap().push(fd);
            r_stop.stop();
        }));

        r.run(Some(Duration::from_millis(1000))).unwrap();

        let seen = order.lock().unwrap();
        assert!(seen.contains(&fd3));
        assert!(seen.contains(&fd4));
        assert!(!seen.contains(&fd5));
        drop(seen);
        assert_eq!(r.fd_count(), 2); // fd3 + waker; fd4/fd5 were removed.
    }
}
