// The fd registration table: fd -> registration, plus the poll(2) snapshot
// and deferred-removal dispatch described in the reactor's design.
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use crate::interest::{Events, Interest};
use crate::panic_util::describe_panic;

pub type FdCallback = Box<dyn FnMut(RawFd, Interest, Events) + Send>;

struct FdRegistration {
    interest: Interest,
    // Wrapped so dispatch can clone a handle out and release the table lock
    // before running user code; see FdRegistry::dispatch.
    callback: Arc<Mutex<FdCallback>>,
    active: bool,
}

#[derive(Default)]
pub struct FdRegistry {
    table: RwLock<HashMap<RawFd, FdRegistration>>,
}

impl FdRegistry {
    pub fn new() -> FdRegistry {
        FdRegistry::default()
    }

    pub fn add(&self, fd: RawFd, interest: Interest, callback: FdCallback) -> bool {
        if fd < 0 {
            return false;
        }
        let mut table = self.table.write().unwrap();
        if table.contains_key(&fd) {
            return false;
        }
        table.insert(fd, FdRegistration {
            interest,
            callback: Arc::new(Mutex::new(callback)),
            active: true,
        });
        true
    }

    // Physical removal happens in cleanup().
    pub fn remove(&self, fd: RawFd) -> bool {
        let mut table = self.table.write().unwrap();
        match table.get_mut(&fd) {
            Some(reg) if reg.active => {
                reg.active = false;
                true
            }
            _ => false,
        }
    }

    pub fn update_interest(&self, fd: RawFd, interest: Interest) -> bool {
        let mut table = self.table.write().unwrap();
        match table.get_mut(&fd) {
            Some(reg) if reg.active => {
                reg.interest = interest;
                true
            }
            _ => false,
        }
    }

    pub fn count(&self) -> usize {
        self.table.read().unwrap().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<libc::pollfd> {
        let table = self.table.read().unwrap();
        table.iter()
            .filter(|(_, reg)| reg.active)
            .map(|(&fd, reg)| libc::pollfd {
                fd,
                events: reg.interest.as_poll_events(),
                revents: 0,
            })
            .collect()
    }

    // Lock is released around the callback so it can call back into this
    // registry, including removing its own fd, without deadlocking.
    pub(crate) fn dispatch(&self, pollfds: &[libc::pollfd]) {
        for pfd in pollfds {
            if pfd.revents == 0 {
                continue;
            }
            let events = Events::from_revents(pfd.revents);
            let found = {
                let table = self.table.read().unwrap();
                table.get(&pfd.fd)
                    .filter(|reg| reg.active)
                    .map(|reg| (reg.interest, reg.callback.clone()))
            };
            let Some((interest, callback)) = found else { continue };

            let mut callback = callback.lock().unwrap();
            let result = panic::catch_unwind(AssertUnwindSafe(|| (&mut *callback)(pfd.fd, interest, events)));
            if let Err(panic) = result {
                log::error!("fd callback for fd {} panicked: {}", pfd.fd, describe_panic(&panic));
                // An fd callback's failure does not invalidate the fd; the
                // caller is expected to remove it if it can't recover.
            }
        }
    }

    pub(crate) fn cleanup(&self) {
        let mut table = self.table.write().unwrap();
        table.retain(|_, reg| reg.active);
    }
}
