// The timer set: by_id map for identity, a VecDeque queue sorted by
// next_fire for ordering, and the 500us-slack dispatch/cleanup algorithm.
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::panic_util::describe_panic;

const SLACK: Duration = Duration::from_micros(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

pub type TimerCallback = Box<dyn FnMut(TimerId) + Send>;

struct TimerRegistration {
    interval: Duration,
    next_fire: Instant,
    repeat: bool,
    callback: Arc<Mutex<TimerCallback>>,
    active: bool,
    updated: bool,
}

struct Inner {
    by_id: HashMap<TimerId, TimerRegistration>,
    queue: VecDeque<TimerId>,
    next_id: u64,
}

pub struct TimerSet {
    inner: RwLock<Inner>,
}

impl TimerSet {
    pub fn new() -> TimerSet {
        TimerSet {
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                queue: VecDeque::new(),
                next_id: 1,
            }),
        }
    }

    pub fn add(&self, interval: Duration, callback: TimerCallback, repeat: bool) -> Option<TimerId> {
        if interval.is_zero() {
            return None;
        }
        let mut inner = self.inner.write().unwrap();
        let id = inner.allocate_id()?;
        let next_fire = Instant::now() + interval;
        inner.by_id.insert(id, TimerRegistration {
            interval,
            next_fire,
            repeat,
            callback: Arc::new(Mutex::new(callback)),
            active: true,
            updated: false,
        });
        Inner::insert_sorted(&mut inner.queue, &mut inner.by_id, id);
        Some(id)
    }

    // Physical removal happens in cleanup().
    pub fn remove(&self, id: TimerId) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.by_id.get_mut(&id) {
            Some(reg) if reg.active => {
                reg.active = false;
                true
            }
            _ => false,
        }
    }

    // Takes effect immediately; cleanup() moves the entry back into queue.
    pub fn update_interval(&self, id: TimerId, interval: Duration) -> bool {
        if interval.is_zero() {
            return false;
        }
        let mut inner = self.inner.write().unwrap();
        let live = matches!(inner.by_id.get(&id), Some(reg) if reg.active);
        if !live {
            return false;
        }
        inner.queue.retain(|&q| q != id);
        let reg = inner.by_id.get_mut(&id).unwrap();
        reg.interval = interval;
        reg.next_fire = Instant::now() + interval;
        reg.updated = true;
        true
    }

    pub fn count(&self) -> usize {
        self.inner.read().unwrap().by_id.len()
    }

    // min(default, time to next deadline + slack); default_timeout_ms < 0
    // means "no cap, wait indefinitely".
    pub(crate) fn compute_timeout(&self, default_timeout_ms: i32) -> i32 {
        let inner = self.inner.read().unwrap();
        let head = match inner.queue.front() {
            Some(&id) => id,
            None => return default_timeout_ms,
        };
        let reg = match inner.by_id.get(&head) {
            Some(reg) => reg,
            None => return 0,
        };
        if !reg.active {
            return 0;
        }
        let now = Instant::now();
        let remaining = reg.next_fire.saturating_duration_since(now) + SLACK;
        let timeout_ms = remaining.as_millis().min(i32::MAX as u128) as i32;
        if default_timeout_ms < 0 {
            timeout_ms
        } else {
            timeout_ms.min(default_timeout_ms)
        }
    }

    // Lock is released around each callback so it can freely call back
    // into this TimerSet.
    pub(crate) fn dispatch(&self) {
        let now = Instant::now();
        loop {
            let id = {
                let inner = self.inner.read().unwrap();
                match inner.queue.front() {
                    None => break,
                    Some(&id) => {
                        match inner.by_id.get(&id) {
                            None => id, // stale queue entry; pop and drop below.
                            Some(reg) if !reg.active || reg.next_fire <= now + SLACK => id,
                            Some(_) => break,
                        }
                    }
                }
            };

            let callback = {
                let mut inner = self.inner.write().unwrap();
                inner.queue.pop_front();
                match inner.by_id.get(&id) {
                    Some(reg) if reg.active => Some(reg.callback.clone()),
                    _ => None,
                }
            };
            let Some(callback) = callback else { continue };

            let mut callback = callback.lock().unwrap();
            let result = panic::catch_unwind(AssertUnwindSafe(|| (&mut *callback)(id)));
            drop(callback);

            let mut inner = self.inner.write().unwrap();
            let Some(reg) = inner.by_id.get_mut(&id) else { continue };
            if let Err(panic) = result {
                log::error!("timer callback for id {:?} panicked: {}", id, describe_panic(&panic));
                reg.active = false;
                continue;
            }
            if reg.repeat && reg.active {
                reg.next_fire = now + reg.interval;
                Inner::insert_sorted(&mut inner.queue, &mut inner.by_id, id);
            } else {
                reg.active = false;
            }
        }
    }

    pub(crate) fn cleanup(&self) {
        let mut inner = self.inner.write().unwrap();
        let ids: Vec<TimerId> = inner.by_id.keys().copied().collect();
        for id in ids {
            let (erase, reinsert) = match inner.by_id.get(&id) {
                Some(reg) => (!reg.active, reg.active && reg.updated),
                None => continue,
            };
            if erase {
                inner.by_id.remove(&id);
                inner.queue.retain(|&q| q != id);
            } else if reinsert {
                Inner::insert_sorted(&mut inner.queue, &mut inner.by_id, id);
            }
        }
    }
}

impl Inner {
    fn allocate_id(&mut self) -> Option<TimerId> {
        let start = self.next_id;
        let mut id = start;
        loop {
            if id != 0 && !self.by_id.contains_key(&TimerId(id)) {
                self.next_id = if id == u64::MAX { 1 } else { id + 1 };
                return Some(TimerId(id));
            }
            id = if id == u64::MAX { 1 } else { id + 1 };
            if id == start {
                return None;
            }
        }
    }

    // Scans from the head, inserting `id` just before the first entry whose
    // deadline is strictly later; ties go to whichever id was already queued.
    // Always clears `updated`, mirroring the original's timer_add_queue: an
    // entry just placed in the queue is no longer "awaiting re-insertion".
    fn insert_sorted(queue: &mut VecDeque<TimerId>, by_id: &mut HashMap<TimerId, TimerRegistration>, id: TimerId) {
        if let Some(reg) = by_id.get_mut(&id) {
            reg.updated = false;
        }
        let next_fire = by_id[&id].next_fire;
        let pos = queue.iter()
            .position(|qid| by_id.get(qid).map_or(true, |r| r.next_fire > next_fire))
            .unwrap_or(queue.len());
        queue.insert(pos, id);
    }
}
