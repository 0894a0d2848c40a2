// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Background statistics maintenance
//!
//! A single worker thread drains a queue of indexes whose statistics are
//! missing or outdated. The worker is spawned by the offer that finds no worker
//! running and exits as soon as the queue is empty, so at most one exists and
//! none idles. The queue lock is never held while statistics are recomputed.

use dotdb_common::{IndexName, TableDef};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::error::{StatisticsError, StatisticsResult};

pub const WORKER_THREAD_NAME: &str = "index-statistics-background";

/// Work performed for each queued index
pub trait Recompute: Send + Sync {
    /// Recompute and publish statistics of `index` in its own transaction.
    /// Returns `Ok(false)` if the index no longer exists.
    fn recompute(&self, index: &IndexName, cancel: &Arc<AtomicBool>) -> StatisticsResult<bool>;
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<IndexName>,
    enabled: bool,
    running: bool,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled whenever the worker goes idle
    idle: Condvar,
    /// Set by `stop` to cut short an in-flight recompute
    interrupt: Arc<AtomicBool>,
    grace: Duration,
    recompute: Weak<dyn Recompute>,
}

/// Deduplicating queue with a lazily spawned, self-terminating worker
#[derive(Clone)]
pub struct BackgroundMaintainer {
    shared: Arc<Shared>,
}

impl BackgroundMaintainer {
    pub fn new(recompute: Weak<dyn Recompute>, enabled: bool, grace: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState { enabled, ..QueueState::default() }),
                idle: Condvar::new(),
                interrupt: Arc::new(AtomicBool::new(false)),
                grace,
                recompute,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.state.lock().enabled
    }

    /// True while a worker is draining the queue
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn queued(&self) -> Vec<IndexName> {
        self.shared.state.lock().queue.iter().cloned().collect()
    }

    /// Queue one index; returns false if disabled or already queued
    pub fn offer_index(&self, index: &IndexName) -> bool {
        let mut state = self.shared.state.lock();
        if !state.enabled || state.queue.contains(index) {
            return false;
        }
        state.queue.push_back(index.clone());
        self.ensure_worker(&mut state);
        true
    }

    /// Queue every index of `table`; returns how many were newly queued
    pub fn offer_table(&self, table: &TableDef) -> usize {
        let mut state = self.shared.state.lock();
        if !state.enabled {
            return 0;
        }

        let mut added = 0;
        for index in &table.indexes {
            if !state.queue.contains(&index.name) {
                state.queue.push_back(index.name.clone());
                added += 1;
            }
        }
        if added > 0 {
            self.ensure_worker(&mut state);
        }
        added
    }

    pub fn remove(&self, index: &IndexName) {
        self.shared.state.lock().queue.retain(|queued| queued != index);
    }

    pub fn remove_all<'a, I: IntoIterator<Item = &'a IndexName>>(&self, indexes: I) {
        let mut state = self.shared.state.lock();
        for index in indexes {
            state.queue.retain(|queued| queued != index);
        }
    }

    fn ensure_worker(&self, state: &mut QueueState) {
        if state.running {
            return;
        }

        let shared = Arc::clone(&self.shared);
        match thread::Builder::new().name(WORKER_THREAD_NAME.to_string()).spawn(move || run_worker(shared)) {
            Ok(handle) => {
                state.running = true;
                state.worker = Some(handle);
            }
            Err(e) => {
                warn!("Failed to start background statistics worker: {}", e);
                state.queue.clear();
            }
        }
    }

    /// Disable the maintainer, interrupt the worker and wait up to the grace period for it to exit
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.enabled = false;
        self.shared.interrupt.store(true, Ordering::Release);

        let deadline = Instant::now() + self.shared.grace;
        while state.running {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        if state.running {
            warn!("Background statistics worker did not stop within {:?}", self.shared.grace);
            return;
        }
        let worker = state.worker.take();
        drop(state);

        if let Some(worker) = worker {
            let _ = worker.join();
        }
        debug!("Background statistics maintenance stopped");
    }
}

fn go_idle(shared: &Shared, clear: bool) {
    let mut state = shared.state.lock();
    if clear {
        state.queue.clear();
    }
    state.running = false;
    shared.idle.notify_all();
}

fn run_worker(shared: Arc<Shared>) {
    loop {
        let next = {
            let mut state = shared.state.lock();
            match state.queue.pop_front() {
                Some(index) if state.enabled => index,
                _ => {
                    state.running = false;
                    shared.idle.notify_all();
                    return;
                }
            }
        };

        let Some(recompute) = shared.recompute.upgrade() else {
            go_idle(&shared, true);
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| recompute.recompute(&next, &shared.interrupt))) {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => debug!("Skipping statistics update of dropped index {}", next),
            Ok(Err(StatisticsError::Cancelled(_))) => {
                debug!("Background statistics update of {} interrupted", next);
                go_idle(&shared, true);
                return;
            }
            Ok(Err(e)) => {
                warn!("Background statistics update of {} failed: {}", next, e);
                go_idle(&shared, true);
                return;
            }
            Err(_) => {
                warn!("Background statistics update of {} panicked", next);
                go_idle(&shared, true);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotdb_common::TableName;
    use std::sync::mpsc::{self, Receiver, Sender};

    fn name(index: &str) -> IndexName {
        IndexName::new(TableName::new("test", "t"), index)
    }

    /// Records every recompute; indexes named "block" wait for the gate, "fail" errors, "panic" panics
    struct Recorder {
        seen: Mutex<Vec<IndexName>>,
        started: Mutex<Sender<IndexName>>,
        gate: Mutex<Receiver<()>>,
    }

    impl Recompute for Recorder {
        fn recompute(&self, index: &IndexName, cancel: &Arc<AtomicBool>) -> StatisticsResult<bool> {
            self.seen.lock().push(index.clone());
            let _ = self.started.lock().send(index.clone());
            match index.name.as_str() {
                "block" => {
                    let _ = self.gate.lock().recv();
                    Ok(true)
                }
                "fail" => {
                    let _ = self.gate.lock().recv();
                    Err(StatisticsError::Codec("boom".to_string()))
                }
                "panic" => panic!("recompute panicked"),
                "spin" => {
                    while !cancel.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(StatisticsError::Cancelled(index.to_string()))
                }
                _ => Ok(true),
            }
        }
    }

    fn setup(enabled: bool) -> (Arc<Recorder>, BackgroundMaintainer, Receiver<IndexName>, Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            started: Mutex::new(started_tx),
            gate: Mutex::new(gate_rx),
        });
        let weak: Weak<dyn Recompute> = Arc::downgrade(&recorder) as Weak<dyn Recompute>;
        let maintainer = BackgroundMaintainer::new(weak, enabled, Duration::from_secs(2));
        (recorder, maintainer, started_rx, gate_tx)
    }

    fn wait_idle(maintainer: &BackgroundMaintainer) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while maintainer.is_running() {
            assert!(Instant::now() < deadline, "worker did not go idle");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_offers_are_deduplicated() {
        let (recorder, maintainer, started, gate) = setup(true);
        assert!(maintainer.offer_index(&name("block")));
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), name("block"));

        assert!(maintainer.offer_index(&name("other")));
        assert!(!maintainer.offer_index(&name("other")));
        assert_eq!(maintainer.queue_len(), 1);

        gate.send(()).unwrap();
        wait_idle(&maintainer);
        assert_eq!(*recorder.seen.lock(), vec![name("block"), name("other")]);
        assert_eq!(maintainer.queue_len(), 0);
    }

    #[test]
    fn test_failure_clears_queue() {
        let (recorder, maintainer, started, gate) = setup(true);
        maintainer.offer_index(&name("fail"));
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        maintainer.offer_index(&name("b"));
        maintainer.offer_index(&name("c"));

        gate.send(()).unwrap();
        wait_idle(&maintainer);
        assert_eq!(maintainer.queue_len(), 0);
        assert_eq!(*recorder.seen.lock(), vec![name("fail")]);

        // A later offer starts a fresh worker
        assert!(maintainer.offer_index(&name("d")));
        wait_idle(&maintainer);
        assert_eq!(recorder.seen.lock().last(), Some(&name("d")));
    }

    #[test]
    fn test_panic_returns_worker_to_idle() {
        let (recorder, maintainer, _started, _gate) = setup(true);
        maintainer.offer_index(&name("panic"));
        wait_idle(&maintainer);
        assert_eq!(recorder.seen.lock().len(), 1);
        assert!(maintainer.offer_index(&name("after")));
        wait_idle(&maintainer);
        assert_eq!(recorder.seen.lock().len(), 2);
    }

    #[test]
    fn test_stop_interrupts_worker() {
        let (recorder, maintainer, started, _gate) = setup(true);
        maintainer.offer_index(&name("spin"));
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        maintainer.offer_index(&name("never"));

        let begin = Instant::now();
        maintainer.stop();
        assert!(begin.elapsed() < Duration::from_secs(2));
        assert!(!maintainer.is_running());
        assert!(!maintainer.offer_index(&name("late")));
        assert_eq!(*recorder.seen.lock(), vec![name("spin")]);
    }

    #[test]
    fn test_disabled_maintainer_ignores_offers() {
        let (recorder, maintainer, _started, _gate) = setup(false);
        assert!(!maintainer.offer_index(&name("a")));
        assert!(!maintainer.is_running());
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn test_remove_drops_queued_entries() {
        let (_recorder, maintainer, started, gate) = setup(true);
        maintainer.offer_index(&name("block"));
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        maintainer.offer_index(&name("x"));
        maintainer.offer_index(&name("y"));
        maintainer.remove_all([&name("x")]);
        assert_eq!(maintainer.queued(), vec![name("y")]);
        gate.send(()).unwrap();
        wait_idle(&maintainer);
    }
}
