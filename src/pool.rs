//! Ordered parallel worker pool (§4.4): a fixed set of worker threads
//! compress blocks concurrently, but each worker's *commit* — writing bytes
//! to the archive stream and recording the block's size — happens in strict
//! producer order, enforced by a monotonically increasing ticket.
//!
//! The dispatcher (the writer's main loop) calls [`OrderedWorkerPool::submit`]
//! once per block; [`OrderedWorkerPool::wait_for_completion`] blocks until
//! every submitted block has been committed, surfacing the first error any
//! worker encountered along the way.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::codec::EncodedBlock;
use crate::error::Result;

/// Closure a worker runs to produce one block's encoded bytes. Pure CPU
/// work: reads already happened on the dispatcher thread before `submit`.
pub type EncodeFn = Box<dyn FnOnce() -> Result<EncodedBlock> + Send>;

/// Receives one block's encoded output in strict ticket order. Implementors
/// write the bytes to the archive stream and record the resulting size in
/// the block-size table at the index corresponding to `ticket`.
pub trait BlockCommitter: Send + Sync {
    fn commit(&self, ticket: u64, outcome: EncodedBlock) -> Result<()>;
}

enum SlotMsg {
    Task { ticket: u64, encode: EncodeFn },
    Shutdown,
}

/// A single worker's mailbox: `Free -> Reserved -> Running -> Committing ->
/// Free`. The mailbox itself only models `Free`/`Reserved`; `Running` and
/// `Committing` are phases the worker thread passes through after it takes
/// the message out of the mailbox.
struct Slot {
    mailbox: Mutex<Option<SlotMsg>>,
    cvar: Condvar,
}

struct PoolShared {
    current_ticket: Mutex<u64>,
    ticket_cvar: Condvar,
    first_error: Mutex<Option<crate::error::PsarcError>>,
    committer: Arc<dyn BlockCommitter>,
}

impl PoolShared {
    fn record_error(&self, err: crate::error::PsarcError) {
        let mut slot = self.first_error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn advance_ticket(&self) {
        let mut current = self.current_ticket.lock().unwrap();
        // Ticket 0 is reserved as "uninitialised"; skip it defensively on wrap.
        *current = match current.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.ticket_cvar.notify_all();
    }

    fn wait_for_ticket(&self, ticket: u64) {
        let mut current = self.current_ticket.lock().unwrap();
        while *current != ticket {
            current = self.ticket_cvar.wait(current).unwrap();
        }
    }
}

/// Ordered worker pool driving the block pipeline's write path.
pub struct OrderedWorkerPool {
    slots: Vec<Arc<Slot>>,
    free: Arc<Mutex<Vec<bool>>>,
    free_cvar: Arc<Condvar>,
    handles: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared>,
    next_ticket: Mutex<u64>,
}

impl OrderedWorkerPool {
    /// Spawns `num_threads` worker threads (must be >= 1; `num_threads == 0`
    /// means "run synchronously", which callers handle by not constructing
    /// a pool at all). Tickets start at 1.
    pub fn new(num_threads: usize, committer: Arc<dyn BlockCommitter>) -> Self {
        assert!(num_threads >= 1, "OrderedWorkerPool requires at least one worker");

        let shared = Arc::new(PoolShared {
            current_ticket: Mutex::new(1),
            ticket_cvar: Condvar::new(),
            first_error: Mutex::new(None),
            committer,
        });
        let free = Arc::new(Mutex::new(vec![true; num_threads]));
        let free_cvar = Arc::new(Condvar::new());

        let mut slots = Vec::with_capacity(num_threads);
        let mut handles = Vec::with_capacity(num_threads);

        for idx in 0..num_threads {
            let slot = Arc::new(Slot {
                mailbox: Mutex::new(None),
                cvar: Condvar::new(),
            });
            slots.push(Arc::clone(&slot));

            let shared = Arc::clone(&shared);
            let free = Arc::clone(&free);
            let free_cvar = Arc::clone(&free_cvar);

            let handle = thread::Builder::new()
                .name(format!("psarc-worker-{idx}"))
                .spawn(move || worker_loop(slot, shared, free, free_cvar, idx))
                .expect("failed to spawn PSARC worker thread");
            handles.push(handle);
        }

        OrderedWorkerPool {
            slots,
            free,
            free_cvar,
            handles,
            shared,
            next_ticket: Mutex::new(1),
        }
    }

    /// Submits one block's encode closure. Blocks until a worker slot is
    /// free; returns the first error observed so far so the dispatcher can
    /// stop submitting more work once the archive is doomed anyway.
    pub fn submit(&self, encode: EncodeFn) -> Result<()> {
        if let Some(err) = self.take_error() {
            return Err(err);
        }

        let ticket = {
            let mut next = self.next_ticket.lock().unwrap();
            let t = *next;
            *next += 1;
            t
        };

        let slot_idx = self.acquire_free_slot();
        tracing::debug!(ticket, worker = slot_idx, "slot acquired, task dispatched");
        {
            let mut mailbox = self.slots[slot_idx].mailbox.lock().unwrap();
            *mailbox = Some(SlotMsg::Task { ticket, encode });
        }
        self.slots[slot_idx].cvar.notify_one();
        Ok(())
    }

    fn acquire_free_slot(&self) -> usize {
        let mut free = self.free.lock().unwrap();
        loop {
            if let Some(idx) = free.iter().position(|&is_free| is_free) {
                free[idx] = false;
                return idx;
            }
            free = self.free_cvar.wait(free).unwrap();
        }
    }

    /// Blocks until every submitted block has committed (`running == 0 ∧
    /// free == num_threads`), then surfaces the first worker error if any.
    pub fn wait_for_completion(&self) -> Result<()> {
        let free = self.free.lock().unwrap();
        let _guard = self
            .free_cvar
            .wait_while(free, |state| state.iter().any(|&is_free| !is_free))
            .unwrap();
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn take_error(&self) -> Option<crate::error::PsarcError> {
        self.shared.first_error.lock().unwrap().take()
    }
}

fn worker_loop(
    slot: Arc<Slot>,
    shared: Arc<PoolShared>,
    free: Arc<Mutex<Vec<bool>>>,
    free_cvar: Arc<Condvar>,
    slot_idx: usize,
) {
    loop {
        let msg = {
            let mut mailbox = slot.mailbox.lock().unwrap();
            while mailbox.is_none() {
                mailbox = slot.cvar.wait(mailbox).unwrap();
            }
            mailbox.take().unwrap()
        };

        let (ticket, encode) = match msg {
            SlotMsg::Shutdown => return,
            SlotMsg::Task { ticket, encode } => (ticket, encode),
        };

        // Running: compress freely, in parallel with every other worker.
        let encoded = encode();

        // Commit phase: wait our turn, then write/record in strict order.
        shared.wait_for_ticket(ticket);
        let commit_result = match encoded {
            Ok(block) => shared.committer.commit(ticket, block),
            Err(err) => Err(err),
        };
        if let Err(err) = &commit_result {
            tracing::error!(ticket, worker = slot_idx, %err, "block commit failed");
            shared.record_error(commit_result.unwrap_err());
        } else {
            tracing::debug!(ticket, worker = slot_idx, "block committed");
        }
        shared.advance_ticket();

        {
            let mut free_state = free.lock().unwrap();
            free_state[slot_idx] = true;
        }
        free_cvar.notify_all();
    }
}

impl Drop for OrderedWorkerPool {
    fn drop(&mut self) {
        for slot in &self.slots {
            let mut mailbox = slot.mailbox.lock().unwrap();
            *mailbox = Some(SlotMsg::Shutdown);
            slot.cvar.notify_one();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingCommitter {
        order: Mutex<Vec<u64>>,
        fail_ticket: Option<u64>,
    }

    impl BlockCommitter for RecordingCommitter {
        fn commit(&self, ticket: u64, _outcome: EncodedBlock) -> Result<()> {
            if self.fail_ticket == Some(ticket) {
                return Err(crate::error::PsarcError::OutOfMemory);
            }
            self.order.lock().unwrap().push(ticket);
            Ok(())
        }
    }

    fn encoded(byte: u8) -> EncodedBlock {
        EncodedBlock {
            bytes: vec![byte],
            stored_uncompressed: true,
        }
    }

    #[test]
    fn commits_happen_in_submission_order() {
        let committer = Arc::new(RecordingCommitter {
            order: Mutex::new(Vec::new()),
            fail_ticket: None,
        });
        let pool = OrderedWorkerPool::new(4, committer.clone());

        let counter = Arc::new(AtomicUsize::new(0));
        for i in 0..50u8 {
            let counter = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                // Vary the "work" duration so later tickets can race ahead
                // of earlier ones if ordering were not enforced.
                let spins = (50 - i as usize) % 7;
                for _ in 0..spins {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                Ok(encoded(i))
            }))
            .unwrap();
        }
        pool.wait_for_completion().unwrap();

        let order = committer.order.lock().unwrap();
        let expected: Vec<u64> = (1..=50).collect();
        assert_eq!(*order, expected);
    }

    #[test]
    fn surfaces_first_commit_error() {
        let committer = Arc::new(RecordingCommitter {
            order: Mutex::new(Vec::new()),
            fail_ticket: Some(3),
        });
        let pool = OrderedWorkerPool::new(2, committer);

        for i in 0..5u8 {
            pool.submit(Box::new(move || Ok(encoded(i)))).unwrap();
        }
        let result = pool.wait_for_completion();
        assert!(result.is_err());
    }
}
