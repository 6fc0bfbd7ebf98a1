// destroyer.rs — Bounded worker pool for off-thread destruction.
//
// Freeing a sorted set with tens of thousands of members is the one piece
// of work the event loop refuses to do inline.  The pool is a rayon
// executor fronted by a bounded crossbeam channel that acts as a submit
// semaphore, plus a pending counter with a condvar so `drain` (and Drop)
// can wait for quiescence.  Workers own each job exclusively after receipt;
// the submitter guarantees the value is fully detached from every structure
// before it is handed over.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct DestroyPool {
    pool: Arc<rayon::ThreadPool>,
    slot_tx: Sender<()>,
    slot_rx: Receiver<()>,
    state: Arc<(Mutex<usize>, Condvar)>,
}

impl DestroyPool {
    /// A pool of `nb_threads` workers accepting up to `queue_size` queued
    /// jobs before `submit` blocks.  Returns `None` when the executor cannot
    /// be built.
    pub fn new(nb_threads: usize, queue_size: usize) -> Option<DestroyPool> {
        if nb_threads < 1 || queue_size < 1 {
            return None;
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nb_threads)
            .thread_name(|i| format!("minikv-destroy-{i}"))
            .build()
            .ok()?;

        let capacity = queue_size + nb_threads;
        let (slot_tx, slot_rx) = bounded(capacity);
        for _ in 0..capacity {
            slot_tx.send(()).ok()?;
        }

        Some(DestroyPool {
            pool: Arc::new(pool),
            slot_tx,
            slot_rx,
            state: Arc::new((Mutex::new(0), Condvar::new())),
        })
    }

    /// Default sizing: a couple of workers, a short queue.
    pub fn with_defaults() -> Option<DestroyPool> {
        DestroyPool::new(num_cpus::get().clamp(1, 2), 64)
    }

    /// Hands an owned value to the pool to be dropped off-thread.  Blocks
    /// when the queue is full.
    pub fn discard<T: Send + 'static>(&self, value: T) {
        self.submit(Box::new(move || drop(value)));
    }

    fn submit(&self, job: Job) {
        self.slot_rx.recv().expect("destroyer slot channel closed");
        {
            let (lock, _cvar) = &*self.state;
            *lock.lock().expect("destroyer mutex poisoned") += 1;
        }
        let state = Arc::clone(&self.state);
        let slot_tx = self.slot_tx.clone();
        self.pool.spawn(move || {
            job();
            let (lock, cvar) = &*state;
            let mut pending = lock.lock().expect("destroyer mutex poisoned");
            *pending -= 1;
            if *pending == 0 {
                cvar.notify_all();
            }
            let _ = slot_tx.send(());
        });
    }

    /// Blocks until every submitted job has finished.  The pool keeps
    /// accepting work afterwards.
    pub fn drain(&self) {
        let (lock, cvar) = &*self.state;
        let mut pending = lock.lock().expect("destroyer mutex poisoned");
        while *pending > 0 {
            pending = cvar.wait(pending).expect("destroyer mutex poisoned");
        }
    }
}

impl Drop for DestroyPool {
    fn drop(&mut self) {
        // rayon joins its workers on drop; just make sure none is mid-job.
        self.drain();
    }
}
