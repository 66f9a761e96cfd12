use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, select};
use tracing::{debug, info, warn};

use super::{Escalator, JitOptions, JitSlot, JitState};
use crate::error::JitError;
use crate::function::Function;
use crate::{Shared, ValueType};

/// Submitting end of a worker's queue, held by generators that trigger escalation
/// automatically.
pub(crate) struct JitQueue<V> {
    tx: Sender<Shared<JitSlot<V>>>,
    cancelled: Shared<AtomicBool>,
}

impl<V> Clone for JitQueue<V> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancelled: Shared::clone(&self.cancelled),
        }
    }
}

impl<V: ValueType> JitQueue<V> {
    pub(crate) fn submit(&self, slot: Shared<JitSlot<V>>) -> Result<(), JitError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(JitError::WorkerStopped);
        }
        if !slot.mark_queued() {
            return Ok(());
        }

        let id = slot.id();
        match self.tx.try_send(slot) {
            Ok(()) => {
                info!(id, "jit escalation queued");
                Ok(())
            }
            Err(TrySendError::Full(slot)) => {
                warn!(id, "jit queue is full, request dropped");
                slot.set_state(JitState::NotRequested);
                Err(JitError::QueueFull)
            }
            Err(TrySendError::Disconnected(slot)) => {
                warn!(id, "jit worker is not running, request dropped");
                slot.set_state(JitState::NotRequested);
                Err(JitError::WorkerStopped)
            }
        }
    }
}

/// Background thread running escalations from a bounded queue.
///
/// Dropping the worker cancels it: the escalation in flight is abandoned without installing
/// its result and queued requests fail with [`JitError::Cancelled`].
pub struct JitWorker<V> {
    queue: JitQueue<V>,
    threshold: u64,
    cancel_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl<V: ValueType> JitWorker<V> {
    pub fn new<E>(escalator: E, options: &JitOptions) -> Result<Self, JitError>
    where
        E: Escalator<V> + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(options.queue_capacity.max(1));
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
        let cancelled = Shared::new(AtomicBool::new(false));

        let flag = Shared::clone(&cancelled);
        let handle = thread::Builder::new()
            .name("funcgen-jit".to_string())
            .spawn(move || run(escalator, rx, cancel_rx, flag))?;

        Ok(Self {
            queue: JitQueue { tx, cancelled },
            threshold: options.threshold,
            cancel_tx,
            handle: Some(handle),
        })
    }

    /// Queues `function` for escalation. Completion is observable through
    /// [`Function::jit_state`].
    pub fn request(&self, function: &Function<V>) -> Result<(), JitError> {
        let slot = function.jit.as_ref().ok_or(JitError::NotEscalatable)?;
        self.queue.submit(Shared::clone(slot))
    }

    /// Stops the worker. Queued requests are dropped without being escalated.
    pub fn cancel(&self) {
        if !self.queue.cancelled.swap(true, Ordering::AcqRel) {
            debug!("cancelling jit worker");
            let _ = self.cancel_tx.try_send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.queue.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn queue(&self) -> JitQueue<V> {
        self.queue.clone()
    }

    pub(crate) fn threshold(&self) -> u64 {
        self.threshold
    }
}

impl<V> Drop for JitWorker<V> {
    fn drop(&mut self) {
        self.queue.cancelled.store(true, Ordering::Release);
        let _ = self.cancel_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run<V, E>(
    escalator: E,
    rx: Receiver<Shared<JitSlot<V>>>,
    cancel_rx: Receiver<()>,
    cancelled: Shared<AtomicBool>,
) where
    V: ValueType,
    E: Escalator<V>,
{
    loop {
        select! {
            recv(cancel_rx) -> _ => break,
            recv(rx) -> slot => match slot {
                Ok(slot) if cancelled.load(Ordering::Acquire) => {
                    drop_request(&slot);
                    break;
                }
                Ok(slot) => {
                    // Failures are recorded on the slot.
                    let _ = slot.run(&escalator, &cancelled);
                }
                Err(_) => break,
            },
        }
    }

    while let Ok(slot) = rx.try_recv() {
        drop_request(&slot);
    }
}

fn drop_request<V>(slot: &JitSlot<V>) {
    warn!(id = slot.id(), "jit worker cancelled, request dropped");
    *slot.state.lock() = JitState::Failed(JitError::Cancelled);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::ast::build;
    use crate::ast::node::IdentName;
    use crate::jit::{JitContext, JitMarshal, JitRequest, JitTrigger, NativeEntry};

    struct F64Marshal;

    impl JitMarshal<f64> for F64Marshal {
        fn to_native(&self, value: &f64) -> Option<f64> {
            Some(*value)
        }

        fn from_native(&self, value: f64) -> f64 {
            value
        }
    }

    /// Blocks until cancelled, counting invocations.
    struct Blocking(Shared<AtomicUsize>);

    impl Escalator<f64> for Blocking {
        fn escalate(&self, _: &JitRequest<'_, f64>, cancel: &AtomicBool) -> Result<NativeEntry, JitError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            while !cancel.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            Err(JitError::Cancelled)
        }
    }

    struct Identity;

    impl Escalator<f64> for Identity {
        fn escalate(&self, _: &JitRequest<'_, f64>, _: &AtomicBool) -> Result<NativeEntry, JitError> {
            Ok(Shared::new(|args: &[f64]| args[0]))
        }
    }

    fn slot() -> Shared<JitSlot<f64>> {
        let context = Shared::new(JitContext {
            marshal: Shared::new(F64Marshal) as Shared<dyn JitMarshal<f64>>,
            trigger: None,
        });
        Shared::new(JitSlot::new(
            Shared::from(vec![IdentName::new("x")]),
            build::ident("x"),
            context,
        ))
    }

    fn wait_for(slot: &JitSlot<f64>, done: impl Fn(&JitState) -> bool) -> JitState {
        let started = Instant::now();
        loop {
            let state = slot.state();
            if done(&state) || started.elapsed() > Duration::from_secs(10) {
                return state;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_worker_escalates_queued_slot() {
        let worker = JitWorker::new(Identity, &JitOptions::default()).unwrap();
        let slot = slot();
        worker.queue().submit(Shared::clone(&slot)).unwrap();

        assert_eq!(wait_for(&slot, |s| *s == JitState::Ready), JitState::Ready);
        assert_eq!(slot.call_native(&[3.0]), Some(3.0));
    }

    #[test]
    fn test_worker_cancel_drops_queued_requests() {
        let calls = Shared::new(AtomicUsize::new(0));
        let worker = JitWorker::new(
            Blocking(Shared::clone(&calls)),
            &JitOptions {
                queue_capacity: 4,
                ..JitOptions::default()
            },
        )
        .unwrap();

        let first = slot();
        let second = slot();
        worker.queue().submit(Shared::clone(&first)).unwrap();
        wait_for(&first, |s| *s == JitState::Compiling);
        worker.queue().submit(Shared::clone(&second)).unwrap();

        worker.cancel();
        drop(worker);

        assert_eq!(first.state(), JitState::Failed(JitError::Cancelled));
        assert_eq!(second.state(), JitState::Failed(JitError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!first.is_ready());
    }

    #[test]
    fn test_submit_after_cancel() {
        let worker = JitWorker::new(Identity, &JitOptions::default()).unwrap();
        worker.cancel();
        assert!(worker.is_cancelled());

        let slot = slot();
        assert_eq!(worker.queue().submit(Shared::clone(&slot)), Err(JitError::WorkerStopped));
        assert_eq!(slot.state(), JitState::NotRequested);
    }

    #[test]
    fn test_threshold_retries_after_full_queue() {
        let worker = JitWorker::new(
            Blocking(Shared::new(AtomicUsize::new(0))),
            &JitOptions {
                queue_capacity: 1,
                ..JitOptions::default()
            },
        )
        .unwrap();

        let busy = slot();
        worker.queue().submit(Shared::clone(&busy)).unwrap();
        wait_for(&busy, |s| *s == JitState::Compiling);
        worker.queue().submit(slot()).unwrap();

        let context = Shared::new(JitContext {
            marshal: Shared::new(F64Marshal) as Shared<dyn JitMarshal<f64>>,
            trigger: Some(JitTrigger {
                queue: worker.queue(),
                threshold: 2,
            }),
        });
        let hot = Shared::new(JitSlot::new(
            Shared::from(vec![IdentName::new("x")]),
            build::ident("x"),
            context,
        ));
        JitSlot::record_call(&hot);
        JitSlot::record_call(&hot);

        assert_eq!(hot.state(), JitState::NotRequested);
        assert_eq!(hot.calls.load(Ordering::Relaxed), 0);

        JitSlot::record_call(&hot);
        assert_eq!(hot.calls.load(Ordering::Relaxed), 1);
    }
}
