//! Escalation of hot closures to natively compiled code.
//!
//! A closure literal compiled by a generator with a [`JitMarshal`] registered carries a
//! slot that tracks its escalation:
//!
//! ```text
//! NotRequested -> Queued -> Compiling -> Ready | Failed
//! ```
//!
//! Escalation is performed by an [`Escalator`]. [`NativeJit`] emits C source for the
//! closure body, runs the system C compiler and loads the resulting shared library;
//! [`NoJit`] refuses every request. A [`JitWorker`] runs escalations on a background thread,
//! either on explicit request or once a closure was called [`JitOptions::threshold`] times.
//!
//! Failures never affect evaluation: the interpreted closure stays authoritative and a
//! closure is callable through either path at any time.
mod codegen;
mod native;
mod worker;

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smallvec::SmallVec;

pub use codegen::{BinaryTemplate, CSource, UnaryTemplate};
pub use native::NativeJit;
pub use worker::JitWorker;
pub(crate) use worker::JitQueue;

use crate::ast::node::{IdentName, Node, Params};
use crate::error::JitError;
use crate::function::Function;
use crate::{AstRef, Shared, ValueType};

/// Natively compiled entry point taking the marshalled arguments in parameter order.
pub type NativeEntry = Shared<dyn Fn(&[f64]) -> f64 + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum JitState {
    NotRequested,
    Queued,
    Compiling,
    Ready,
    Failed(JitError),
}

impl JitState {
    pub fn is_failed(&self) -> bool {
        matches!(self, JitState::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JitOptions {
    /// Interpreted calls after which a closure is queued for escalation.
    pub threshold: u64,
    pub queue_capacity: usize,
    /// C compiler to invoke. Defaults to `$CC`, then the first of `cc`, `gcc` and `clang`
    /// that can be run.
    pub compiler: Option<String>,
    pub compiler_timeout: Duration,
    pub opt_level: u8,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self {
            threshold: 1000,
            queue_capacity: 64,
            compiler: None,
            compiler_timeout: Duration::from_secs(30),
            opt_level: 2,
        }
    }
}

/// Converts values to and from the native number representation.
///
/// Native code computes with `f64`. A marshal must only accept arguments for which the
/// interpreted operators compute exactly what the `f64` operations compute, and
/// `from_native` must rebuild the value the interpreter would have returned.
pub trait JitMarshal<V>: Send + Sync {
    /// Native form of a call argument. `None` sends the call down the interpreted path.
    fn to_native(&self, value: &V) -> Option<f64>;

    fn from_native(&self, value: f64) -> V;

    /// Native form of a constant in a closure body. Constants are only ever combined with
    /// a parameter, so this may accept values `to_native` rejects.
    fn constant_to_native(&self, value: &V) -> Option<f64> {
        self.to_native(value)
    }
}

/// A closure body to escalate.
pub struct JitRequest<'a, V> {
    pub id: u64,
    pub params: &'a [IdentName],
    pub body: &'a Node<V>,
    pub marshal: &'a dyn JitMarshal<V>,
}

pub trait Escalator<V>: Send + Sync {
    /// Produces a native entry point for `request`. Implementations poll `cancel` while
    /// waiting on external work and fail with [`JitError::Cancelled`] once it is set.
    fn escalate(&self, request: &JitRequest<'_, V>, cancel: &AtomicBool) -> Result<NativeEntry, JitError>;
}

/// Escalator that refuses every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJit;

impl<V> Escalator<V> for NoJit {
    fn escalate(&self, _: &JitRequest<'_, V>, _: &AtomicBool) -> Result<NativeEntry, JitError> {
        Err(JitError::Disabled)
    }
}

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

/// Escalation settings shared by every closure a generator compiles.
pub(crate) struct JitContext<V> {
    pub(crate) marshal: Shared<dyn JitMarshal<V>>,
    pub(crate) trigger: Option<JitTrigger<V>>,
}

pub(crate) struct JitTrigger<V> {
    pub(crate) queue: JitQueue<V>,
    pub(crate) threshold: u64,
}

/// Escalation state of one closure literal, shared by every closure value created from it.
pub(crate) struct JitSlot<V> {
    id: u64,
    params: Params,
    body: AstRef<V>,
    context: Shared<JitContext<V>>,
    calls: AtomicU64,
    state: Mutex<JitState>,
    native: OnceLock<NativeEntry>,
}

impl<V> JitSlot<V> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> JitState {
        self.state.lock().clone()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.native.get().is_some()
    }
}

impl<V: ValueType> JitSlot<V> {
    pub(crate) fn new(params: Params, body: AstRef<V>, context: Shared<JitContext<V>>) -> Self {
        Self {
            id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
            params,
            body,
            context,
            calls: AtomicU64::new(0),
            state: Mutex::new(JitState::NotRequested),
            native: OnceLock::new(),
        }
    }

    /// Runs the native entry point, `None` if there is none or an argument cannot be
    /// marshalled.
    #[inline]
    pub(crate) fn call_native(&self, args: &[V]) -> Option<V> {
        let entry = self.native.get()?;
        let marshal = &self.context.marshal;
        let native = args
            .iter()
            .map(|arg| marshal.to_native(arg))
            .collect::<Option<SmallVec<[f64; 8]>>>()?;
        Some(marshal.from_native(entry(&native)))
    }

    /// Counts an interpreted call and queues the slot once the threshold is reached.
    pub(crate) fn record_call(slot: &Shared<Self>) {
        let Some(trigger) = &slot.context.trigger else {
            return;
        };
        let calls = slot.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if calls == trigger.threshold {
            tracing::debug!(id = slot.id, calls, "jit threshold reached");
            match trigger.queue.submit(Shared::clone(slot)) {
                Ok(()) => {}
                // Retried once the closure reaches the threshold again.
                Err(JitError::QueueFull) => slot.calls.store(0, Ordering::Relaxed),
                Err(err) => tracing::debug!(id = slot.id, error = %err, "jit request rejected"),
            }
        }
    }

    /// Moves the slot from `NotRequested` to `Queued`, returns `false` if it is already past
    /// that state.
    pub(crate) fn mark_queued(&self) -> bool {
        let mut state = self.state.lock();
        if *state == JitState::NotRequested {
            *state = JitState::Queued;
            true
        } else {
            false
        }
    }

    pub(crate) fn set_state(&self, next: JitState) {
        *self.state.lock() = next;
    }

    /// Escalates the slot with `escalator`. A slot that is already native stays native.
    pub(crate) fn run(&self, escalator: &dyn Escalator<V>, cancel: &AtomicBool) -> Result<(), JitError> {
        if self.is_ready() {
            return Ok(());
        }
        self.set_state(JitState::Compiling);
        tracing::debug!(id = self.id, "jit escalation compiling");

        let started = Instant::now();
        let request = JitRequest {
            id: self.id,
            params: &self.params,
            body: &self.body,
            marshal: &*self.context.marshal,
        };

        let result = escalator.escalate(&request, cancel).and_then(|entry| {
            if cancel.load(Ordering::Acquire) {
                return Err(JitError::Cancelled);
            }
            // Only one escalation can reach this point per slot, a lost race keeps the
            // entry installed first.
            let _ = self.native.set(entry);
            Ok(())
        });

        match result {
            Ok(()) => {
                self.set_state(JitState::Ready);
                tracing::info!(
                    id = self.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "jit escalation ready"
                );
                Ok(())
            }
            Err(err) => {
                tracing::info!(id = self.id, error = %err, "jit escalation failed");
                self.set_state(JitState::Failed(err.clone()));
                Err(err)
            }
        }
    }
}

/// Escalates `function` on the calling thread.
///
/// Returns [`JitError::NotEscalatable`] for functions that are not closure literals of a
/// generator with a [`JitMarshal`] registered.
pub fn escalate<V: ValueType>(function: &Function<V>, escalator: &dyn Escalator<V>) -> Result<(), JitError> {
    let slot = function.jit.as_ref().ok_or(JitError::NotEscalatable)?;
    slot.mark_queued();
    slot.run(escalator, &AtomicBool::new(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build;

    struct F64Marshal;

    impl JitMarshal<f64> for F64Marshal {
        fn to_native(&self, value: &f64) -> Option<f64> {
            Some(*value)
        }

        fn from_native(&self, value: f64) -> f64 {
            value
        }
    }

    struct Doubler;

    impl Escalator<f64> for Doubler {
        fn escalate(&self, request: &JitRequest<'_, f64>, _: &AtomicBool) -> Result<NativeEntry, JitError> {
            assert_eq!(request.params.len(), 1);
            Ok(Shared::new(|args: &[f64]| args[0] * 2.0))
        }
    }

    fn slot() -> JitSlot<f64> {
        let context = Shared::new(JitContext {
            marshal: Shared::new(F64Marshal) as Shared<dyn JitMarshal<f64>>,
            trigger: None,
        });
        JitSlot::new(
            Shared::from(vec![IdentName::new("x")]),
            build::ident("x"),
            context,
        )
    }

    #[test]
    fn test_slot_ready_after_escalation() {
        let slot = slot();
        assert_eq!(slot.call_native(&[2.0]), None);
        assert!(slot.mark_queued());
        assert!(!slot.mark_queued());

        slot.run(&Doubler, &AtomicBool::new(false)).unwrap();
        assert_eq!(slot.state(), JitState::Ready);
        assert_eq!(slot.call_native(&[2.0]), Some(4.0));
    }

    #[test]
    fn test_slot_failed_with_no_jit() {
        let slot = slot();
        assert_eq!(slot.run(&NoJit, &AtomicBool::new(false)), Err(JitError::Disabled));
        assert_eq!(slot.state(), JitState::Failed(JitError::Disabled));
        assert!(!slot.is_ready());
    }

    #[test]
    fn test_slot_cancelled_entry_is_not_installed() {
        let slot = slot();
        assert_eq!(slot.run(&Doubler, &AtomicBool::new(true)), Err(JitError::Cancelled));
        assert!(!slot.is_ready());
        assert_eq!(slot.call_native(&[1.0]), None);
    }

    #[test]
    fn test_escalate_host_function() {
        let function = Function::simple(|x: &f64| Ok(*x));
        assert_eq!(escalate(&function, &NoJit), Err(JitError::NotEscalatable));
    }
}
