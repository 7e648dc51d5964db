//! The loop registry: named scheduling slots, cooperative cancellation,
//! and the attempt-dependent delay policy.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_timer::Delay;

use crate::{LoopError, LoopOutcome};

/// Delay and budget parameters for one loop.
///
/// The delay before invocation `n + 1` is `backoff_base + backoff_step * n`,
/// so the wait grows with the attempt count. Once `max_attempts`
/// invocations have run the loop terminates on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_step: Duration,
    pub silent: bool,
}

impl LoopSettings {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_step,
            silent: false,
        }
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        self.backoff_base + self.backoff_step * attempt
    }
}

/// Registry of active loops, keyed by name.
///
/// The registry is the only serialization primitive in the workspace:
/// at most one loop may be active under a given name, which is what
/// prevents duplicate concurrent polling of the same backend resource.
/// Cancellation is cooperative — [`LoopRegistry::end`] asks the named
/// loop to stop scheduling after its current invocation and is the only
/// supported cancellation path.
#[derive(Default)]
pub struct LoopRegistry {
    active: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the named loop stop scheduling after its current
    /// invocation. Idempotent; returns whether a loop was active under
    /// the name.
    pub fn end(&self, name: &str) -> bool {
        let active = self.active.lock().expect("loop registry lock");
        match active.get(name) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Whether a loop is currently active under the name.
    pub fn is_active(&self, name: &str) -> bool {
        self.active
            .lock()
            .expect("loop registry lock")
            .contains_key(name)
    }

    /// Runs `task` repeatedly under the named scheduling slot, sleeping
    /// with [`Delay`] between invocations.
    ///
    /// The task receives the 1-based attempt number. Returning `Err`
    /// rejects the whole loop and stops further scheduling. The name is
    /// freed again on every exit path.
    pub async fn run_loop<E, F, Fut>(
        &self,
        name: &str,
        settings: LoopSettings,
        task: F,
    ) -> Result<LoopOutcome, LoopError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        self.run_loop_with_sleeper(name, settings, task, |delay| Delay::new(delay))
            .await
    }

    /// [`LoopRegistry::run_loop`] with an injected sleep, so tests can
    /// observe the delay policy without waiting on a real clock.
    pub async fn run_loop_with_sleeper<E, F, Fut, Sleep, SleepFuture>(
        &self,
        name: &str,
        settings: LoopSettings,
        mut task: F,
        mut sleep: Sleep,
    ) -> Result<LoopOutcome, LoopError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        Sleep: FnMut(Duration) -> SleepFuture,
        SleepFuture: Future<Output = ()>,
    {
        let slot = self.claim(name)?;

        let mut attempt = 1;
        loop {
            if !settings.silent {
                tracing::debug!(loop_name = name, attempt, "polling loop attempt");
            }

            if let Err(error) = task(attempt).await {
                return Err(LoopError::Task(error));
            }

            if slot.end_requested() {
                return Ok(LoopOutcome::Ended);
            }

            if attempt >= settings.max_attempts {
                if !settings.silent {
                    tracing::debug!(loop_name = name, "polling loop attempt budget exhausted");
                }
                return Ok(LoopOutcome::AttemptsExhausted);
            }

            sleep(settings.delay_after_attempt(attempt)).await;
            attempt += 1;
        }
    }

    fn claim<E>(&self, name: &str) -> Result<SlotGuard<'_>, LoopError<E>> {
        let mut active = self.active.lock().expect("loop registry lock");
        if active.contains_key(name) {
            return Err(LoopError::already_active(name));
        }

        let flag = Arc::new(AtomicBool::new(false));
        active.insert(name.to_string(), Arc::clone(&flag));

        Ok(SlotGuard {
            registry: self,
            name: name.to_string(),
            flag,
        })
    }
}

/// Frees the named slot when the loop exits, whatever the exit path.
struct SlotGuard<'a> {
    registry: &'a LoopRegistry,
    name: String,
    flag: Arc<AtomicBool>,
}

impl SlotGuard<'_> {
    fn end_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.registry.active.lock() {
            active.remove(&self.name);
        }
    }
}
