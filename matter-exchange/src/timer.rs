//! The timer collaborator (spec §9: "model as a minimal interface `{ start,
//! stop, restart(duration), isRunning }`; retransmission, standalone-ack,
//! close, and timed-interaction each use a single instance; never share a
//! timer across purposes.")
//!
//! No async runtime is assumed (spec §5: single-threaded cooperative per
//! node, OS threads allowed internally for timers/I/O), so this is a plain
//! background-thread timer gated by a generation counter: restarting or
//! stopping bumps the generation, so a late-firing sleep from a superseded
//! `start` call becomes a no-op.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

struct TimerState {
    generation: u64,
    running: bool,
}

struct TimerInner {
    state: Mutex<TimerState>,
}

/// A single-purpose, restartable, one-shot timer.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TimerInner {
                state: Mutex::new(TimerState {
                    generation: 0,
                    running: false,
                }),
            }),
        }
    }

    /// Starts the timer, superseding any previous pending fire. `on_fire`
    /// runs on a background thread once `duration` elapses, unless the timer
    /// is stopped or restarted first.
    pub fn start<F>(&self, duration: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = {
            let mut state = self.inner.state.lock().expect("timer lock poisoned");
            state.generation += 1;
            state.running = true;
            state.generation
        };

        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            thread::sleep(duration);
            let fires = {
                let mut state = inner.state.lock().expect("timer lock poisoned");
                if state.generation == generation && state.running {
                    state.running = false;
                    true
                } else {
                    false
                }
            };
            if fires {
                on_fire();
            }
        });
    }

    /// Cancels a pending fire. Idempotent.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock().expect("timer lock poisoned");
        state.generation += 1;
        state.running = false;
    }

    pub fn restart<F>(&self, duration: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.stop();
        self.start(duration, on_fire);
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().expect("timer lock poisoned").running
    }
}
