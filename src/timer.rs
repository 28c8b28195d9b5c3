//! Timer-thread base (spec.md §4.6): periodic callback infrastructure for
//! polling and keepalive. Each owner spawns its own timer thread, the same
//! way the teacher's `Scheduler`/`World` each own a dedicated worker thread
//! (`core/src/schedule.rs`, `core/src/world.rs`) rather than sharing one
//! global timer.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use thread_priority::{ThreadBuilder, ThreadPriority};

enum TimerControl {
    Stop,
}

/// A running periodic timer. Dropping or calling `stop` joins the thread
/// within a bounded time (spec.md §5 "Cancellation / timeout", ≤100 ms).
pub struct TimerThread {
    control_tx: Sender<TimerControl>,
    join: Option<JoinHandle<()>>,
}

impl TimerThread {
    /// Spawns a thread that calls `callback()` every `interval` after an
    /// initial `delay`, until `stop()` is called. The callback must be
    /// non-blocking or short-running (spec.md §4.6).
    pub fn start<F>(name: &str, delay: Duration, interval: Duration, mut callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (control_tx, control_rx): (Sender<TimerControl>, Receiver<TimerControl>) = bounded(1);
        let thread_name = name.to_string();
        let join = ThreadBuilder::default()
            .name(thread_name)
            .priority(ThreadPriority::Min)
            .spawn(move |_| {
                if !delay.is_zero() && control_rx.recv_timeout(delay).is_ok() {
                    return;
                }
                loop {
                    match control_rx.recv_timeout(interval) {
                        Ok(TimerControl::Stop) => return,
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => callback(),
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .expect("failed to spawn timer thread");
        TimerThread {
            control_tx,
            join: Some(join),
        }
    }

    pub fn stop(&mut self) {
        let _ = self.control_tx.send(TimerControl::Stop);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_repeatedly_until_stopped() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let mut timer = TimerThread::start(
            "test-timer",
            Duration::from_millis(0),
            Duration::from_millis(10),
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );
        std::thread::sleep(Duration::from_millis(55));
        timer.stop();
        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
