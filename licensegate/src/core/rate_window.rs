//! Sliding-window event counter
//!
//! Approximates an events-per-second rate from the number of admission
//! events seen in a trailing window. Used when the embedding application
//! does not provide its own rate measurement.

use super::LimitError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(1);
const INITIAL_CAPACITY: usize = 128;

/// Trailing-window rate estimator
///
/// Retained timestamps always lie within `[now - window, now]`: the sequence
/// is pruned from the front on every insertion and every read.
///
/// # Example
///
/// ```
/// use licensegate::RateWindow;
/// use std::time::{Duration, Instant};
///
/// let window = RateWindow::new();
/// let start = Instant::now();
///
/// for i in 0..5 {
///     window.record_event(start + Duration::from_millis(i * 100));
/// }
///
/// assert_eq!(window.current_rate(start + Duration::from_millis(400)), 5.0);
/// assert_eq!(window.current_rate(start + Duration::from_secs(3)), 0.0);
/// ```
#[derive(Debug)]
pub struct RateWindow {
    window: Duration,
    events: Mutex<VecDeque<Instant>>,
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl RateWindow {
    /// Create an estimator with a one-second window
    pub fn new() -> Self {
        RateWindow {
            window: DEFAULT_WINDOW,
            events: Mutex::new(VecDeque::with_capacity(INITIAL_CAPACITY)),
        }
    }

    /// Create an estimator over a custom window
    ///
    /// # Errors
    ///
    /// - [`LimitError::InvalidWindow`]: if `window` is zero
    pub fn with_window(window: Duration) -> Result<Self, LimitError> {
        if window.is_zero() {
            return Err(LimitError::InvalidWindow);
        }

        Ok(RateWindow {
            window,
            events: Mutex::new(VecDeque::with_capacity(INITIAL_CAPACITY)),
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record one event at `now`
    pub fn record_event(&self, now: Instant) {
        let mut events = self.events.lock();

        // Callers capture `now` before taking the lock, so a slightly older
        // timestamp can arrive after a newer one. Keep the sequence ordered.
        let position = events.partition_point(|event| *event <= now);
        events.insert(position, now);

        prune(&mut events, self.window, now);
    }

    /// Events per second observed in the window ending at `now`
    pub fn current_rate(&self, now: Instant) -> f64 {
        let mut events = self.events.lock();
        prune(&mut events, self.window, now);

        let in_window = events.iter().filter(|event| **event <= now).count();
        in_window as f64 / self.window.as_secs_f64()
    }

    /// Forget every recorded event
    pub fn reset(&self) {
        self.events.lock().clear();
    }

    /// Number of timestamps currently retained
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

fn prune(events: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(oldest) = events.front() {
        if now.saturating_duration_since(*oldest) > window {
            events.pop_front();
        } else {
            break;
        }
    }
}
