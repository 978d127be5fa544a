use libsqlite3_sys::SQLITE_BUSY;
use rand::Rng;
use std::os::raw::c_int;
use std::thread;
use std::time::{Duration, Instant};

const BASE_DELAY_MILLIS: u64 = 10;
const MAX_DELAY_MILLIS: u64 = 500;

/// Computes the next randomized delay for a BUSY retry, or `None` when the
/// delay would run past the absolute deadline and the caller must give up.
///
/// The delay grows as `base * 2^attempt`, capped, with full jitter drawn from
/// `[0, capped)`.
pub fn next_delay(attempt: u32, deadline: Instant, now: Instant) -> Option<Duration> {
    let exponential = BASE_DELAY_MILLIS.saturating_mul(1u64 << attempt.min(16));
    let capped = exponential.min(MAX_DELAY_MILLIS);
    let jittered = rand::rng().random_range(0..capped);
    let delay = Duration::from_millis(jittered);
    if now + delay >= deadline {
        None
    } else {
        Some(delay)
    }
}

/// Drives `op` until it reports anything other than BUSY, sleeping between
/// attempts per [`next_delay`]. Returns the final non-BUSY result code, or
/// `Err(())` when the deadline was exhausted while the engine stayed BUSY.
///
/// The loop is iterative so a pathological BUSY storm cannot grow the stack.
pub fn retry<F>(deadline: Instant, mut op: F) -> std::result::Result<c_int, ()>
where
    F: FnMut() -> c_int,
{
    let mut attempt = 0u32;
    loop {
        let code = op();
        if code != SQLITE_BUSY {
            return Ok(code);
        }
        match next_delay(attempt, deadline, Instant::now()) {
            Some(delay) => {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
            None => return Err(()),
        }
    }
}
