//! Wait/notify on the lock word.
//!
//! On Linux this is a shared (non-private) futex so a waiter in one process
//! is woken by a release in another. Elsewhere we fall back to sleeping for
//! the wait slice and re-checking.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

#[cfg(target_os = "linux")]
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Duration) {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    // EAGAIN (value already changed), EINTR and ETIMEDOUT all just mean
    // "go look at the word again".
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32,
            libc::FUTEX_WAIT,
            expected,
            &ts as *const libc::timespec,
        );
    }
}

#[cfg(target_os = "linux")]
pub(crate) fn wake_one(word: &AtomicU32) {
    unsafe {
        libc::syscall(libc::SYS_futex, word as *const AtomicU32, libc::FUTEX_WAKE, 1i32);
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Duration) {
    use std::sync::atomic::Ordering;

    if word.load(Ordering::Acquire) == expected {
        std::thread::sleep(timeout.min(Duration::from_micros(250)));
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn wake_one(_word: &AtomicU32) {}
