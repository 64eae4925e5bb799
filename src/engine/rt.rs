//! Best-effort scheduling elevation for the mixer thread
//!
//! The tick loop competes with reader threads and whatever else the
//! host runs. Realtime scheduling is attempted first and usually needs
//! privileges; the fallback is a negative niceness. Both failing is
//! logged and otherwise harmless.

/// Call from the mixer thread after it starts.
#[cfg(unix)]
pub fn elevate_current_thread() {
    unsafe {
        let param = libc::sched_param { sched_priority: 10 };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) == 0 {
            tracing::info!("mixer thread scheduled SCHED_FIFO priority 10");
            return;
        }
        if libc::setpriority(libc::PRIO_PROCESS as _, 0, -10) == 0 {
            tracing::info!("mixer thread niceness set to -10");
        } else {
            tracing::debug!("running at default scheduling priority");
        }
    }
}

#[cfg(not(unix))]
pub fn elevate_current_thread() {
    tracing::debug!("scheduling elevation not implemented on this platform");
}
