// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thread placement: core pinning and real-time scheduling.
//!
//! Both operations apply to the *calling* thread, so sender workers call
//! them first thing in their run loop. Failure to pin or elevate is a
//! logged warning, never an error — the gateway stays correct, just less
//! deterministic.

use crate::message::Priority;

/// Pin the calling thread to the core at `index` in the enumeration
/// order reported by the OS. Returns whether the pin took effect.
pub fn pin_current_thread(index: usize) -> bool {
    let core_ids = match core_affinity::get_core_ids() {
        Some(ids) if !ids.is_empty() => ids,
        _ => {
            log::warn!("core enumeration unavailable; cannot pin to core {}", index);
            return false;
        }
    };

    let core = match core_ids.get(index) {
        Some(core) => *core,
        None => {
            log::warn!(
                "core {} out of range ({} cores available); not pinning",
                index,
                core_ids.len()
            );
            return false;
        }
    };

    if core_affinity::set_for_current(core) {
        log::debug!("pinned thread to core {}", index);
        true
    } else {
        log::warn!("failed to pin thread to core {}", index);
        false
    }
}

/// Request real-time scheduling for the calling thread.
///
/// Linux: SCHED_FIFO at priority 99 (requires CAP_SYS_NICE). Darwin: a
/// QoS class hint derived from the lane priority. Elsewhere: no-op.
pub fn set_real_time(priority: Priority) -> bool {
    #[cfg(target_os = "linux")]
    {
        let _ = priority;
        let param = libc::sched_param { sched_priority: 99 };
        // SAFETY: pthread_self() is the calling thread; param outlives
        // the call.
        let rc = unsafe {
            libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
        };
        if rc == 0 {
            log::debug!("SCHED_FIFO(99) applied");
            true
        } else {
            log::warn!("SCHED_FIFO rejected (errno {}); running best-effort", rc);
            false
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        let qos = match priority {
            Priority::Critical | Priority::High => libc::qos_class_t::QOS_CLASS_USER_INTERACTIVE,
            Priority::Medium => libc::qos_class_t::QOS_CLASS_USER_INITIATED,
            Priority::Low => libc::qos_class_t::QOS_CLASS_DEFAULT,
        };
        // SAFETY: applies only to the calling thread.
        let rc = unsafe { libc::pthread_set_qos_class_self_np(qos, 0) };
        if rc == 0 {
            log::debug!("QoS class applied for {} lane", priority);
            true
        } else {
            log::warn!("QoS class rejected (errno {})", rc);
            false
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
    {
        let _ = priority;
        log::warn!("real-time scheduling unsupported on this platform");
        false
    }
}
