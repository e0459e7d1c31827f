//! # Diagnostics
//!
//! Fail-fast runtime assertions. A failed [`kernel_assert!`] logs where and
//! why it failed together with the offending task, then pends that task
//! for good. There is no unwinding and no recovery path; the rest of the
//! system keeps running.

use core::fmt;

/// Check a kernel invariant at run time.
///
/// ```ignore
/// kernel_assert!(count <= capacity);
/// kernel_assert!(slot < MAX_TASKS, "bad slot {}", slot);
/// ```
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr $(,)?) => {
        $crate::kernel_assert!($cond, "{}", ::core::stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::diag::assert_failed(
                ::core::file!(),
                ::core::line!(),
                ::core::format_args!($($arg)+),
            )
        }
    };
}

/// Report a failed assertion and pend the calling task.
#[cold]
pub fn assert_failed(file: &str, line: u32, args: fmt::Arguments<'_>) -> ! {
    log::error!("assertion failed at {}:{}: {}", file, line, args);
    match crate::kernel::current().and_then(|task| crate::kernel::task_info(task).ok()) {
        Some(info) => log::error!("task {} '{}' pended", info.id, info.name),
        None => log::error!("assertion outside of any task"),
    }
    crate::kernel::pend()
}
