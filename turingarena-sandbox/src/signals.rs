use std::ffi::CStr;

use nix::sys::signal::Signal;

/// Returns a string with the text representation of the signal.
pub(crate) fn strsignal(signal: i32) -> String {
    // SAFETY: strsignal returns a pointer to a static or thread-local string
    let description = unsafe { libc::strsignal(signal) };
    if description.is_null() {
        return "unknown".into();
    }
    unsafe { CStr::from_ptr(description) }
        .to_string_lossy()
        .to_string()
}

/// The symbolic name of the signal, like `SIGSEGV`.
pub(crate) fn signal_name(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => "unknown".into(),
    }
}

/// Describe the termination of a process killed by a signal.
pub(crate) fn describe_signal(signal: i32) -> String {
    let mut message = format!("interrupted by signal {} - {}", signal, signal_name(signal));
    if signal == libc::SIGSEGV || signal == libc::SIGSYS {
        message.push_str(" - ");
        message.push_str(&strsignal(signal));
    }
    message
}
