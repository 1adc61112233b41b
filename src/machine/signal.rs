//! Last-resort handlers for hardware faults.
//!
//! Memory zones detect their own overflows, so a SIGSEGV or SIGBUS that
//! reaches the process means the runtime's state can no longer be trusted.
//! The handlers only report the signal and exit; they use nothing but
//! async-signal-safe calls.

#[cfg(unix)]
mod imp {
    use std::io;
    use std::sync::Once;

    static INSTALL: Once = Once::new();

    const SEGV_MESSAGE: &[u8] = b"\n*** Mercury runtime: caught segmentation violation ***\nexiting from signal handler\n";
    const BUS_MESSAGE: &[u8] = b"\n*** Mercury runtime: caught bus error ***\nexiting from signal handler\n";
    const OTHER_MESSAGE: &[u8] = b"\n*** Mercury runtime: caught unexpected signal ***\nexiting from signal handler\n";

    extern "C" fn fault_handler(signum: libc::c_int) {
        let message = match signum {
            libc::SIGSEGV => SEGV_MESSAGE,
            libc::SIGBUS => BUS_MESSAGE,
            _ => OTHER_MESSAGE,
        };

        unsafe {
            libc::write(
                libc::STDERR_FILENO,
                message.as_ptr() as *const libc::c_void,
                message.len(),
            );
            libc::_exit(1);
        }
    }

    fn install(signum: libc::c_int) -> io::Result<()> {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();

            action.sa_sigaction = fault_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);

            if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    }

    pub fn setup_signals() -> io::Result<()> {
        let mut result = Ok(());

        INSTALL.call_once(|| {
            result = install(libc::SIGSEGV).and_then(|()| install(libc::SIGBUS));
        });

        if result.is_ok() {
            log::debug!("installed fault handlers for SIGSEGV and SIGBUS");
        }

        result
    }
}

#[cfg(unix)]
pub use imp::setup_signals;

/// Fault handlers are only installed on unix.
#[cfg(not(unix))]
pub fn setup_signals() -> std::io::Result<()> {
    Ok(())
}
