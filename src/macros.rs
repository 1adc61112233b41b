macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::machine::machine_errors::fatal_error(&format!($($arg)*))
    };
}

macro_rules! memdebug {
    ($($arg:tt)*) => {
        if $crate::trace_base::debug_flag($crate::trace_base::DebugFlag::Mem) {
            log::debug!($($arg)*);
        }
    };
}

macro_rules! gotodebug {
    ($($arg:tt)*) => {
        if $crate::trace_base::debug_flag($crate::trace_base::DebugFlag::Goto) {
            log::trace!($($arg)*);
        }
    };
}

macro_rules! calldebug {
    ($($arg:tt)*) => {
        if $crate::trace_base::debug_flag($crate::trace_base::DebugFlag::Call) {
            log::trace!($($arg)*);
        }
    };
}
