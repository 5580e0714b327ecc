//! Helper macros for logging (console printing).

/// Log TRACE message.
///
/// Example:
/// ```ignore
/// pf_trace!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*)
    };
}

/// Log DEBUG message.
///
/// Example:
/// ```ignore
/// pf_debug!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

/// Log INFO message.
///
/// Example:
/// ```ignore
/// pf_info!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_info {
    ($($arg:tt)*) => {
        log::info!($($arg)*)
    };
}

/// Log WARN message.
///
/// Example:
/// ```ignore
/// pf_warn!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    };
}

/// Log ERROR message.
///
/// Example:
/// ```ignore
/// pf_error!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_error {
    ($($arg:tt)*) => {
        log::error!($($arg)*)
    };
}

/// Log an error string to logger and then return a `ParasolError`
/// containing the string.
///
/// Example:
/// ```ignore
/// return logged_err!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! logged_err {
    ($($arg:tt)*) => {{
        pf_error!($($arg)*);
        Err($crate::ParasolError(format!($($arg)*)))
    }};
}

#[cfg(test)]
mod print_tests {
    use crate::utils::ParasolError;

    #[test]
    fn error_no_args() {
        let e: Result<(), ParasolError> = logged_err!("interesting message");
        assert_eq!(e, Err(ParasolError("interesting message".into())));
    }

    #[test]
    fn error_with_args() {
        let e: Result<(), ParasolError> = logged_err!("got {} to print", 777);
        assert_eq!(e, Err(ParasolError("got 777 to print".into())));
    }
}
