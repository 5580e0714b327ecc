//! Customized unified error type.

use std::fmt;
use std::io;

/// Customized error type for Parasol.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParasolError(pub String);

impl ParasolError {
    /// Creates an error from anything that can be turned into a string.
    pub fn msg(m: impl ToString) -> Self {
        ParasolError(m.to_string())
    }
}

impl fmt::Display for ParasolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl std::error::Error for ParasolError {}

// Helper macro for saving boiler-plate `impl From<T>`s for transparent
// conversion from various common error types to `ParasolError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ParasolError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ParasolError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(toml::ser::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(tokio::task::JoinError);
impl_from_error!(tokio::sync::watch::error::SendError<bool>);

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ParasolError("what the heck?".into());
        assert_eq!(format!("{}", e), String::from("what the heck?"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "oh no!");
        let e = ParasolError::from(io_error);
        assert!(e.0.contains("oh no!"));
    }

    #[test]
    fn from_msg() {
        let e = ParasolError::msg(777);
        assert_eq!(e, ParasolError("777".into()));
    }
}
