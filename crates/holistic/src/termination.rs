//! Defines the [`Termination`] trait.

use std::{convert::Infallible, fmt::Debug, process};

/// Extension of [`std::process::Termination`] that lets the GUI driver inspect the exit status.
///
/// The event loop never returns control to `main` on some platforms, so the application thread's
/// result decides the process exit code instead.
pub trait Termination: process::Termination {
    fn is_success(&self) -> bool;
}

impl Termination for Infallible {
    fn is_success(&self) -> bool {
        match *self {}
    }
}

impl Termination for () {
    fn is_success(&self) -> bool {
        true
    }
}

impl<T: Termination, E: Debug> Termination for Result<T, E> {
    fn is_success(&self) -> bool {
        matches!(self, Ok(term) if term.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_success() {
        assert!(Ok::<(), anyhow::Error>(()).is_success());
        assert!(!Err::<(), _>(anyhow::anyhow!("camera unplugged")).is_success());
    }
}
