//! Error types for probe runs.
//!
//! Everything the forwarding loop can hit at runtime is recoverable by design:
//! pool exhaustion and short sends are absorbed into the drop counters, and
//! malformed or unmatched replies are discarded. The only errors a caller ever
//! has to handle are configuration-time ones. The taxonomy still names the
//! runtime conditions so that counters, diagnostics, and tests can talk about
//! them precisely.

use thiserror::Error;

/// Result type alias for probe operations.
pub type Result<T, E = ProbeError> = std::result::Result<T, E>;

/// Main error type for probe operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProbeError {
    /// The buffer pool could not satisfy an allocation request.
    #[error("buffer pool exhausted (requested {requested}, available {available})")]
    NoBuffer { requested: usize, available: usize },

    /// The device accepted fewer packets than were offered to it.
    #[error("short send: device accepted {accepted} of {offered} packets")]
    ShortSend { offered: usize, accepted: usize },

    /// A reply carried a sequence number with no recorded send time.
    #[error("reply sequence {seq} has no recorded send time")]
    SequenceMismatch { seq: u16 },

    /// A received packet did not parse as the expected reply shape.
    #[error("malformed reply: {reason}")]
    MalformedReply { reason: String },

    /// The requested frame length cannot hold the required headers.
    #[error("frame length {frame_len} below minimum {min} for this probe kind")]
    InvalidLength { frame_len: usize, min: usize },

    /// The probe configuration is internally inconsistent.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl ProbeError {
    /// Returns whether the forwarding loop recovers from this error locally.
    ///
    /// Recoverable errors are counted (drops, bad checksums) or logged and the
    /// run continues; the rest are rejected before the loop starts.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProbeError::NoBuffer { .. } => true,
            ProbeError::ShortSend { .. } => true,
            ProbeError::SequenceMismatch { .. } => true,
            ProbeError::MalformedReply { .. } => true,
            ProbeError::InvalidLength { .. } => false,
            ProbeError::Config { .. } => false,
        }
    }

    /// Helper constructor for malformed-reply diagnostics.
    pub fn malformed(reason: impl Into<String>) -> Self {
        ProbeError::MalformedReply { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        ProbeError::Config { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn messages_carry_their_context(
            offered in 1usize..512,
            accepted in 0usize..512,
            seq in any::<u16>(),
            reason in "[a-z ]{1,40}",
        ) {
            let short = ProbeError::ShortSend { offered, accepted };
            prop_assert!(short.to_string().contains(&offered.to_string()));
            prop_assert!(short.to_string().contains(&accepted.to_string()));

            let mismatch = ProbeError::SequenceMismatch { seq };
            prop_assert!(mismatch.to_string().contains(&seq.to_string()));

            let malformed = ProbeError::malformed(reason.clone());
            prop_assert!(malformed.to_string().contains(&reason));
        }

        #[test]
        fn runtime_errors_are_recoverable(
            requested in 1usize..16,
            available in 0usize..16,
        ) {
            let no_buffer = ProbeError::NoBuffer { requested, available };
            prop_assert!(no_buffer.is_recoverable());
            let short_send = ProbeError::ShortSend { offered: requested, accepted: 0 };
            prop_assert!(short_send.is_recoverable());
        }
    }

    #[test]
    fn setup_errors_are_not_recoverable() {
        assert!(!ProbeError::InvalidLength { frame_len: 10, min: 42 }.is_recoverable());
        assert!(!ProbeError::config("probe count must be nonzero").is_recoverable());
    }

    #[test]
    fn error_is_send_sync_static() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<ProbeError>();

        let err = ProbeError::NoBuffer { requested: 2, available: 0 };
        let _: &dyn std::error::Error = &err;
    }
}
