use alloy::{
    primitives::Bytes,
    sol_types::{Panic, Revert, SolError},
};

use crate::sol_types::InvalidInitialization;

/// Revert reason emitted by OpenZeppelin v4 `Initializable` on a second initialization.
pub const OZ_V4_ALREADY_INITIALIZED: &str = "Initializable: contract is already initialized";

/// What a revert payload tells us about the failed call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevertKind {
    /// The target was already initialized. Re-running an initializer is expected to hit this.
    AlreadyInitialized,
    /// `Error(string)` or `Panic(uint256)` with a readable reason.
    Reason(String),
    /// Custom error we have no binding for.
    Unknown(Bytes),
}

/// Classify raw revert data.
///
/// Only the typed `InvalidInitialization()` error and the exact OZ v4 reason string count as
/// [`RevertKind::AlreadyInitialized`].
pub fn classify_revert(data: &[u8]) -> RevertKind {
    if data.starts_with(&InvalidInitialization::SELECTOR) {
        return RevertKind::AlreadyInitialized;
    }
    if let Ok(revert) = Revert::abi_decode(data, true) {
        if revert.reason == OZ_V4_ALREADY_INITIALIZED {
            return RevertKind::AlreadyInitialized;
        }
        return RevertKind::Reason(revert.reason);
    }
    if let Ok(panic) = Panic::abi_decode(data, true) {
        return RevertKind::Reason(format!("panic: {}", panic.code));
    }
    RevertKind::Unknown(Bytes::copy_from_slice(data))
}

#[cfg(test)]
mod tests {
    use alloy::primitives::U256;

    use super::*;

    #[test]
    fn test_classify_custom_initialization_error() {
        let data = InvalidInitialization {}.abi_encode();
        assert_eq!(classify_revert(&data), RevertKind::AlreadyInitialized);
    }

    #[test]
    fn test_classify_oz_v4_reason() {
        let data = Revert {
            reason: OZ_V4_ALREADY_INITIALIZED.to_string(),
        }
        .abi_encode();
        assert_eq!(classify_revert(&data), RevertKind::AlreadyInitialized);
    }

    #[test]
    fn test_classify_similar_reason_is_not_swallowed() {
        let data = Revert {
            reason: "Ownable: caller is not the owner, already initialized".to_string(),
        }
        .abi_encode();
        assert!(matches!(classify_revert(&data), RevertKind::Reason(_)));
    }

    #[test]
    fn test_classify_panic_and_unknown() {
        let data = Panic {
            code: U256::from(0x11),
        }
        .abi_encode();
        assert_eq!(
            classify_revert(&data),
            RevertKind::Reason("panic: 17".to_string())
        );

        let data = [0xde, 0xad, 0xbe, 0xef];
        assert_eq!(
            classify_revert(&data),
            RevertKind::Unknown(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]))
        );
    }
}
