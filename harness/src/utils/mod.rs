pub mod logging;

use alloy::primitives::Address;

/// First ten characters of the checksummed address, as used in test names.
pub fn short_address(address: &Address) -> String {
    address.to_string().chars().take(10).collect()
}
