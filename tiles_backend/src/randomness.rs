use candid::Principal;

use crate::types::{GameError, RANDOMNESS_CANISTER_ID};

/// The randomness canister: quotes a fee for a callback budget, accepts a
/// randomness request, and later delivers the seed through this canister's
/// `on_seed_delivered` endpoint. Seeds are opaque 32-byte values; nothing
/// about their structure is assumed beyond being fit for hashing.
pub fn service_principal() -> Principal {
    Principal::from_text(RANDOMNESS_CANISTER_ID).expect("Invalid randomness canister ID")
}

pub async fn quote_price(callback_budget: u64) -> Result<u64, GameError> {
    let (fee,): (u64,) =
        ic_cdk::api::call::call(service_principal(), "quote_price", (callback_budget,))
            .await
            .map_err(|(code, msg)| GameError::TransferFailed {
                message: format!("quote_price rejected: {:?} {}", code, msg),
            })?;
    Ok(fee)
}

/// Issues the randomness request and returns the correlation id that the
/// eventual delivery will carry.
pub async fn request_randomness(callback_budget: u64) -> Result<u64, GameError> {
    let (correlation_id,): (u64,) =
        ic_cdk::api::call::call(service_principal(), "request_randomness", (callback_budget,))
            .await
            .map_err(|(code, msg)| GameError::TransferFailed {
                message: format!("request_randomness rejected: {:?} {}", code, msg),
            })?;
    Ok(correlation_id)
}
