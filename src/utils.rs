//! Identifier helpers

use anyhow::Context;
use bech32::Bech32m;
use uuid7::uuid7;

/// A fresh uuid7, bech32m encoded under `prefix`. uuid7 is time ordered, so
/// ids sort roughly by creation in the store.
pub fn new_prefixed_id(prefix: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(prefix).with_context(|| format!("invalid id prefix `{prefix}`"))?;
    let id = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(id)
}

/// The prefix of an id produced by [`new_prefixed_id`], if it decodes.
pub fn id_prefix(id: &str) -> Option<String> {
    bech32::decode(id)
        .ok()
        .filter(|(_, payload)| payload.len() == 16)
        .map(|(hrp, _)| hrp.to_string())
}
