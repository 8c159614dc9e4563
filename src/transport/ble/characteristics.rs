//! Request/response exchange over a single GATT characteristic

use bluer::gatt::remote::Characteristic;
use tracing::debug;

use crate::core::error::{TransportError, TransportResult};

use super::{
    chunking::{self, Reassembler},
    uuids::DEFAULT_CHUNK_SIZE,
};

/// Write `payload` in MTU sized chunks, then read chunks until the reply is complete
pub async fn exchange(characteristic: &Characteristic, payload: &[u8]) -> TransportResult<Vec<u8>> {
    let chunk_size = match characteristic.mtu().await {
        Ok(mtu) => chunking::chunk_size_for_mtu(mtu),
        Err(e) => {
            debug!("MTU unavailable ({}), using {} byte chunks", e, DEFAULT_CHUNK_SIZE);
            DEFAULT_CHUNK_SIZE
        }
    };

    let chunks = chunking::split(payload, chunk_size);
    debug!(
        "Writing {} bytes in {} chunk(s) of up to {} bytes",
        payload.len(),
        chunks.len(),
        chunk_size
    );
    for chunk in &chunks {
        characteristic.write(chunk).await?;
    }

    let mut reassembler = Reassembler::new();
    loop {
        let chunk = characteristic.read().await?;
        if let Some(message) = reassembler.push(&chunk).map_err(TransportError::Ble)? {
            debug!("Read {} byte reply", message.len());
            return Ok(message);
        }
    }
}
