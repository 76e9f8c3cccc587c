//! Blockwise transfers (RFC 7959).
//!
//! Block2: [`set_payload_checked`] slices a response body per the request's
//! Block2 option. Block1: [`Block1Assembler`] collects request bodies that
//! arrive in several blocks.

use std::collections::HashMap;
use std::net::SocketAddr;

use coap_core::block::BlockValue;
use coap_core::message::{Code, Message};
use coap_core::option::number::{BLOCK1, BLOCK2, SIZE1, SIZE2};

use crate::reliability::is_older_than;

// ======================================================================== //
// Block2
// ======================================================================== //

/// Set `payload` on `response`, going blockwise when needed.
///
/// Bodies that fit in `max_chunk` are set whole unless the request asked for
/// a block. Otherwise the block at the requested offset is sent, with the
/// block size clamped to the largest power of two not above `max_chunk`. A
/// block past the end of the body turns the response into `4.02 Bad Option`.
pub fn set_payload_checked(
    request: Option<&Message>,
    response: &mut Message,
    payload: &[u8],
    max_chunk: usize,
) {
    let requested = match request.map(|r| BlockValue::from_options(&r.options, BLOCK2)) {
        Some(Ok(block)) => block,
        Some(Err(e)) => {
            tracing::debug!(error = %e, "malformed Block2 in request");
            return reject_block(response);
        }
        None => None,
    };

    if requested.is_none() && payload.len() <= max_chunk {
        response.payload = payload.to_vec();
        return;
    }

    let chunk_szx = BlockValue::szx_at_most(max_chunk);
    let (offset, szx) = match requested {
        Some(block) => (block.offset(), block.szx.min(chunk_szx)),
        None => (0, chunk_szx),
    };
    if offset > 0 && offset >= payload.len() {
        tracing::debug!(offset, body_len = payload.len(), "Block2 beyond end of body");
        return reject_block(response);
    }

    let size = 1usize << (szx + 4);
    let end = (offset + size).min(payload.len());
    let more = end < payload.len();
    let block = match BlockValue::new((offset / size) as u32, more, szx) {
        Ok(block) => block,
        Err(_) => return reject_block(response),
    };

    block.write_to(&mut response.options, BLOCK2);
    if request.is_some_and(|r| r.options.contains(SIZE2)) {
        response.options.set_uint(SIZE2, payload.len() as u32);
    }
    response.payload = payload[offset..end].to_vec();

    tracing::trace!(num = block.num, more, size, offset, "serving Block2");
}

fn reject_block(response: &mut Message) {
    response.code = Code::BAD_OPTION;
    response.payload.clear();
    response.options.remove_all(BLOCK2);
}

// ======================================================================== //
// Block1
// ======================================================================== //

/// Result of feeding one request into a [`Block1Assembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block1Outcome {
    /// Full body available; the handler answers normally.
    Complete(Vec<u8>),
    /// Intermediate block stored; the response is already a 2.31 Continue.
    Continue,
    /// Transfer refused; the response carries 4.08 or 4.13.
    Rejected,
}

#[derive(Debug)]
struct PartialBody {
    body: Vec<u8>,
    szx: u8,
    last_activity_secs: u64,
}

/// Reassembles Block1 request bodies per `(remote, Uri-Path)`.
#[derive(Debug)]
pub struct Block1Assembler {
    transfers: HashMap<(SocketAddr, String), PartialBody>,
    max_body: usize,
}

impl Block1Assembler {
    pub fn new(max_body: usize) -> Self {
        Self {
            transfers: HashMap::new(),
            max_body,
        }
    }

    pub fn in_progress(&self) -> usize {
        self.transfers.len()
    }

    /// Feed one request. `response` is filled in for Continue and Rejected.
    pub fn handle(
        &mut self,
        remote: SocketAddr,
        request: &Message,
        response: &mut Message,
        now_secs: u64,
    ) -> Block1Outcome {
        let key = (remote, request.options.uri_path_string());
        let block = match BlockValue::from_options(&request.options, BLOCK1) {
            Ok(Some(block)) => block,
            Ok(None) => {
                self.transfers.remove(&key);
                return self.check_size(request.payload.clone(), response);
            }
            Err(e) => {
                tracing::debug!(error = %e, "malformed Block1 in request");
                self.transfers.remove(&key);
                response.code = Code::BAD_OPTION;
                return Block1Outcome::Rejected;
            }
        };

        if block.num == 0 {
            self.transfers.insert(
                key.clone(),
                PartialBody {
                    body: Vec::new(),
                    szx: block.szx,
                    last_activity_secs: now_secs,
                },
            );
        }

        let Some(partial) = self.transfers.get_mut(&key) else {
            response.code = Code::REQUEST_ENTITY_INCOMPLETE;
            return Block1Outcome::Rejected;
        };
        if block.offset() != partial.body.len() {
            tracing::debug!(
                num = block.num,
                expected_offset = partial.body.len(),
                "out-of-order Block1"
            );
            self.transfers.remove(&key);
            response.code = Code::REQUEST_ENTITY_INCOMPLETE;
            return Block1Outcome::Rejected;
        }

        partial.body.extend_from_slice(&request.payload);
        partial.szx = block.szx;
        partial.last_activity_secs = now_secs;
        if partial.body.len() > self.max_body {
            self.transfers.remove(&key);
            return self.too_large(response);
        }

        // echo the block, RFC 7959 §2.3
        block.write_to(&mut response.options, BLOCK1);

        if block.more {
            response.code = Code::CONTINUE;
            return Block1Outcome::Continue;
        }
        match self.transfers.remove(&key) {
            Some(done) => Block1Outcome::Complete(done.body),
            None => Block1Outcome::Rejected,
        }
    }

    /// Drop transfers idle for more than `max_idle_secs`.
    pub fn expire(&mut self, now_secs: u64, max_idle_secs: u64) -> usize {
        let before = self.transfers.len();
        self.transfers
            .retain(|_, p| !is_older_than(p.last_activity_secs, max_idle_secs, now_secs));
        before - self.transfers.len()
    }

    fn check_size(&self, body: Vec<u8>, response: &mut Message) -> Block1Outcome {
        if body.len() > self.max_body {
            return self.too_large(response);
        }
        Block1Outcome::Complete(body)
    }

    fn too_large(&self, response: &mut Message) -> Block1Outcome {
        response.code = Code::REQUEST_ENTITY_TOO_LARGE;
        response.options.set_uint(SIZE1, self.max_body as u32);
        Block1Outcome::Rejected
    }
}
