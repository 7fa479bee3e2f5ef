//! Fragmentation and reassembly.
//!
//! Transports may bound payload length, so an encoded message that does
//! not fit is split into pieces of the form
//! `<prefix><id>|<senderTag>|<receiverTag>,<index>,<total>,<payload>,`
//! with 1-based indices. Reassembly is keyed by (sender, id) and is
//! idempotent under duplicate delivery; a fragment disagreeing with an
//! existing context's total is rejected. Stale contexts are purged by the
//! periodic cleanup sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::RngCore;

use crate::error::ProtocolError;

/// Default fragment prefix; deployments may configure another.
pub const DEFAULT_FRAGMENT_PREFIX: &str = "?OTRP|";

// Worst-case header overhead: 8 hex id + two 8-hex tags + two pipes +
// four commas + two 5-digit counters.
const HEADER_OVERHEAD: usize = 8 + 1 + 8 + 1 + 8 + 4 + 5 + 5;

/// Split an encoded message into transport-sized fragments.
///
/// Returns the message unchanged when it fits within `max_len`, when
/// fragmentation is disabled (`max_len` 0), or when the limit is too
/// small to carry any payload at all.
pub fn potentially_fragment<R: RngCore + ?Sized>(
    message: &str,
    max_len: usize,
    sender_tag: u32,
    receiver_tag: u32,
    prefix: &str,
    rng: &mut R,
) -> Vec<String> {
    if max_len == 0 || message.len() <= max_len {
        return vec![message.to_string()];
    }
    let capacity = max_len.saturating_sub(prefix.len() + HEADER_OVERHEAD);
    if capacity == 0 {
        return vec![message.to_string()];
    }

    let total = message.len().div_ceil(capacity);
    let Ok(total) = u16::try_from(total) else {
        return vec![message.to_string()];
    };

    let id = rng.next_u32();
    let bytes = message.as_bytes();
    (0..total as usize)
        .map(|i| {
            let start = i * capacity;
            let end = usize::min(start + capacity, bytes.len());
            // The envelope alphabet is ASCII, so byte slicing is safe.
            let payload = std::str::from_utf8(&bytes[start..end]).unwrap_or_default();
            format!(
                "{prefix}{id:08X}|{sender_tag:08X}|{receiver_tag:08X},{index},{total},{payload},",
                index = i + 1,
            )
        })
        .collect()
}

#[derive(Debug)]
struct Context {
    total: u16,
    pieces: Vec<Option<String>>,
    received: usize,
    last_touch: Instant,
}

/// Per-sender reassembly of incoming fragments.
#[derive(Debug)]
pub struct Assembler {
    prefix: String,
    contexts: Mutex<HashMap<(String, String), Context>>,
}

impl Assembler {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a transport message is a fragment under our prefix.
    pub fn is_fragment(&self, message: &str) -> bool {
        message.starts_with(&self.prefix)
    }

    /// Feed one fragment in. Returns the reassembled message once all
    /// pieces have arrived, `None` while pieces are outstanding.
    pub fn new_fragment_received(
        &self,
        sender: &str,
        fragment: &str,
    ) -> Result<Option<String>, ProtocolError> {
        let parsed = parse_fragment(&self.prefix, fragment)?;

        let key = (sender.to_string(), parsed.id);
        let mut contexts = self.contexts.lock();
        let context = contexts.entry(key.clone()).or_insert_with(|| Context {
            total: parsed.total,
            pieces: vec![None; parsed.total as usize],
            received: 0,
            last_touch: Instant::now(),
        });

        if context.total != parsed.total {
            return Err(ProtocolError::FragmentTotalMismatch);
        }
        context.last_touch = Instant::now();

        let slot = &mut context.pieces[(parsed.index - 1) as usize];
        if slot.is_none() {
            *slot = Some(parsed.payload);
            context.received += 1;
        }

        if context.received == context.total as usize {
            let context = contexts.remove(&key).expect("context present");
            let message = context
                .pieces
                .into_iter()
                .map(|piece| piece.unwrap_or_default())
                .collect::<String>();
            return Ok(Some(message));
        }
        Ok(None)
    }

    /// Drop contexts idle longer than `timeout`.
    pub fn cleanup(&self, timeout: Duration) {
        let mut contexts = self.contexts.lock();
        let before = contexts.len();
        contexts.retain(|_, context| context.last_touch.elapsed() < timeout);
        let dropped = before - contexts.len();
        if dropped > 0 {
            tracing::debug!(dropped, "purged stale fragment contexts");
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.contexts.lock().len()
    }
}

struct ParsedFragment {
    id: String,
    index: u16,
    total: u16,
    payload: String,
}

fn parse_fragment(prefix: &str, fragment: &str) -> Result<ParsedFragment, ProtocolError> {
    let rest = fragment
        .strip_prefix(prefix)
        .ok_or(ProtocolError::MalformedFragment("missing prefix"))?;
    let rest = rest
        .strip_suffix(',')
        .ok_or(ProtocolError::MalformedFragment("missing trailing comma"))?;

    let (head, rest) = rest
        .split_once(',')
        .ok_or(ProtocolError::MalformedFragment("missing index"))?;
    let mut head_parts = head.split('|');
    let id = head_parts
        .next()
        .ok_or(ProtocolError::MalformedFragment("missing id"))?;
    let sender_tag = head_parts
        .next()
        .ok_or(ProtocolError::MalformedFragment("missing sender tag"))?;
    let receiver_tag = head_parts
        .next()
        .ok_or(ProtocolError::MalformedFragment("missing receiver tag"))?;
    if head_parts.next().is_some() {
        return Err(ProtocolError::MalformedFragment("too many header parts"));
    }
    if id.is_empty() || u32::from_str_radix(id, 16).is_err() {
        return Err(ProtocolError::MalformedFragment("non-hex id"));
    }
    u32::from_str_radix(sender_tag, 16)
        .map_err(|_| ProtocolError::MalformedFragment("non-hex sender tag"))?;
    u32::from_str_radix(receiver_tag, 16)
        .map_err(|_| ProtocolError::MalformedFragment("non-hex receiver tag"))?;

    let (index_str, rest) = rest
        .split_once(',')
        .ok_or(ProtocolError::MalformedFragment("missing total"))?;
    let (total_str, payload) = rest
        .split_once(',')
        .ok_or(ProtocolError::MalformedFragment("missing payload"))?;

    let index: u16 = index_str
        .parse()
        .map_err(|_| ProtocolError::MalformedFragment("non-numeric index"))?;
    let total: u16 = total_str
        .parse()
        .map_err(|_| ProtocolError::MalformedFragment("non-numeric total"))?;
    if index == 0 || total == 0 || index > total {
        return Err(ProtocolError::FragmentOutOfRange);
    }

    Ok(ParsedFragment {
        id: id.to_string(),
        index,
        total,
        payload: payload.to_string(),
    })
}
