//! A minimal concrete ship format ("Plain"), named in spec.md §1 alongside
//! MTP/Mars as deliberately out-of-scope wire formats. The core trades in
//! opaque `Arrival`/`Departure` trait objects; this module exists only so
//! the Docker pipeline has something concrete to drive end-to-end in this
//! workspace's own tests (spec.md §8 scenarios S1/S2).
//!
//! Wire layout, one frame per datagram:
//! `[sn_len: u8][sn][total: u16 BE][index: u16 BE][payload_len: u32 BE][payload]`

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};

use startrek_core::{Arrival, ArrivalStatus, AssembleOutcome, Departure, Ship, ShipId, ShipParser, TransportError};

use super::ShipFactory;

fn encode_frame(sn: &ShipId, index: u16, total: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + sn.len() + 2 + 2 + 4 + payload.len());
    buf.put_u8(sn.len() as u8);
    buf.put_slice(sn);
    buf.put_u16(total);
    buf.put_u16(index);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

fn decode_frame(raw: &[u8]) -> Result<(ShipId, u16, u16, Bytes), TransportError> {
    let mut pos = 0usize;
    let short = || TransportError::protocol("truncated plain frame");

    let sn_len = *raw.get(pos).ok_or_else(short)? as usize;
    pos += 1;
    let sn = raw.get(pos..pos + sn_len).ok_or_else(short)?;
    pos += sn_len;

    let total = u16::from_be_bytes(raw.get(pos..pos + 2).ok_or_else(short)?.try_into().unwrap());
    pos += 2;
    let index = u16::from_be_bytes(raw.get(pos..pos + 2).ok_or_else(short)?.try_into().unwrap());
    pos += 2;
    let payload_len =
        u32::from_be_bytes(raw.get(pos..pos + 4).ok_or_else(short)?.try_into().unwrap()) as usize;
    pos += 4;
    let payload = raw.get(pos..pos + payload_len).ok_or_else(short)?;

    Ok((Bytes::copy_from_slice(sn), total, index, Bytes::copy_from_slice(payload)))
}

/// A Plain-format inbound message, possibly assembled from several frames
/// sharing one `sn`.
pub struct PlainArrival {
    sn: ShipId,
    total: u16,
    fragments: BTreeMap<u16, Bytes>,
    assembled: Option<Bytes>,
    last_time: Option<Instant>,
}

impl PlainArrival {
    pub fn single_fragment(sn: ShipId, index: u16, total: u16, payload: Bytes) -> Self {
        let mut fragments = BTreeMap::new();
        fragments.insert(index, payload);
        let assembled = if total == 1 {
            fragments.get(&0).cloned()
        } else {
            None
        };
        Self {
            sn,
            total,
            fragments,
            assembled,
            last_time: None,
        }
    }

    fn recompute_assembled(&mut self) {
        if self.fragments.len() as u16 >= self.total {
            let mut buf = BytesMut::new();
            for idx in 0..self.total {
                if let Some(piece) = self.fragments.get(&idx) {
                    buf.put_slice(piece);
                }
            }
            self.assembled = Some(buf.freeze());
        }
    }
}

impl Ship for PlainArrival {
    fn sn(&self) -> ShipId {
        self.sn.clone()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn last_time(&self) -> Option<Instant> {
        self.last_time
    }
}

impl Arrival for PlainArrival {
    fn is_complete(&self) -> bool {
        self.assembled.is_some()
    }

    fn assemble(self: Box<Self>, other: Box<dyn Arrival>, now: Instant) -> AssembleOutcome {
        let mut this = *self;
        if let Some(frag) = other.as_any().downcast_ref::<PlainArrival>() {
            for (idx, bytes) in &frag.fragments {
                this.fragments.entry(*idx).or_insert_with(|| bytes.clone());
            }
        }
        this.last_time = Some(now);
        this.recompute_assembled();

        if this.is_complete() {
            AssembleOutcome::Complete(Box::new(this))
        } else {
            AssembleOutcome::Pending(Box::new(this))
        }
    }

    fn payload(&self) -> Option<&[u8]> {
        self.assembled.as_deref()
    }
}

/// A Plain-format outbound message. Fragmentation beyond "one payload, one
/// frame" is left to the caller — `ShipFactory::wrap` always builds a
/// single-frame Departure; splitting large payloads into several fragments
/// is a concrete-format policy this minimal implementation does not need.
pub struct PlainDeparture {
    sn: ShipId,
    fragments: Vec<Bytes>,
    priority: i32,
    important: bool,
    tries_left: u32,
    last_time: Option<Instant>,
}

impl PlainDeparture {
    pub fn new(sn: ShipId, payload: Bytes, priority: i32, important: bool, max_tries: u32) -> Self {
        let frame = encode_frame(&sn, 0, 1, &payload);
        Self {
            sn,
            fragments: vec![frame],
            priority,
            important,
            tries_left: max_tries,
            last_time: None,
        }
    }
}

impl Ship for PlainDeparture {
    fn sn(&self) -> ShipId {
        self.sn.clone()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn last_time(&self) -> Option<Instant> {
        self.last_time
    }
}

impl Departure for PlainDeparture {
    fn fragments(&self) -> &[Bytes] {
        &self.fragments
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn important(&self) -> bool {
        self.important
    }

    fn tries_left(&self) -> u32 {
        self.tries_left
    }

    fn mark_sent(&mut self, now: Instant) {
        self.tries_left = self.tries_left.saturating_sub(1);
        self.last_time = Some(now);
    }

    fn advance(&mut self, sent_len: usize) {
        // An important Departure's fragment is only removed by `ack` — a
        // successful local write means the OS accepted the bytes, not that
        // the peer received them (spec.md §3: "each fragment removed on
        // acknowledgement"). A disposable Departure expects no such
        // acknowledgement, so one successful write retires it outright.
        if self.important {
            return;
        }
        if let Some(first) = self.fragments.first() {
            if sent_len >= first.len() {
                self.fragments.remove(0);
            }
        }
    }

    fn ack(&mut self, sn: &ShipId) -> bool {
        if sn == &self.sn {
            self.fragments.clear();
            true
        } else {
            false
        }
    }
}

/// Parses wire bytes into `PlainArrival`s. One `parse` call consumes exactly
/// one frame — see the module doc comment on framing.
pub struct PlainParser;

impl ShipParser for PlainParser {
    fn parse(&self, raw: &[u8]) -> Result<Box<dyn Arrival>, TransportError> {
        let (sn, total, index, payload) = decode_frame(raw)?;
        Ok(Box::new(PlainArrival::single_fragment(sn, index, total, payload)))
    }
}

/// Builds outbound Plain ships, assigning sequential SNs the way a real
/// protocol implementation assigns sender-side serial numbers.
pub struct PlainFactory {
    next_sn: AtomicU64,
    max_tries: u32,
}

impl PlainFactory {
    pub fn new(max_tries: u32) -> Self {
        Self {
            next_sn: AtomicU64::new(1),
            max_tries,
        }
    }

    fn allocate_sn(&self) -> ShipId {
        let n = self.next_sn.fetch_add(1, Ordering::SeqCst);
        Bytes::copy_from_slice(&n.to_be_bytes())
    }
}

impl ShipFactory for PlainFactory {
    fn wrap(&self, payload: Bytes, priority: i32, important: bool) -> Box<dyn Departure> {
        Box::new(PlainDeparture::new(
            self.allocate_sn(),
            payload,
            priority,
            important,
            self.max_tries,
        ))
    }

    fn heartbeat(&self) -> Box<dyn Departure> {
        Box::new(PlainDeparture::new(
            self.allocate_sn(),
            Bytes::from_static(b"PING"),
            -1,
            false,
            self.max_tries,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_frame() {
        let sn = Bytes::from_static(b"sn-1");
        let frame = encode_frame(&sn, 0, 1, b"hello");
        let (decoded_sn, total, index, payload) = decode_frame(&frame).unwrap();
        assert_eq!(decoded_sn, sn);
        assert_eq!(total, 1);
        assert_eq!(index, 0);
        assert_eq!(&payload[..], b"hello");
    }

    #[test]
    fn out_of_order_fragments_reassemble() {
        let sn = Bytes::from_static(b"sn-42");
        let a: Box<dyn Arrival> = Box::new(PlainArrival::single_fragment(sn.clone(), 2, 3, Bytes::from_static(b"c")));
        let b: Box<dyn Arrival> = Box::new(PlainArrival::single_fragment(sn.clone(), 0, 3, Bytes::from_static(b"a")));
        let c: Box<dyn Arrival> = Box::new(PlainArrival::single_fragment(sn.clone(), 1, 3, Bytes::from_static(b"b")));

        let now = Instant::now();
        let merged = match a.assemble(b, now) {
            AssembleOutcome::Pending(p) => p,
            AssembleOutcome::Complete(_) => panic!("should still be pending"),
        };
        let done = match merged.assemble(c, now) {
            AssembleOutcome::Complete(done) => done,
            AssembleOutcome::Pending(_) => panic!("should be complete"),
        };
        assert_eq!(done.payload().unwrap(), b"abc");
    }

    #[test]
    fn expired_status_uses_reassembly_window() {
        let sn = Bytes::from_static(b"sn-9");
        let mut arrival = PlainArrival::single_fragment(sn, 0, 2, Bytes::from_static(b"x"));
        arrival.last_time = Some(Instant::now());
        let now = arrival.last_time.unwrap() + std::time::Duration::from_secs(301);
        assert_eq!(
            arrival.status(now, std::time::Duration::from_secs(300)),
            ArrivalStatus::Expired
        );
    }
}
