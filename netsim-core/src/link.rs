//! Link layer: frame segmentation with CRC-guarded reassembly, a per-link
//! output queue with transmission-delay-accurate pacing, and a sliding-window
//! load measurement.

use std::collections::VecDeque;

use netsim_wire::constants::FRAME_HEADER_LEN;
use netsim_wire::{Frame, FrameHeader};
use tracing::debug;

use crate::sim::{AppTarget, LinkIndex, PhysicalStatus, Simulator, TimerId, TimerKind};

const HIGH_WATER_FRAMES: usize = 20;
const LOW_WATER_FRAMES: usize = 10;
const HARD_DROP_FRAMES: usize = 10_000;
const LOAD_WINDOW_USEC: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkStatus {
    Idle,
    Busy,
}

struct LinkState {
    status: LinkStatus,
    output: VecDeque<Vec<u8>>,
    pacing_timer: Option<TimerId>,
    /// Whether the write that armed the currently-firing pacing timer
    /// actually went out (`Sent`) versus was refused (`Busy`/`NotReady`) and
    /// is only waiting on a retry. Distinguishes the two cases for
    /// `on_pacing_timer`, which must dequeue the head frame in the former
    /// case and leave it queued for a resend attempt in the latter.
    last_attempt_sent: bool,
    next_datagram_id: u8,
    mtu: usize,
    max_payload_size: usize,
    bandwidth: u32,

    assembling_id: Option<u8>,
    expected_ordering: u8,
    corrupt: bool,
    partial: Vec<u8>,

    busy_time_usec: u64,
    last_status_change_usec: u64,
    load_window: VecDeque<(u64, usize)>,
    bits_in_window: u64,
}

impl LinkState {
    fn new(bandwidth: u32, mtu: usize) -> Self {
        LinkState {
            status: LinkStatus::Idle,
            output: VecDeque::new(),
            pacing_timer: None,
            last_attempt_sent: false,
            next_datagram_id: 0,
            mtu,
            max_payload_size: mtu.saturating_sub(FRAME_HEADER_LEN),
            bandwidth,
            assembling_id: None,
            expected_ordering: 0,
            corrupt: false,
            partial: Vec::new(),
            busy_time_usec: 0,
            last_status_change_usec: 0,
            load_window: VecDeque::new(),
            bits_in_window: 0,
        }
    }
}

/// Owns per-link state for indices `1..=num_links`.
pub struct LinkLayer {
    links: Vec<LinkState>,
}

impl LinkLayer {
    /// `link_init()`: allocates per-link state for indices `1..=num_links`.
    pub fn new(num_links: usize, bandwidth_and_mtu: impl Fn(LinkIndex) -> (u32, usize)) -> Self {
        let links = (1..=num_links)
            .map(|link| {
                let (bw, mtu) = bandwidth_and_mtu(link);
                LinkState::new(bw, mtu)
            })
            .collect();
        LinkLayer { links }
    }

    fn state(&mut self, link: LinkIndex) -> &mut LinkState {
        &mut self.links[link - 1]
    }

    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    pub fn bandwidth(&self, link: LinkIndex) -> u32 {
        self.links[link - 1].bandwidth
    }

    /// `link_get_mtu(link)`.
    pub fn mtu(&self, link: LinkIndex) -> usize {
        self.links[link - 1].mtu
    }

    pub fn queue_size(&self, link: LinkIndex) -> usize {
        self.links[link - 1].output.len()
    }

    /// `link_transmit(link, bytes, size)`: fragments and enqueues. Returns
    /// `false` if the call was silently dropped for queue overflow.
    pub fn transmit(&mut self, sim: &mut dyn Simulator, link: LinkIndex, bytes: &[u8]) -> bool {
        let state = self.state(link);
        if state.output.len() > HARD_DROP_FRAMES {
            debug!(link, queue_len = state.output.len(), "link_transmit dropped: queue overflow");
            return false;
        }

        let id = state.next_datagram_id;
        state.next_datagram_id = (state.next_datagram_id + 1) % 128;
        let max_payload = state.max_payload_size.max(1);
        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            vec![&[]]
        } else {
            bytes.chunks(max_payload).collect()
        };
        let last_idx = chunks.len() - 1;

        for (ordering, chunk) in chunks.into_iter().enumerate() {
            let frame = Frame {
                header: FrameHeader {
                    id,
                    is_last: ordering == last_idx,
                    ordering: ordering as u8,
                },
                payload: bytes::Bytes::copy_from_slice(chunk),
            };
            let encoded = frame.encode(|b| sim.crc16(b));
            self.state(link).output.push_back(encoded.to_vec());
        }

        self.update_water_marks(sim, link);
        self.ensure_transmitting(sim, link);
        true
    }

    fn update_water_marks(&mut self, sim: &mut dyn Simulator, link: LinkIndex) {
        let len = self.state(link).output.len();
        if len >= HIGH_WATER_FRAMES {
            sim.disable_application(AppTarget::All);
        } else if len <= LOW_WATER_FRAMES {
            sim.enable_application(AppTarget::All);
        }
    }

    /// Attempts to write the head-of-queue frame if the link is idle.
    fn ensure_transmitting(&mut self, sim: &mut dyn Simulator, link: LinkIndex) {
        let state = self.state(link);
        if state.status == LinkStatus::Busy || state.output.is_empty() {
            return;
        }
        self.try_send_head(sim, link);
    }

    fn try_send_head(&mut self, sim: &mut dyn Simulator, link: LinkIndex) {
        let now = sim.now_usec();
        let head_len = match self.state(link).output.front() {
            Some(frame) => frame.len(),
            None => return,
        };
        let status = {
            let state = self.state(link);
            let frame = state.output.front().unwrap();
            sim.write_physical(link, frame)
        };
        match status {
            PhysicalStatus::Sent => {
                let state = self.state(link);
                state.last_attempt_sent = true;
                if state.status == LinkStatus::Idle {
                    state.status = LinkStatus::Busy;
                    state.last_status_change_usec = now;
                }
                let frame_bits = head_len as u64 * 8;
                let delay_usec = (frame_bits * 1_000_000 / state.bandwidth.max(1) as u64) + 1;
                state.pacing_timer =
                    Some(sim.start_timer(TimerKind::LinkPacing, delay_usec, link as u64));
                self.record_load(link, now, frame_bits);
            }
            PhysicalStatus::Busy | PhysicalStatus::NotReady => {
                let state = self.state(link);
                state.last_attempt_sent = false;
                state.pacing_timer = Some(sim.start_timer(TimerKind::LinkPacing, 1, link as u64));
            }
        }
    }

    fn record_load(&mut self, link: LinkIndex, now: u64, bits: u64) {
        let state = self.state(link);
        state.load_window.push_back((now, bits as usize));
        state.bits_in_window += bits;
        while let Some(&(t, b)) = state.load_window.front() {
            if now.saturating_sub(t) > LOAD_WINDOW_USEC {
                state.load_window.pop_front();
                state.bits_in_window -= b as u64;
            } else {
                break;
            }
        }
    }

    /// Pacing-timer fire. If the attempt that armed this timer actually sent
    /// the head frame, dequeue and free it, then attempt the next
    /// head-of-queue frame. If it was a busy/not-ready retry, the head frame
    /// was never sent — retry it rather than dropping it.
    pub fn on_pacing_timer(&mut self, sim: &mut dyn Simulator, link: LinkIndex) {
        if !self.state(link).last_attempt_sent {
            self.try_send_head(sim, link);
            return;
        }

        let now = sim.now_usec();
        let state = self.state(link);
        state.pacing_timer = None;
        if !state.output.is_empty() {
            state.output.pop_front();
        }
        if state.output.is_empty() {
            state.busy_time_usec += now.saturating_sub(state.last_status_change_usec);
            state.status = LinkStatus::Idle;
            state.last_status_change_usec = now;
        }
        self.update_water_marks(sim, link);
        self.ensure_transmitting(sim, link);
    }

    /// `link_receive(link, bytes, size)`: validates CRC and reassembles.
    /// Returns the assembled datagram bytes once the last fragment of a
    /// non-corrupt datagram arrives.
    pub fn receive(&mut self, sim: &mut dyn Simulator, link: LinkIndex, bytes: &[u8]) -> Option<Vec<u8>> {
        let frame = match Frame::decode(bytes, |b| sim.crc16(b)) {
            Ok(frame) => frame,
            Err(_) => {
                self.state(link).corrupt = true;
                return None;
            }
        };
        let state = self.state(link);

        if frame.header.ordering == 0 {
            state.assembling_id = Some(frame.header.id);
            state.expected_ordering = 0;
            state.corrupt = false;
            state.partial.clear();
        }

        let matches_current =
            state.assembling_id == Some(frame.header.id) && frame.header.ordering == state.expected_ordering;
        if !matches_current {
            state.corrupt = true;
            return None;
        }

        if state.corrupt {
            return None;
        }

        state.partial.extend_from_slice(&frame.payload);
        state.expected_ordering = state.expected_ordering.wrapping_add(1);

        if frame.header.is_last {
            let assembled = std::mem::take(&mut state.partial);
            state.assembling_id = None;
            state.expected_ordering = 0;
            Some(assembled)
        } else {
            None
        }
    }

    /// Fraction of elapsed run time the link has spent `Busy`, for the
    /// offline `utilization` log line. Not itself driven by a timer; callers
    /// sample it whenever they want to emit the log line.
    pub fn utilization(&self, link: LinkIndex, now: u64) -> f64 {
        let state = &self.links[link - 1];
        let busy = if state.status == LinkStatus::Busy {
            state.busy_time_usec + now.saturating_sub(state.last_status_change_usec)
        } else {
            state.busy_time_usec
        };
        if now == 0 {
            0.0
        } else {
            busy as f64 / now as f64
        }
    }

    /// `link_get_load(link)`: bits transmitted within the last 10s window,
    /// divided by (elapsed window time * bandwidth).
    pub fn load(&self, link: LinkIndex, now: u64) -> f64 {
        let state = &self.links[link - 1];
        let window_start = state
            .load_window
            .front()
            .map(|&(t, _)| t)
            .unwrap_or(now);
        let elapsed = now.saturating_sub(window_start).max(1) as f64;
        let denom = elapsed * state.bandwidth.max(1) as f64 / 1_000_000.0;
        if denom == 0.0 {
            0.0
        } else {
            state.bits_in_window as f64 / denom
        }
    }
}
