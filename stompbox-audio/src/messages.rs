//! The forward (service -> realtime) and return (realtime -> service)
//! message classes carried over the [`crate::ring`].
//!
//! Fixed-size fields encode directly into the ring's byte payload. Payloads
//! too large to encode inline (a whole snapshot rebind, a whole graph, a
//! patch-property atom) are boxed by the producer and handed across as a
//! thin pointer; the consumer reconstructs the `Box` to take ownership.
//! Forward-ring pointer payloads that must be freed are never dropped on
//! the realtime thread — [`decode_and_apply_forward`] returns them as a
//! [`Reclaim`] for the driver to push back across the return ring.

use stompbox_types::InstanceId;

use crate::graph::PluginGraph;
use crate::ring::{PopError, PushError, RingConsumer, RingProducer};

/// Opaque handle to a VU/port-monitor/MIDI-learn subscription, unique across
/// the process.
pub type SubscriptionHandle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiRealtimeEventKind {
    Shutdown,
    Restart,
    HotspotToggle,
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramChangeDirection {
    Next,
    Previous,
}

/// One instance's worth of bulk-rebind data for
/// [`ForwardMessage::ApplySnapshot`]; control symbols are pre-resolved to
/// indices on the service thread so applying this is allocation-free.
pub struct SnapshotRebind {
    pub instance_id: InstanceId,
    pub enabled: bool,
    pub control_values: Vec<(u32, f32)>,
}

/// Messages the service thread pushes onto the forward ring; only the
/// audio thread ever pops these.
pub enum ForwardMessage {
    SetControl { instance_id: InstanceId, control_index: u32, value: f32 },
    SetBypass { instance_id: InstanceId, enabled: bool },
    SetInputVolumeDb(f32),
    SetOutputVolumeDb(f32),
    /// Publishes a pre-built graph. The realtime thread swaps it in at the
    /// next period boundary and hands the old one back via [`Reclaim::Graph`].
    ReplaceGraph(Box<PluginGraph>),
    /// Structure-preserving bulk rebind.
    ApplySnapshot(Box<Vec<SnapshotRebind>>),
    PatchGet { request_id: u64, instance_id: InstanceId, property_urid: u32, timeout_frames: u32 },
    PatchSet { request_id: u64, instance_id: InstanceId, property_urid: u32, atom_bytes: Box<Vec<u8>>, timeout_frames: u32 },
    AckMidiProgramRequest(u64),
    AckSnapshotRequest(u64),
    MonitorPort { instance_id: InstanceId, port_symbol_index: u32, handle: SubscriptionHandle, update_rate_hz: u32 },
    UnmonitorPort(SubscriptionHandle),
    AddVuSubscription { instance_id: InstanceId, handle: SubscriptionHandle },
    RemoveVuSubscription(SubscriptionHandle),
}

/// Messages the audio thread pushes onto the return ring; only the service
/// thread ever pops these.
pub enum ReturnMessage {
    VuUpdate(Vec<stompbox_types::VuAccumulator>),
    PortMonitorUpdate { handle: SubscriptionHandle, value: f32 },
    /// Empty `bytes` means the request timed out or the property is unset.
    PatchReply { request_id: u64, bytes: Vec<u8> },
    PatchSetNotify { instance_id: InstanceId, property_urid: u32, atom_bytes: Vec<u8> },
    MidiValueChanged { instance_id: InstanceId, port_index: u32, value: f32 },
    MidiListen(u8, u8, u8),
    MidiProgramChange(u64),
    NextMidiProgram(ProgramChangeDirection),
    MidiRealtimeEvent(MidiRealtimeEventKind),
    Lv2RealtimeError { instance_id: InstanceId, text_id: u32 },
    AlsaFatal,
}

impl ReturnMessage {
    /// VU and port-monitor updates are best-effort and may be dropped on a
    /// full ring; every other class must not be.
    pub fn is_droppable(&self) -> bool {
        matches!(self, ReturnMessage::VuUpdate(_) | ReturnMessage::PortMonitorUpdate { .. })
    }
}

/// Memory the realtime thread took ownership of via a forward-ring pointer
/// payload and must hand back for destruction off the realtime thread.
pub enum Reclaim {
    Graph(Box<PluginGraph>),
    SnapshotRebinds(Box<Vec<SnapshotRebind>>),
    PatchSetAtom(Box<Vec<u8>>),
}

/// What applying one forward message produced, beyond mutating `graph` in
/// place.
pub enum Applied {
    None,
    Reclaim(Reclaim),
    PatchReply { request_id: u64, bytes: Vec<u8> },
}

fn tag_of(msg: &ForwardMessage) -> u8 {
    match msg {
        ForwardMessage::SetControl { .. } => 0,
        ForwardMessage::SetBypass { .. } => 1,
        ForwardMessage::SetInputVolumeDb(_) => 2,
        ForwardMessage::SetOutputVolumeDb(_) => 3,
        ForwardMessage::ReplaceGraph(_) => 4,
        ForwardMessage::ApplySnapshot(_) => 5,
        ForwardMessage::PatchGet { .. } => 6,
        ForwardMessage::PatchSet { .. } => 7,
        ForwardMessage::AckMidiProgramRequest(_) => 8,
        ForwardMessage::AckSnapshotRequest(_) => 9,
        ForwardMessage::MonitorPort { .. } => 10,
        ForwardMessage::UnmonitorPort(_) => 11,
        ForwardMessage::AddVuSubscription { .. } => 12,
        ForwardMessage::RemoveVuSubscription(_) => 13,
    }
}

/// Encodes `msg` into `scratch` (cleared first, reused across calls to stay
/// allocation-light) and pushes it onto the forward ring.
pub fn push_forward(producer: &RingProducer, msg: ForwardMessage, scratch: &mut Vec<u8>) -> Result<(), PushError> {
    scratch.clear();
    let tag = tag_of(&msg);
    match msg {
        ForwardMessage::SetControl { instance_id, control_index, value } => {
            scratch.extend_from_slice(&instance_id.get().to_le_bytes());
            scratch.extend_from_slice(&control_index.to_le_bytes());
            scratch.extend_from_slice(&value.to_le_bytes());
        }
        ForwardMessage::SetBypass { instance_id, enabled } => {
            scratch.extend_from_slice(&instance_id.get().to_le_bytes());
            scratch.push(enabled as u8);
        }
        ForwardMessage::SetInputVolumeDb(db) | ForwardMessage::SetOutputVolumeDb(db) => {
            scratch.extend_from_slice(&db.to_le_bytes());
        }
        ForwardMessage::ReplaceGraph(graph) => {
            let ptr = Box::into_raw(graph) as usize as u64;
            scratch.extend_from_slice(&ptr.to_le_bytes());
        }
        ForwardMessage::ApplySnapshot(rebinds) => {
            let ptr = Box::into_raw(rebinds) as usize as u64;
            scratch.extend_from_slice(&ptr.to_le_bytes());
        }
        ForwardMessage::PatchGet { request_id, instance_id, property_urid, timeout_frames } => {
            scratch.extend_from_slice(&request_id.to_le_bytes());
            scratch.extend_from_slice(&instance_id.get().to_le_bytes());
            scratch.extend_from_slice(&property_urid.to_le_bytes());
            scratch.extend_from_slice(&timeout_frames.to_le_bytes());
        }
        ForwardMessage::PatchSet { request_id, instance_id, property_urid, atom_bytes, timeout_frames } => {
            let ptr = Box::into_raw(atom_bytes) as usize as u64;
            scratch.extend_from_slice(&request_id.to_le_bytes());
            scratch.extend_from_slice(&instance_id.get().to_le_bytes());
            scratch.extend_from_slice(&property_urid.to_le_bytes());
            scratch.extend_from_slice(&timeout_frames.to_le_bytes());
            scratch.extend_from_slice(&ptr.to_le_bytes());
        }
        ForwardMessage::AckMidiProgramRequest(id) | ForwardMessage::AckSnapshotRequest(id) => {
            scratch.extend_from_slice(&id.to_le_bytes());
        }
        ForwardMessage::MonitorPort { instance_id, port_symbol_index, handle, update_rate_hz } => {
            scratch.extend_from_slice(&instance_id.get().to_le_bytes());
            scratch.extend_from_slice(&port_symbol_index.to_le_bytes());
            scratch.extend_from_slice(&handle.to_le_bytes());
            scratch.extend_from_slice(&update_rate_hz.to_le_bytes());
        }
        ForwardMessage::UnmonitorPort(handle) => {
            scratch.extend_from_slice(&handle.to_le_bytes());
        }
        ForwardMessage::AddVuSubscription { instance_id, handle } => {
            scratch.extend_from_slice(&instance_id.get().to_le_bytes());
            scratch.extend_from_slice(&handle.to_le_bytes());
        }
        ForwardMessage::RemoveVuSubscription(handle) => {
            scratch.extend_from_slice(&handle.to_le_bytes());
        }
    }
    producer.push(tag, scratch)
}

fn u64_at(b: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(b[off..off + 8].try_into().unwrap())
}
fn u32_at(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(b[off..off + 4].try_into().unwrap())
}
fn f32_at(b: &[u8], off: usize) -> f32 {
    f32::from_le_bytes(b[off..off + 4].try_into().unwrap())
}

/// Decodes one forward message and applies it to `graph` (which may be
/// absent momentarily around startup). Allocation-free except where the
/// message itself hands ownership of an already-allocated block back to
/// the caller via [`Applied::Reclaim`].
///
/// # Safety
/// `body` must be the payload of a message produced by [`push_forward`];
/// pointer-bearing tags (4, 5, 7) reconstruct a `Box` from a raw pointer
/// that must not have been reconstructed already.
pub unsafe fn decode_and_apply_forward(tag: u8, body: &[u8], graph: &mut Option<Box<PluginGraph>>) -> Applied {
    match tag {
        0 => {
            let instance_id = InstanceId::new(u64_at(body, 0));
            let control_index = u32_at(body, 8);
            let value = f32_at(body, 12);
            if let Some(g) = graph {
                g.set_control(instance_id, control_index, value);
            }
            Applied::None
        }
        1 => {
            let instance_id = InstanceId::new(u64_at(body, 0));
            let enabled = body[8] != 0;
            if let Some(g) = graph {
                g.set_bypass(instance_id, enabled);
            }
            Applied::None
        }
        2 => {
            if let Some(g) = graph {
                g.set_input_volume_db(f32_at(body, 0));
            }
            Applied::None
        }
        3 => {
            if let Some(g) = graph {
                g.set_output_volume_db(f32_at(body, 0));
            }
            Applied::None
        }
        4 => {
            let ptr = u64_at(body, 0) as usize as *mut PluginGraph;
            let new_graph = Box::from_raw(ptr);
            match graph.replace(new_graph) {
                Some(old) => Applied::Reclaim(Reclaim::Graph(old)),
                None => Applied::None,
            }
        }
        5 => {
            let ptr = u64_at(body, 0) as usize as *mut Vec<SnapshotRebind>;
            let rebinds = Box::from_raw(ptr);
            if let Some(g) = graph {
                g.apply_snapshot_rebinds(&rebinds);
            }
            Applied::Reclaim(Reclaim::SnapshotRebinds(rebinds))
        }
        6 => {
            let request_id = u64_at(body, 0);
            let instance_id = InstanceId::new(u64_at(body, 8));
            let property_urid = u32_at(body, 16);
            let bytes = graph
                .as_ref()
                .and_then(|g| g.handle_patch_get(instance_id, property_urid))
                .unwrap_or_default();
            Applied::PatchReply { request_id, bytes }
        }
        7 => {
            let request_id = u64_at(body, 0);
            let instance_id = InstanceId::new(u64_at(body, 8));
            let property_urid = u32_at(body, 16);
            let ptr = u64_at(body, 24) as usize as *mut Vec<u8>;
            let atom = Box::from_raw(ptr);
            if let Some(g) = graph {
                g.handle_patch_set(instance_id, property_urid, &atom);
            }
            let _ = request_id;
            Applied::Reclaim(Reclaim::PatchSetAtom(atom))
        }
        10 => {
            let instance_id = InstanceId::new(u64_at(body, 0));
            let port_symbol_index = u32_at(body, 8);
            let handle = u64_at(body, 12);
            let update_rate_hz = u32_at(body, 20);
            if let Some(g) = graph {
                g.monitor_port(instance_id, port_symbol_index, handle, update_rate_hz);
            }
            Applied::None
        }
        11 => {
            let handle = u64_at(body, 0);
            if let Some(g) = graph {
                g.unmonitor_port(handle);
            }
            Applied::None
        }
        12 => {
            let instance_id = InstanceId::new(u64_at(body, 0));
            let handle = u64_at(body, 8);
            if let Some(g) = graph {
                g.add_vu_subscription(instance_id, handle);
            }
            Applied::None
        }
        13 => {
            let handle = u64_at(body, 0);
            if let Some(g) = graph {
                g.remove_vu_subscription(handle);
            }
            Applied::None
        }
        _ => Applied::None,
    }
}

/// Pops one forward message off `consumer` and applies it, returning
/// `Ok(Applied)` or `Err(PopError::Empty)` when the ring is drained.
/// `scratch` is reused across calls by the realtime drain loop.
pub fn drain_one_forward(consumer: &RingConsumer, scratch: &mut [u8], graph: &mut Option<Box<PluginGraph>>) -> Result<Applied, PopError> {
    let mut applied = Applied::None;
    let mut popped = false;
    consumer.pop_with(scratch, |tag, body| {
        // Safety: body was produced by `push_forward`'s encoding above.
        applied = unsafe { decode_and_apply_forward(tag, body, graph) };
        popped = true;
    })?;
    debug_assert!(popped);
    Ok(applied)
}

macro_rules! push_fixed {
    ($producer:expr, $tag:expr, $scratch:expr, $($bytes:expr),+ $(,)?) => {{
        $scratch.clear();
        $( $scratch.extend_from_slice(&$bytes); )+
        $producer.push($tag, $scratch)
    }};
}

/// Encodes and pushes a VU update. Best-effort: a full ring drops the
/// update, which the caller observes as `Err`.
pub fn push_vu_update(producer: &RingProducer, accumulators: &[stompbox_types::VuAccumulator], scratch: &mut Vec<u8>) -> Result<(), PushError> {
    scratch.clear();
    for vu in accumulators {
        scratch.extend_from_slice(&vu.instance_id_raw.to_le_bytes());
        scratch.extend_from_slice(&vu.sample_time.to_le_bytes());
        scratch.push(vu.is_stereo_input as u8);
        scratch.push(vu.is_stereo_output as u8);
        scratch.extend_from_slice(&vu.input_max_l.to_le_bytes());
        scratch.extend_from_slice(&vu.input_max_r.to_le_bytes());
        scratch.extend_from_slice(&vu.output_max_l.to_le_bytes());
        scratch.extend_from_slice(&vu.output_max_r.to_le_bytes());
    }
    producer.push(0, scratch)
}

pub fn push_port_monitor_update(producer: &RingProducer, handle: SubscriptionHandle, value: f32, scratch: &mut Vec<u8>) -> Result<(), PushError> {
    push_fixed!(producer, 1, scratch, handle.to_le_bytes(), value.to_le_bytes())
}

pub fn push_patch_reply(producer: &RingProducer, request_id: u64, bytes: &[u8], scratch: &mut Vec<u8>) -> Result<(), PushError> {
    scratch.clear();
    scratch.extend_from_slice(&request_id.to_le_bytes());
    scratch.extend_from_slice(bytes);
    producer.push(2, scratch)
}

pub fn push_alsa_fatal(producer: &RingProducer, scratch: &mut Vec<u8>) -> Result<(), PushError> {
    scratch.clear();
    producer.push(9, scratch)
}

pub fn push_lv2_realtime_error(producer: &RingProducer, instance_id: InstanceId, text_id: u32, scratch: &mut Vec<u8>) -> Result<(), PushError> {
    push_fixed!(producer, 8, scratch, instance_id.get().to_le_bytes(), text_id.to_le_bytes())
}

/// Pops and decodes one return message on the service thread (allocation is
/// fine here). Tag 10 is the driver's reclaim handoff (`send_reclaim` in
/// `stompbox-audio::driver`): it carries no message for the caller, only a
/// pointer to free, so it is handled transparently here and the loop moves
/// on to the next entry rather than surfacing it as a `ReturnMessage`.
pub fn pop_return(consumer: &RingConsumer) -> Result<ReturnMessage, PopError> {
    loop {
        let (tag, bytes) = consumer.pop_alloc()?;
        if tag == 10 {
            reclaim_from_bytes(&bytes);
            continue;
        }
        return Ok(decode_return(tag, bytes));
    }
}

/// Reconstructs and drops the `Box<Reclaim>` whose address was handed
/// across the ring by `driver::send_reclaim`, freeing it off the realtime
/// thread.
fn reclaim_from_bytes(bytes: &[u8]) {
    let ptr = u64_at(bytes, 0) as usize as *mut Reclaim;
    // Safety: `ptr` was produced by `Box::into_raw` in `driver::send_reclaim`
    // and is handed across the ring exactly once.
    let reclaim = unsafe { Box::from_raw(ptr) };
    drop(reclaim);
}

fn decode_return(tag: u8, bytes: Vec<u8>) -> ReturnMessage {
    match tag {
        0 => {
            let mut accumulators = Vec::new();
            let mut off = 0;
            const ENTRY_LEN: usize = 8 + 8 + 1 + 1 + 4 + 4 + 4 + 4;
            while off + ENTRY_LEN <= bytes.len() {
                accumulators.push(stompbox_types::VuAccumulator {
                    instance_id_raw: u64_at(&bytes, off),
                    sample_time: u64_at(&bytes, off + 8),
                    is_stereo_input: bytes[off + 16] != 0,
                    is_stereo_output: bytes[off + 17] != 0,
                    input_max_l: f32_at(&bytes, off + 18),
                    input_max_r: f32_at(&bytes, off + 22),
                    output_max_l: f32_at(&bytes, off + 26),
                    output_max_r: f32_at(&bytes, off + 30),
                });
                off += ENTRY_LEN;
            }
            ReturnMessage::VuUpdate(accumulators)
        }
        1 => ReturnMessage::PortMonitorUpdate { handle: u64_at(&bytes, 0), value: f32_at(&bytes, 8) },
        2 => ReturnMessage::PatchReply { request_id: u64_at(&bytes, 0), bytes: bytes[8..].to_vec() },
        3 => ReturnMessage::PatchSetNotify {
            instance_id: InstanceId::new(u64_at(&bytes, 0)),
            property_urid: u32_at(&bytes, 8),
            atom_bytes: bytes[12..].to_vec(),
        },
        4 => ReturnMessage::MidiValueChanged {
            instance_id: InstanceId::new(u64_at(&bytes, 0)),
            port_index: u32_at(&bytes, 8),
            value: f32_at(&bytes, 12),
        },
        5 => ReturnMessage::MidiListen(bytes[0], bytes[1], bytes[2]),
        6 => ReturnMessage::MidiProgramChange(u64_at(&bytes, 0)),
        7 => ReturnMessage::NextMidiProgram(if bytes[0] == 0 { ProgramChangeDirection::Next } else { ProgramChangeDirection::Previous }),
        8 => ReturnMessage::Lv2RealtimeError { instance_id: InstanceId::new(u64_at(&bytes, 0)), text_id: u32_at(&bytes, 8) },
        9 => ReturnMessage::AlsaFatal,
        _ => ReturnMessage::AlsaFatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PluginGraph;
    use crate::ring::ring;

    #[test]
    fn set_control_round_trips_through_forward_ring() {
        let (tx, rx) = ring(256);
        let mut scratch = Vec::new();
        push_forward(
            &tx,
            ForwardMessage::SetControl { instance_id: InstanceId::new(1), control_index: 0, value: 0.75 },
            &mut scratch,
        )
        .unwrap();

        let mut graph = Some(Box::new(PluginGraph::empty()));
        let mut pop_scratch = [0u8; 128];
        let applied = drain_one_forward(&rx, &mut pop_scratch, &mut graph).unwrap();
        assert!(matches!(applied, Applied::None));
    }

    #[test]
    fn replace_graph_reclaims_the_old_one() {
        let (tx, rx) = ring(256);
        let mut scratch = Vec::new();
        push_forward(&tx, ForwardMessage::ReplaceGraph(Box::new(PluginGraph::empty())), &mut scratch).unwrap();

        let mut graph = Some(Box::new(PluginGraph::empty()));
        let mut pop_scratch = [0u8; 128];
        let applied = drain_one_forward(&rx, &mut pop_scratch, &mut graph).unwrap();
        assert!(matches!(applied, Applied::Reclaim(Reclaim::Graph(_))));
        assert!(graph.is_some());
    }

    #[test]
    fn vu_update_round_trips_through_return_ring() {
        let (tx, rx) = ring(256);
        let mut scratch = Vec::new();
        let vus = vec![stompbox_types::VuAccumulator::new(InstanceId::new(1), true, true)];
        push_vu_update(&tx, &vus, &mut scratch).unwrap();
        match pop_return(&rx).unwrap() {
            ReturnMessage::VuUpdate(got) => assert_eq!(got.len(), 1),
            _ => panic!("expected VuUpdate"),
        }
    }
}
