//! The seam between `PluginGraph` and actual DSP.
//!
//! LV2 hosting itself is out of scope. `PluginGraph` is
//! generic over a `PluginInstance` trait object created through a
//! `PluginFactory` supplied at `AudioHost::open` time. A small set of
//! built-in instances ships for dummy-driver tests; it is not a substitute
//! for real LV2 hosting.

use stompbox_types::PluginInfo;

/// One instantiated plugin's realtime-callable surface. Every method here
/// runs on the audio thread and must not allocate, log, or block.
pub trait PluginInstance: Send {
    /// Process `n_frames` of audio. `inputs`/`outputs` are one slice per
    /// port, each `n_frames` long.
    fn run(&mut self, n_frames: usize, inputs: &[&[f32]], outputs: &mut [&mut [f32]]);

    /// Write `value` to the control port at `index`. Out-of-range indices
    /// are ignored (the caller resolved the index against the catalog).
    fn set_control(&mut self, index: u32, value: f32);

    fn control_value(&self, index: u32) -> f32;

    /// Serialize this instance's opaque state blob, if it has one to
    /// offer beyond its control values.
    fn save_state(&self) -> Option<Vec<u8>> {
        None
    }

    fn load_state(&mut self, _bytes: &[u8]) {}

    /// Bridge for patch-property get/set. `property_urid`
    /// has already been resolved from the property's URI.
    fn patch_get(&self, _property_urid: u32) -> Option<Vec<u8>> {
        None
    }

    fn patch_set(&mut self, _property_urid: u32, _bytes: &[u8]) {}
}

/// Resolves a `plugin_uri` (already validated against the catalog) into a
/// boxed, ready-to-run instance.
pub trait PluginFactory: Send + Sync {
    fn instantiate(&self, plugin_uri: &str, info: &PluginInfo, sample_rate: u32) -> Option<Box<dyn PluginInstance>>;
}

/// Unity pass-through: copies input ports to output ports 1:1. Used for
/// `Empty` items and as a fallback built-in.
pub struct PassthroughInstance;

impl PluginInstance for PassthroughInstance {
    fn run(&mut self, n_frames: usize, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        for (out, inp) in outputs.iter_mut().zip(inputs.iter()) {
            let len = n_frames.min(out.len()).min(inp.len());
            out[..len].copy_from_slice(&inp[..len]);
        }
    }

    fn set_control(&mut self, _index: u32, _value: f32) {}
    fn control_value(&self, _index: u32) -> f32 {
        0.0
    }
}

/// Single-control linear gain, built in for dummy-driver tests.
pub struct GainInstance {
    gain: f32,
}

impl Default for GainInstance {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

impl PluginInstance for GainInstance {
    fn run(&mut self, n_frames: usize, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        for (out, inp) in outputs.iter_mut().zip(inputs.iter()) {
            let len = n_frames.min(out.len()).min(inp.len());
            for i in 0..len {
                out[i] = inp[i] * self.gain;
            }
        }
    }

    fn set_control(&mut self, index: u32, value: f32) {
        if index == 0 {
            self.gain = value;
        }
    }

    fn control_value(&self, index: u32) -> f32 {
        if index == 0 {
            self.gain
        } else {
            0.0
        }
    }
}

/// Always reports an `Lv2RealtimeError` on `run` via a poisoned flag the
/// driver checks; exists only to exercise the `PluginFault` error path
/// under the dummy
/// driver.
#[derive(Default)]
pub struct FaultingInstance {
    pub faulted: bool,
}

impl PluginInstance for FaultingInstance {
    fn run(&mut self, _n_frames: usize, _inputs: &[&[f32]], _outputs: &mut [&mut [f32]]) {
        self.faulted = true;
    }

    fn set_control(&mut self, _index: u32, _value: f32) {}
    fn control_value(&self, _index: u32) -> f32 {
        0.0
    }
}

/// A `PluginFactory` backed by the three built-ins above, keyed by URI.
/// Used by the dummy driver and by tests; not a substitute for real LV2
/// hosting.
#[derive(Default)]
pub struct BuiltinFactory;

pub const PASSTHROUGH_URI: &str = "urn:stompbox:passthrough";
pub const GAIN_URI: &str = "urn:stompbox:gain";
pub const TEST_FAULT_URI: &str = "urn:stompbox:test_fault";

impl PluginFactory for BuiltinFactory {
    fn instantiate(&self, plugin_uri: &str, _info: &PluginInfo, _sample_rate: u32) -> Option<Box<dyn PluginInstance>> {
        match plugin_uri {
            PASSTHROUGH_URI => Some(Box::new(PassthroughInstance)),
            GAIN_URI => Some(Box::new(GainInstance::default())),
            TEST_FAULT_URI => Some(Box::new(FaultingInstance::default())),
            _ => None,
        }
    }
}
