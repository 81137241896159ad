use crate::ids::InstanceId;

/// Absolute-peak accumulator for one plugin instance's VU subscription.
/// Captured post-process on the realtime thread (see `PluginGraph` in
/// `stompbox-audio`), flushed to the return ring on a fixed cadence, and
/// reset after each flush.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct VuAccumulator {
    pub instance_id_raw: u64,
    pub sample_time: u64,
    pub is_stereo_input: bool,
    pub is_stereo_output: bool,
    pub input_max_l: f32,
    pub input_max_r: f32,
    pub output_max_l: f32,
    pub output_max_r: f32,
}

impl VuAccumulator {
    pub fn new(instance_id: InstanceId, is_stereo_input: bool, is_stereo_output: bool) -> Self {
        Self {
            instance_id_raw: instance_id.get(),
            sample_time: 0,
            is_stereo_input,
            is_stereo_output,
            input_max_l: 0.0,
            input_max_r: 0.0,
            output_max_l: 0.0,
            output_max_r: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.input_max_l = 0.0;
        self.input_max_r = 0.0;
        self.output_max_l = 0.0;
        self.output_max_r = 0.0;
    }

    fn accumulate(peak: &mut f32, samples: &[f32]) {
        for &s in samples {
            let abs = s.abs();
            if abs > *peak {
                *peak = abs;
            }
        }
    }

    pub fn accumulate_input_mono(&mut self, samples: &[f32]) {
        Self::accumulate(&mut self.input_max_l, samples);
    }

    pub fn accumulate_input_stereo(&mut self, left: &[f32], right: &[f32]) {
        Self::accumulate(&mut self.input_max_l, left);
        Self::accumulate(&mut self.input_max_r, right);
    }

    pub fn accumulate_output_mono(&mut self, samples: &[f32]) {
        Self::accumulate(&mut self.output_max_l, samples);
    }

    pub fn accumulate_output_stereo(&mut self, left: &[f32], right: &[f32]) {
        Self::accumulate(&mut self.output_max_l, left);
        Self::accumulate(&mut self.output_max_r, right);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_tracks_absolute_peak() {
        let mut vu = VuAccumulator::default();
        vu.accumulate_input_mono(&[0.1, -0.8, 0.3]);
        assert_eq!(vu.input_max_l, 0.8);
    }

    #[test]
    fn reset_clears_peaks_not_identity() {
        let mut vu = VuAccumulator::new(InstanceId::new(1), true, true);
        vu.accumulate_input_stereo(&[0.5], &[-0.9]);
        vu.reset();
        assert_eq!(vu.input_max_l, 0.0);
        assert_eq!(vu.input_max_r, 0.0);
        assert_eq!(vu.instance_id_raw, 1);
    }
}
