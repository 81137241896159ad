/// Stable, nonzero integer identifying one node within one pedalboard.
///
/// Instance ids are assigned by the pedalboard that owns the item and
/// never reused within that pedalboard's lifetime (mirrors the
/// `nextInstanceId` counters in banks and pedalboards).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn new(id: u64) -> Self {
        assert!(id != 0, "InstanceId cannot be zero");
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
