//! Registry of the three realtime-sourced subscription kinds a session may
//! hold plus handle allocation. One process-wide `u64` handle space is
//! shared across all three kinds, matching `stompbox_audio::messages::SubscriptionHandle`.

use std::collections::HashMap;

use stompbox_types::InstanceId;

use super::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Vu,
    PortMonitor,
    PatchProperty,
}

struct VuEntry {
    client_id: ClientId,
    instance_id: InstanceId,
}

struct PortMonitorEntry {
    client_id: ClientId,
    instance_id: InstanceId,
    port_symbol_index: u32,
}

struct PatchPropertyEntry {
    client_id: ClientId,
    instance_id: InstanceId,
    uri: String,
}

/// Owned by `Model`, behind the same recursive mutex as everything else.
/// Holds no channels or callbacks of its own — `Model` resolves a handle
/// back to a `(ClientId, ...)` tuple when a return-ring message arrives.
#[derive(Default)]
pub struct Subscriptions {
    next_handle: u64,
    vu: HashMap<u64, VuEntry>,
    port_monitor: HashMap<u64, PortMonitorEntry>,
    patch_property: HashMap<u64, PatchPropertyEntry>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn add_vu(&mut self, client_id: ClientId, instance_id: InstanceId) -> u64 {
        let handle = self.alloc_handle();
        self.vu.insert(handle, VuEntry { client_id, instance_id });
        handle
    }

    pub fn remove_vu(&mut self, handle: u64) -> Option<ClientId> {
        self.vu.remove(&handle).map(|e| e.client_id)
    }

    /// Every handle subscribed to `instance_id`'s VU stream, for fanning out
    /// one `VuAccumulator` to each interested session.
    pub fn vu_subscribers_for(&self, instance_id: InstanceId) -> Vec<ClientId> {
        self.vu.values().filter(|e| e.instance_id == instance_id).map(|e| e.client_id).collect()
    }

    pub fn add_port_monitor(&mut self, client_id: ClientId, instance_id: InstanceId, port_symbol_index: u32) -> u64 {
        let handle = self.alloc_handle();
        self.port_monitor.insert(handle, PortMonitorEntry { client_id, instance_id, port_symbol_index });
        handle
    }

    pub fn remove_port_monitor(&mut self, handle: u64) -> Option<ClientId> {
        self.port_monitor.remove(&handle).map(|e| e.client_id)
    }

    pub fn port_monitor_client(&self, handle: u64) -> Option<ClientId> {
        self.port_monitor.get(&handle).map(|e| e.client_id)
    }

    pub fn add_patch_property(&mut self, client_id: ClientId, instance_id: InstanceId, uri: String) -> u64 {
        let handle = self.alloc_handle();
        self.patch_property.insert(handle, PatchPropertyEntry { client_id, instance_id, uri });
        handle
    }

    pub fn remove_patch_property(&mut self, handle: u64) -> Option<ClientId> {
        self.patch_property.remove(&handle).map(|e| e.client_id)
    }

    pub fn patch_property_subscribers_for(&self, instance_id: InstanceId, uri: &str) -> Vec<ClientId> {
        self.patch_property
            .values()
            .filter(|e| e.instance_id == instance_id && e.uri == uri)
            .map(|e| e.client_id)
            .collect()
    }

    /// Every handle this client owns across all three kinds, as
    /// `(kind, handle)`. Used on session disconnect to cancel realtime
    /// subscriptions and drop bookkeeping.
    pub fn drain_client(&mut self, client_id: ClientId) -> Vec<(SubscriptionKind, u64)> {
        let mut out = Vec::new();
        self.vu.retain(|handle, e| {
            if e.client_id == client_id {
                out.push((SubscriptionKind::Vu, *handle));
                false
            } else {
                true
            }
        });
        self.port_monitor.retain(|handle, e| {
            if e.client_id == client_id {
                out.push((SubscriptionKind::PortMonitor, *handle));
                false
            } else {
                true
            }
        });
        self.patch_property.retain(|handle, e| {
            if e.client_id == client_id {
                out.push((SubscriptionKind::PatchProperty, *handle));
                false
            } else {
                true
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_across_kinds() {
        let mut subs = Subscriptions::new();
        let a = subs.add_vu(1, InstanceId::new(1));
        let b = subs.add_port_monitor(1, InstanceId::new(1), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn drain_client_removes_every_kind_it_owns() {
        let mut subs = Subscriptions::new();
        subs.add_vu(1, InstanceId::new(1));
        subs.add_port_monitor(1, InstanceId::new(1), 0);
        subs.add_patch_property(2, InstanceId::new(1), "urn:p".into());

        let drained = subs.drain_client(1);
        assert_eq!(drained.len(), 2);
        assert!(subs.vu_subscribers_for(InstanceId::new(1)).is_empty());
        assert_eq!(subs.patch_property_subscribers_for(InstanceId::new(1), "urn:p"), vec![2]);
    }
}
