use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{BehavioralBaseline, DeviceProfile, GeoPoint};

/// Durable per-user/per-device history. The scoring core only ever talks
/// to this trait; persistence technology lives behind it.
///
/// Implementations must make each method an atomic read-modify-write on
/// the affected record so concurrent requests for the same user or device
/// cannot lose updates.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_device_profile(&self, device_id: &str) -> Result<Option<DeviceProfile>>;
    async fn upsert_device_profile(&self, profile: DeviceProfile) -> Result<()>;

    /// All devices previously associated with a user, ordered by first
    /// sighting (the first entry is the user's primary device).
    async fn get_user_devices(&self, user_key: &str) -> Result<Vec<DeviceProfile>>;

    async fn get_baseline(&self, user_key: &str) -> Result<Option<BehavioralBaseline>>;
    async fn upsert_baseline(&self, user_key: &str, baseline: BehavioralBaseline) -> Result<()>;

    async fn get_geo_history(&self, user_key: &str) -> Result<Vec<GeoPoint>>;

    /// Append one point, evicting the oldest entries beyond `max_len`.
    async fn append_geo_point(&self, user_key: &str, point: GeoPoint, max_len: usize)
        -> Result<()>;
}

/// Reference in-memory store used by tests and the CLI harness. Every
/// mutation holds the map's write lock for the whole read-modify-write,
/// which gives the per-entity atomicity the trait requires.
pub struct InMemoryProfileStore {
    devices: RwLock<HashMap<String, DeviceProfile>>,
    // user_key -> device ids in first-seen order
    user_devices: RwLock<HashMap<String, Vec<String>>>,
    baselines: RwLock<HashMap<String, BehavioralBaseline>>,
    geo_history: RwLock<HashMap<String, VecDeque<GeoPoint>>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        InMemoryProfileStore {
            devices: RwLock::new(HashMap::new()),
            user_devices: RwLock::new(HashMap::new()),
            baselines: RwLock::new(HashMap::new()),
            geo_history: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_device_profile(&self, device_id: &str) -> Result<Option<DeviceProfile>> {
        let devices = self.devices.read().await;
        Ok(devices.get(device_id).cloned())
    }

    async fn upsert_device_profile(&self, profile: DeviceProfile) -> Result<()> {
        if let Some(user_id) = &profile.user_id {
            let mut index = self.user_devices.write().await;
            let entries = index.entry(user_id.clone()).or_default();
            if !entries.contains(&profile.device_id) {
                entries.push(profile.device_id.clone());
            }
        }

        let mut devices = self.devices.write().await;
        devices.insert(profile.device_id.clone(), profile);
        Ok(())
    }

    async fn get_user_devices(&self, user_key: &str) -> Result<Vec<DeviceProfile>> {
        let index = self.user_devices.read().await;
        let ids = match index.get(user_key) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };
        drop(index);

        let devices = self.devices.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| devices.get(id).cloned())
            .collect())
    }

    async fn get_baseline(&self, user_key: &str) -> Result<Option<BehavioralBaseline>> {
        let baselines = self.baselines.read().await;
        Ok(baselines.get(user_key).cloned())
    }

    async fn upsert_baseline(&self, user_key: &str, baseline: BehavioralBaseline) -> Result<()> {
        let mut baselines = self.baselines.write().await;
        baselines.insert(user_key.to_string(), baseline);
        Ok(())
    }

    async fn get_geo_history(&self, user_key: &str) -> Result<Vec<GeoPoint>> {
        let history = self.geo_history.read().await;
        Ok(history
            .get(user_key)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn append_geo_point(
        &self,
        user_key: &str,
        point: GeoPoint,
        max_len: usize,
    ) -> Result<()> {
        let mut history = self.geo_history.write().await;
        let ring = history.entry(user_key.to_string()).or_default();
        ring.push_back(point);
        while ring.len() > max_len {
            ring.pop_front();
        }
        Ok(())
    }
}
