use crate::provision::{strip_version_suffix, ReadinessBoard};
use async_trait::async_trait;
use std::sync::Arc;
use taskmesh_core::{CapabilityAdvertisement, TaskmeshResult};
use tokio::sync::RwLock;
use tracing::info;

/// Discovery seam: where the dispatcher looks up providers.
#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    /// Providers advertising a capability matching `name_filter`.
    async fn find_capabilities(&self, name_filter: &str)
        -> TaskmeshResult<Vec<CapabilityAdvertisement>>;

    /// Every advertised capability, used to build the decomposition catalog.
    async fn get_all_capabilities(&self) -> TaskmeshResult<Vec<CapabilityAdvertisement>>;
}

/// In-process registry. Advertisement order is preserved, so the first
/// provider to advertise is the first candidate returned.
pub struct InMemoryCapabilityRegistry {
    adverts: RwLock<Vec<CapabilityAdvertisement>>,
    readiness: Option<Arc<ReadinessBoard>>,
}

impl InMemoryCapabilityRegistry {
    pub fn new() -> Self {
        Self {
            adverts: RwLock::new(Vec::new()),
            readiness: None,
        }
    }

    /// Announce advertising providers on `board`, so provisioned workers
    /// become ready as soon as they register.
    pub fn with_readiness(mut self, board: Arc<ReadinessBoard>) -> Self {
        self.readiness = Some(board);
        self
    }

    /// Add an advertisement. A repeat of the same (capability, provider) pair replaces it.
    pub async fn advertise(&self, advert: CapabilityAdvertisement) {
        let provider = advert.provider_id.clone();
        {
            let mut adverts = self.adverts.write().await;
            match adverts.iter_mut().find(|a| {
                a.capability_id == advert.capability_id && a.provider_id == advert.provider_id
            }) {
                Some(existing) => *existing = advert,
                None => {
                    info!(capability = %advert.capability_id, provider = %provider, "Registered capability");
                    adverts.push(advert);
                }
            }
        }
        if let Some(board) = &self.readiness {
            board.announce(&provider);
        }
    }

    /// Drop every advertisement from `provider_id`. Returns how many were removed.
    pub async fn withdraw_provider(&self, provider_id: &str) -> usize {
        let mut adverts = self.adverts.write().await;
        let before = adverts.len();
        adverts.retain(|a| a.provider_id != provider_id);
        before - adverts.len()
    }

    pub async fn capability_count(&self) -> usize {
        self.adverts.read().await.len()
    }
}

impl Default for InMemoryCapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// How well `advert` answers `filter`: 0 for an exact id or name, 1 for the
/// same capability under another version. A versioned filter only matches exactly.
fn match_rank(advert: &CapabilityAdvertisement, filter: &str) -> Option<u8> {
    if advert.capability_id == filter || advert.name == filter {
        return Some(0);
    }
    let base = strip_version_suffix(filter);
    if base != filter {
        return None;
    }
    (strip_version_suffix(&advert.capability_id) == base).then_some(1)
}

#[async_trait]
impl CapabilityRegistry for InMemoryCapabilityRegistry {
    async fn find_capabilities(
        &self,
        name_filter: &str,
    ) -> TaskmeshResult<Vec<CapabilityAdvertisement>> {
        let adverts = self.adverts.read().await;
        let mut ranked: Vec<(u8, &CapabilityAdvertisement)> = adverts
            .iter()
            .filter_map(|a| match_rank(a, name_filter).map(|rank| (rank, a)))
            .collect();
        // Stable: advertisement order is kept within a rank.
        ranked.sort_by_key(|(rank, _)| *rank);
        Ok(ranked.into_iter().map(|(_, a)| a.clone()).collect())
    }

    async fn get_all_capabilities(&self) -> TaskmeshResult<Vec<CapabilityAdvertisement>> {
        Ok(self.adverts.read().await.clone())
    }
}
