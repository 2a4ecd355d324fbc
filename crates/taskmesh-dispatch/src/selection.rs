use taskmesh_core::CapabilityAdvertisement;

/// Chooses which provider receives a request among the registry's candidates.
pub trait ProviderSelector: Send + Sync {
    fn select<'a>(
        &self,
        capability: &str,
        candidates: &'a [CapabilityAdvertisement],
    ) -> Option<&'a CapabilityAdvertisement>;
}

/// Takes the first candidate the registry returned. No ranking, no balancing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

impl ProviderSelector for FirstMatch {
    fn select<'a>(
        &self,
        _capability: &str,
        candidates: &'a [CapabilityAdvertisement],
    ) -> Option<&'a CapabilityAdvertisement> {
        candidates.first()
    }
}
