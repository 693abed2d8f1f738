use async_trait::async_trait;
use companion_core::error::LiveError;
use companion_core::remote::Geolocator;
use gemini_live_types::generate::LatLng;

/// A position configured up front. Desktop hosts have no location service to ask.
pub struct FixedLocation {
    position: LatLng,
}

impl FixedLocation {
    pub fn new(position: LatLng) -> Self {
        Self { position }
    }
}

#[async_trait]
impl Geolocator for FixedLocation {
    async fn locate(&self) -> Result<LatLng, LiveError> {
        Ok(self.position)
    }
}
