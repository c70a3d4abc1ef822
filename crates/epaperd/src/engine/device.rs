use serde::Serialize;

/// Device registry information attached to an entity.
///
/// A device represents a physical or logical device that contains one or more entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// `(domain, id)` pairs identifying the device
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    /// Parent device this one is reached through, as `(domain, id)`
    pub via_device: Option<(String, String)>,
}

impl DeviceInfo {
    pub fn new(identifier: (String, String), name: String) -> Self {
        Self {
            identifiers: vec![identifier],
            name,
            manufacturer: None,
            model: None,
            via_device: None,
        }
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_via_device(mut self, domain: impl Into<String>, id: impl Into<String>) -> Self {
        self.via_device = Some((domain.into(), id.into()));
        self
    }
}
