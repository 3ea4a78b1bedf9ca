//! Vendor integrations keyed by vendor id.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AppError;
use crate::ports::VendorGateway;

#[derive(Clone)]
pub struct VendorRegistry {
    default_vendor_id: String,
    vendors: HashMap<String, Arc<dyn VendorGateway>>,
}

impl VendorRegistry {
    pub fn new(default_vendor_id: impl Into<String>) -> Self {
        Self {
            default_vendor_id: default_vendor_id.into(),
            vendors: HashMap::new(),
        }
    }

    pub fn with_vendor(mut self, vendor_id: impl Into<String>, vendor: Arc<dyn VendorGateway>) -> Self {
        self.vendors.insert(vendor_id.into(), vendor);
        self
    }

    pub fn default_vendor_id(&self) -> &str {
        &self.default_vendor_id
    }

    /// Resolve a vendor id, falling back to the default when none is given.
    pub fn resolve_id(&self, vendor_id: Option<&str>) -> Result<String, AppError> {
        let id = vendor_id
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.default_vendor_id);
        if self.vendors.contains_key(id) {
            Ok(id.to_string())
        } else {
            Err(AppError::InvalidRequest(format!("Unsupported vendor: {id}")))
        }
    }

    pub fn get(&self, vendor_id: &str) -> Result<Arc<dyn VendorGateway>, AppError> {
        self.vendors
            .get(vendor_id)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("vendor {vendor_id} is not registered")))
    }
}
