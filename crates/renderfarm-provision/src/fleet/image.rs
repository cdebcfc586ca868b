//! Machine image selection by OS family

use std::collections::BTreeMap;

use renderfarm_common::{FleetDefinition, OsFamily};

/// Region-keyed image mapping for one OS family
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MachineImage {
    /// Generic Linux image per region
    GenericLinux(BTreeMap<String, String>),
    /// Generic Windows image per region
    GenericWindows(BTreeMap<String, String>),
}

impl MachineImage {
    /// Pick the resolver matching the fleet's OS family
    pub fn for_fleet(definition: &FleetDefinition) -> Self {
        match definition.os_family {
            OsFamily::Linux => MachineImage::GenericLinux(definition.worker_images.clone()),
            OsFamily::Windows => MachineImage::GenericWindows(definition.worker_images.clone()),
        }
    }

    /// OS family the image runs
    pub fn os_family(&self) -> OsFamily {
        match self {
            MachineImage::GenericLinux(_) => OsFamily::Linux,
            MachineImage::GenericWindows(_) => OsFamily::Windows,
        }
    }

    /// Image id for `region`, if mapped
    pub fn resolve(&self, region: &str) -> Option<&str> {
        let images = match self {
            MachineImage::GenericLinux(images) | MachineImage::GenericWindows(images) => images,
        };
        images
            .get(region)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}
