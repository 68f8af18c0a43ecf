//! Device selection.

use log::{debug, info};

use crate::backend::ComputeBackend;
use crate::config::DeviceClass;
use crate::error::{Result, VaddError};

/// Return the first device of `class`, walking platforms in enumeration
/// order and asking each for exactly one matching device.
pub fn select_device<B: ComputeBackend>(backend: &B, class: DeviceClass) -> Result<B::Device> {
    let platforms = backend
        .platforms()
        .map_err(VaddError::PlatformEnumeration)?;
    for platform in &platforms {
        let name = backend.platform_name(platform);
        match backend.device(platform, class) {
            Some(device) => {
                let device_info = backend.device_info(&device);
                info!(
                    "selected {} device `{}` on platform {name} ({})",
                    class,
                    device_info.name,
                    backend.name()
                );
                return Ok(device);
            }
            None => debug!("platform {name} has no {class} device"),
        }
    }
    Err(VaddError::NoDeviceFound {
        class,
        platforms: platforms.len(),
    })
}
