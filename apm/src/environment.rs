// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

/// Canonical program name
pub const NAME: &str = "apm";
/// Version, sourced from the build
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Mirror replace batch size
pub const DB_BATCH_SIZE: usize = 1000;

/// Bus name shared by the D-Bus object and its signal
pub const BUS_NAME: &str = "org.altlinux.APM";
/// Object path of the exported D-Bus object
pub const BUS_PATH: &str = "/org/altlinux/APM";
/// Polkit action guarding mutating operations
pub const POLKIT_ACTION: &str = "org.altlinux.APM.manage";

/// Image tag used for locally built host images
pub const LOCAL_IMAGE_TAG: &str = "os";
/// Transport prefix of the local container store
pub const CONTAINERS_STORAGE: &str = "containers-storage";
