//! User profile discovery.

use crate::fs::FilesystemView;
use serde::{Deserialize, Serialize};

/// Parent directories holding per-user homes (XP, then Vista+)
pub const PROFILE_ROOTS: [&str; 2] = ["/Documents and Settings", "/Users"];

const EXCLUDED: [&str; 6] = [".", "..", "all users", "default", "default user", "public"];

/// One user's home directory on the volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Absolute volume path, e.g. `/Users/alice`
    pub path: String,
    pub user_name: String,
}

impl UserProfile {
    /// Path of a file or directory inside this profile
    pub fn join(&self, relative: &str) -> String {
        crate::text::join_path(&self.path, relative)
    }
}

/// List user home directories, skipping the shared and template profiles
pub fn discover_profiles(view: &dyn FilesystemView) -> Vec<UserProfile> {
    let mut profiles = Vec::new();
    for root in PROFILE_ROOTS {
        for entry in view.subdirectories(root) {
            let lowered = entry.name.to_lowercase();
            if EXCLUDED.contains(&lowered.as_str()) {
                continue;
            }
            log::debug!("Found user profile {}", entry.path);
            profiles.push(UserProfile {
                path: crate::text::join_path(root, &entry.name),
                user_name: entry.name,
            });
        }
    }
    log::info!("Discovered {} user profile(s)", profiles.len());
    profiles
}
