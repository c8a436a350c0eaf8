//! Windows Jump List discovery
//!
//! Lists `.automaticDestinations-ms` and `.customDestinations-ms` files per
//! profile. The file name prefix is the AppID (a CRC64 of the application's
//! identity), which is resolved against a small table of well-known values.

use crate::fs::FilesystemView;
use crate::profiles::UserProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RECENT_DIR: &str = "AppData/Roaming/Microsoft/Windows/Recent";

const AUTOMATIC_SUFFIX: &str = ".automaticdestinations-ms";
const CUSTOM_SUFFIX: &str = ".customdestinations-ms";

/// AppIDs that are stable across installs
const KNOWN_APP_IDS: &[(&str, &str)] = &[
    ("1b4dd67f29cb1962", "Windows Explorer"),
    ("5f7b5f1e01b83767", "Windows Explorer Quick Access"),
    ("f01b4d95cf55d32a", "Windows Explorer 8.1"),
    ("7e4dca80246863e3", "Control Panel"),
    ("918e0ecb43d17e23", "Notepad"),
    ("9b9cdc69c1c24e2b", "Notepad (64-bit)"),
    ("12dc1ea8e34b5a6", "Microsoft Paint"),
    ("5d696d521de238c3", "Google Chrome"),
    ("6824f4a902c78fbd", "Mozilla Firefox"),
    ("a7bd71699cd38d1c", "Microsoft Word 2010"),
    ("9839aec31243a928", "Microsoft Excel 2010"),
    ("d00655d2aa12ff6d", "Microsoft PowerPoint 2010"),
    ("9fda41b86ddcf1db", "VLC Media Player"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpListType {
    Automatic,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpList {
    pub file_name: String,
    pub path: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub list_type: JumpListType,
    pub app_id: String,
    pub app_name: Option<String>,
    pub user_profile: String,
}

pub fn known_app_name(app_id: &str) -> Option<&'static str> {
    KNOWN_APP_IDS
        .iter()
        .find(|(id, _)| id.eq_ignore_ascii_case(app_id))
        .map(|(_, name)| *name)
}

/// Classify a file name and split off its AppID
pub fn classify(file_name: &str) -> Option<(JumpListType, String)> {
    let lowered = file_name.to_lowercase();
    let (list_type, suffix_len) = if lowered.ends_with(AUTOMATIC_SUFFIX) {
        (JumpListType::Automatic, AUTOMATIC_SUFFIX.len())
    } else if lowered.ends_with(CUSTOM_SUFFIX) {
        (JumpListType::Custom, CUSTOM_SUFFIX.len())
    } else {
        return None;
    };
    let app_id = file_name.get(..file_name.len() - suffix_len)?.to_string();
    Some((list_type, app_id))
}

pub fn find_jump_lists(view: &dyn FilesystemView, profile: &UserProfile) -> Vec<JumpList> {
    let mut lists = Vec::new();
    for folder in ["AutomaticDestinations", "CustomDestinations"] {
        let dir = profile.join(&format!("{}/{}", RECENT_DIR, folder));
        for entry in view.files(&dir) {
            let Some((list_type, app_id)) = classify(&entry.name) else {
                continue;
            };
            lists.push(JumpList {
                app_name: known_app_name(&app_id).map(str::to_string),
                file_name: entry.name,
                path: entry.path,
                size: entry.size,
                created: entry.created,
                modified: entry.modified,
                list_type,
                app_id,
                user_profile: profile.user_name.clone(),
            });
        }
    }
    log::debug!("{}: {} jump list(s)", profile.path, lists.len());
    lists
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::MemoryView;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("5f7b5f1e01b83767.automaticDestinations-ms"),
            Some((JumpListType::Automatic, "5f7b5f1e01b83767".to_string()))
        );
        assert_eq!(
            classify("9B9CDC69C1C24E2B.CUSTOMDESTINATIONS-MS").map(|(t, _)| t),
            Some(JumpListType::Custom)
        );
        assert_eq!(classify("desktop.ini"), None);
        assert_eq!(known_app_name("9B9CDC69C1C24E2B"), Some("Notepad (64-bit)"));
        assert_eq!(known_app_name("0000000000000000"), None);
    }

    #[test]
    fn test_find_per_profile() {
        let profile = UserProfile {
            path: "/Users/alice".to_string(),
            user_name: "alice".to_string(),
        };
        let recent = "/Users/alice/AppData/Roaming/Microsoft/Windows/Recent";
        let mut view = MemoryView::new();
        view.add_file(
            &format!("{}/AutomaticDestinations/1b4dd67f29cb1962.automaticDestinations-ms", recent),
            vec![0u8; 512],
        );
        view.add_file(
            &format!("{}/CustomDestinations/28c8b86deab549a1.customDestinations-ms", recent),
            vec![0u8; 64],
        );
        view.add_file(&format!("{}/notes.lnk", recent), vec![0u8; 76]);

        let lists = find_jump_lists(&view, &profile);
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].list_type, JumpListType::Automatic);
        assert_eq!(lists[0].app_name.as_deref(), Some("Windows Explorer"));
        assert_eq!(lists[0].size, 512);
        assert_eq!(lists[1].app_id, "28c8b86deab549a1");
        assert_eq!(lists[1].user_profile, "alice");
        assert_eq!(serde_json::to_value(&lists[1]).unwrap()["type"], "custom");
    }
}
