//! Prefetch, shell link and jump list collection.

use crate::fs::FilesystemView;
use crate::jumplist::{find_jump_lists, JumpList};
use crate::lnk_parser::ShellLink;
use crate::prefetch::{parse_prefetch, PrefetchFile};
use crate::profiles::UserProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CATEGORY: &str = "filesystem";
pub const PREFETCH_DIR: &str = "/Windows/Prefetch";
pub const DEFAULT_LNK_DEPTH: usize = 6;

/// A `.lnk` file and where it was found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkFileRecord {
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub file_created: Option<DateTime<Utc>>,
    pub file_modified: Option<DateTime<Utc>>,
    pub user_profile: String,
    #[serde(flatten)]
    pub link: ShellLink,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilesystemSummary {
    pub total_prefetch: usize,
    pub total_links: usize,
    pub total_jump_lists: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilesystemArtifacts {
    pub prefetch_files: Vec<PrefetchFile>,
    pub link_files: Vec<LinkFileRecord>,
    pub jump_lists: Vec<JumpList>,
    pub summary: FilesystemSummary,
}

fn has_extension(name: &str, extension: &str) -> bool {
    name.rsplit_once('.')
        .map_or(false, |(_, ext)| ext.eq_ignore_ascii_case(extension))
}

pub fn extract_prefetch_files(view: &dyn FilesystemView) -> Vec<PrefetchFile> {
    let mut files = Vec::new();
    for entry in view.files(PREFETCH_DIR) {
        if !has_extension(&entry.name, "pf") {
            continue;
        }
        let parsed = entry
            .read(view)
            .and_then(|data| parse_prefetch(&data, &entry.name));
        match parsed {
            Ok(mut pf) => {
                pf.path = entry.path;
                pf.created = entry.created;
                pf.modified = entry.modified;
                files.push(pf);
            }
            Err(e) => log::debug!("Skipping prefetch {}: {}", entry.path, e),
        }
    }
    files
}

/// Collect `.lnk` files below `root`; `root` itself is depth 0
pub fn find_link_files(
    view: &dyn FilesystemView,
    profile: &UserProfile,
    max_depth: usize,
) -> Vec<LinkFileRecord> {
    let mut links = Vec::new();
    let mut pending = vec![(profile.path.clone(), 0usize)];

    while let Some((dir, depth)) = pending.pop() {
        for entry in view.list_dir(&dir) {
            if entry.is_directory {
                if depth < max_depth && entry.name != "." && entry.name != ".." {
                    pending.push((entry.path, depth + 1));
                }
                continue;
            }
            if !has_extension(&entry.name, "lnk") {
                continue;
            }
            let parsed = entry.read(view).and_then(|data| ShellLink::parse(&data));
            match parsed {
                Ok(link) => links.push(LinkFileRecord {
                    file_name: entry.name,
                    file_path: entry.path,
                    file_size: entry.size,
                    file_created: entry.created,
                    file_modified: entry.modified,
                    user_profile: profile.user_name.clone(),
                    link,
                }),
                Err(e) => log::debug!("Skipping link {}: {}", entry.path, e),
            }
        }
    }
    links.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    links
}

pub fn extract_filesystem_artifacts(
    view: &dyn FilesystemView,
    profiles: &[UserProfile],
    lnk_depth: usize,
) -> FilesystemArtifacts {
    let prefetch_files = extract_prefetch_files(view);
    let mut link_files = Vec::new();
    let mut jump_lists = Vec::new();
    for profile in profiles {
        link_files.extend(find_link_files(view, profile, lnk_depth));
        jump_lists.extend(find_jump_lists(view, profile));
    }

    let summary = FilesystemSummary {
        total_prefetch: prefetch_files.len(),
        total_links: link_files.len(),
        total_jump_lists: jump_lists.len(),
    };
    log::info!(
        "Filesystem: {} prefetch, {} link file(s), {} jump list(s)",
        summary.total_prefetch,
        summary.total_links,
        summary.total_jump_lists
    );
    FilesystemArtifacts {
        prefetch_files,
        link_files,
        jump_lists,
        summary,
    }
}
