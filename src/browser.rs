//! Firefox and Chromium (Chrome, Edge) history, cookie and download extraction.
//!
//! Each SQLite store is copied out of the image into a temporary file and
//! opened read-only. The connection and the copy live only for one store.

use crate::datetime::{unix_micros_to_datetime, unix_seconds_to_datetime, webkit_to_datetime};
use crate::error::{Error, Result};
use crate::fs::FilesystemView;
use crate::index_dat::{extract_ie_artifacts, IeArtifacts};
use crate::profiles::UserProfile;
use crate::text::join_path;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use std::io::Write;

pub const CATEGORY: &str = "browser";
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

pub const FIREFOX_PROFILE_DIRS: [&str; 2] = [
    "AppData/Roaming/Mozilla/Firefox/Profiles",
    "Application Data/Mozilla/Firefox/Profiles",
];

pub const CHROMIUM_PROFILES: [(&str, &str); 4] = [
    ("chrome", "AppData/Local/Google/Chrome/User Data/Default"),
    ("edge", "AppData/Local/Microsoft/Edge/User Data/Default"),
    ("chrome", "Local Settings/Application Data/Google/Chrome/User Data/Default"),
    ("edge", "Local Settings/Application Data/Microsoft/Edge/User Data/Default"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub source: String,
    pub user_profile: String,
    pub url: String,
    pub title: Option<String>,
    pub visit_count: i64,
    pub last_visit: Option<DateTime<Utc>>,
    pub typed_count: Option<i64>,
    pub hidden: Option<bool>,
    pub frecency: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieEntry {
    pub source: String,
    pub user_profile: String,
    pub host: String,
    pub name: String,
    pub value: String,
    pub path: String,
    pub expiry: Option<DateTime<Utc>>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub creation_time: Option<DateTime<Utc>>,
    pub is_secure: bool,
    pub is_http_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadEntry {
    pub source: String,
    pub user_profile: String,
    pub url: Option<String>,
    pub title: Option<String>,
    /// Final location on disk (percent-decoded for Firefox)
    pub target_path: Option<String>,
    pub current_path: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub received_bytes: Option<i64>,
    pub total_bytes: Option<i64>,
    pub state: Option<i64>,
    pub danger_type: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserData {
    pub history: Vec<HistoryEntry>,
    pub cookies: Vec<CookieEntry>,
    pub downloads: Vec<DownloadEntry>,
}

impl BrowserData {
    fn extend(&mut self, other: BrowserData) {
        self.history.extend(other.history);
        self.cookies.extend(other.cookies);
        self.downloads.extend(other.downloads);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserArtifacts {
    pub firefox: BrowserData,
    pub chrome_edge: BrowserData,
    pub internet_explorer: IeArtifacts,
}

impl BrowserArtifacts {
    pub fn total_history(&self) -> usize {
        self.firefox.history.len() + self.chrome_edge.history.len() + self.internet_explorer.history.len()
    }

    pub fn total_cookies(&self) -> usize {
        self.firefox.cookies.len() + self.chrome_edge.cookies.len() + self.internet_explorer.cookies.len()
    }

    pub fn total_downloads(&self) -> usize {
        self.firefox.downloads.len() + self.chrome_edge.downloads.len()
    }
}

/// A store copied out of the image; the temporary file goes with it
struct SqliteStore {
    connection: Connection,
    _copy: tempfile::NamedTempFile,
}

impl SqliteStore {
    fn open(view: &dyn FilesystemView, path: &str) -> Result<Self> {
        let mut data = view.read(path)?;
        if data.len() < 100 || !data.starts_with(b"SQLite format 3\0") {
            return Err(Error::Parse(format!("{} is not an SQLite database", path)));
        }
        // WAL databases need a -shm file to open read-only; the copy is
        // switched back to rollback-journal mode
        if data[18] == 2 && data[19] == 2 {
            data[18] = 1;
            data[19] = 1;
        }
        let mut copy = tempfile::NamedTempFile::new()?;
        copy.write_all(&data)?;
        copy.flush()?;
        let connection = Connection::open_with_flags(
            copy.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            connection,
            _copy: copy,
        })
    }

    /// Run a query, logging and returning nothing on failure
    fn query<T>(&self, label: &str, sql: &str, map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>) -> Vec<T> {
        match self.try_query(sql, map) {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("{}: query failed: {}", label, e);
                Vec::new()
            }
        }
    }

    fn try_query<T>(&self, sql: &str, map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>) -> rusqlite::Result<Vec<T>> {
        let mut statement = self.connection.prepare(sql)?;
        let rows = statement.query_map([], map)?;
        rows.collect()
    }
}

fn open_store(view: &dyn FilesystemView, path: &str) -> Option<SqliteStore> {
    if !view.exists(path) {
        return None;
    }
    match SqliteStore::open(view, path) {
        Ok(store) => Some(store),
        Err(e) => {
            log::warn!("Cannot open {}: {}", path, e);
            None
        }
    }
}

fn positive(value: Option<i64>) -> Option<i64> {
    value.filter(|&v| v > 0)
}

fn firefox_history(store: &SqliteStore, user: &str, limit: usize) -> Vec<HistoryEntry> {
    let sql = format!(
        "SELECT url, title, visit_count, last_visit_date, typed, hidden, frecency \
         FROM moz_places WHERE last_visit_date IS NOT NULL \
         ORDER BY last_visit_date DESC LIMIT {}",
        limit
    );
    store.query("moz_places", &sql, |row| {
        Ok(HistoryEntry {
            source: "firefox".to_string(),
            user_profile: user.to_string(),
            url: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            title: row.get(1)?,
            visit_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            last_visit: positive(row.get(3)?).and_then(unix_micros_to_datetime),
            typed_count: row.get(4)?,
            hidden: row.get::<_, Option<i64>>(5)?.map(|h| h != 0),
            frecency: row.get(6)?,
        })
    })
}

fn firefox_downloads(store: &SqliteStore, user: &str) -> Vec<DownloadEntry> {
    let sql = "SELECT p.url, p.title, a.content, p.last_visit_date \
               FROM moz_places p \
               JOIN moz_annos a ON p.id = a.place_id \
               JOIN moz_anno_attributes aa ON a.anno_attribute_id = aa.id \
               WHERE aa.name = 'downloads/destinationFileURI' \
               ORDER BY p.last_visit_date DESC";
    store.query("moz_annos", sql, |row| {
        let destination: Option<String> = row.get(2)?;
        Ok(DownloadEntry {
            source: "firefox".to_string(),
            user_profile: user.to_string(),
            url: row.get(0)?,
            title: row.get(1)?,
            target_path: destination.map(|d| decode_file_uri(&d)),
            current_path: None,
            start_time: positive(row.get(3)?).and_then(unix_micros_to_datetime),
            end_time: None,
            received_bytes: None,
            total_bytes: None,
            state: None,
            danger_type: None,
        })
    })
}

/// `file:///C:/Users/a/My%20File.zip` to `C:/Users/a/My File.zip`
pub fn decode_file_uri(uri: &str) -> String {
    let decoded = urlencoding::decode(uri)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| uri.to_string());
    decoded
        .strip_prefix("file:///")
        .map(str::to_string)
        .unwrap_or(decoded)
}

fn firefox_cookies(store: &SqliteStore, user: &str) -> Vec<CookieEntry> {
    let sql = "SELECT name, value, host, path, expiry, lastAccessed, creationTime, isSecure, isHttpOnly \
               FROM moz_cookies ORDER BY lastAccessed DESC";
    store.query("moz_cookies", sql, |row| {
        Ok(CookieEntry {
            source: "firefox".to_string(),
            user_profile: user.to_string(),
            name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            value: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            host: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            path: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            expiry: positive(row.get(4)?).and_then(unix_seconds_to_datetime),
            last_accessed: positive(row.get(5)?).and_then(unix_micros_to_datetime),
            creation_time: positive(row.get(6)?).and_then(unix_micros_to_datetime),
            is_secure: row.get::<_, Option<i64>>(7)?.unwrap_or(0) != 0,
            is_http_only: row.get::<_, Option<i64>>(8)?.unwrap_or(0) != 0,
        })
    })
}

pub fn extract_firefox(view: &dyn FilesystemView, profile: &UserProfile, limit: usize) -> BrowserData {
    let mut data = BrowserData::default();
    for dir in FIREFOX_PROFILE_DIRS {
        for firefox_profile in view.subdirectories(&profile.join(dir)) {
            log::debug!("Firefox profile {}", firefox_profile.path);
            if let Some(store) = open_store(view, &join_path(&firefox_profile.path, "places.sqlite")) {
                data.history.extend(firefox_history(&store, &profile.user_name, limit));
                data.downloads.extend(firefox_downloads(&store, &profile.user_name));
            }
            if let Some(store) = open_store(view, &join_path(&firefox_profile.path, "cookies.sqlite")) {
                data.cookies.extend(firefox_cookies(&store, &profile.user_name));
            }
        }
    }
    data
}

fn chromium_history(store: &SqliteStore, source: &str, user: &str, limit: usize) -> Vec<HistoryEntry> {
    let sql = format!(
        "SELECT url, title, visit_count, last_visit_time, typed_count \
         FROM urls ORDER BY last_visit_time DESC LIMIT {}",
        limit
    );
    store.query("urls", &sql, |row| {
        Ok(HistoryEntry {
            source: source.to_string(),
            user_profile: user.to_string(),
            url: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            title: row.get(1)?,
            visit_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            last_visit: positive(row.get(3)?).and_then(webkit_to_datetime),
            typed_count: row.get(4)?,
            hidden: None,
            frecency: None,
        })
    })
}

fn chromium_download_row(source: &str, user: &str, row: &Row<'_>) -> rusqlite::Result<DownloadEntry> {
    Ok(DownloadEntry {
        source: source.to_string(),
        user_profile: user.to_string(),
        current_path: row.get(0)?,
        target_path: row.get(1)?,
        start_time: positive(row.get(2)?).and_then(webkit_to_datetime),
        end_time: positive(row.get(3)?).and_then(webkit_to_datetime),
        received_bytes: row.get(4)?,
        total_bytes: row.get(5)?,
        state: row.get(6)?,
        danger_type: row.get(7)?,
        url: row.get(8)?,
        title: None,
    })
}

fn chromium_downloads(store: &SqliteStore, source: &str, user: &str) -> Vec<DownloadEntry> {
    // current schema keeps the URL in downloads_url_chains; old ones in downloads.url
    let chained = "SELECT d.current_path, d.target_path, d.start_time, d.end_time, \
                   d.received_bytes, d.total_bytes, d.state, d.danger_type, \
                   (SELECT c.url FROM downloads_url_chains c WHERE c.id = d.id \
                    ORDER BY c.chain_index DESC LIMIT 1) \
                   FROM downloads d ORDER BY d.start_time DESC";
    let legacy = "SELECT current_path, target_path, start_time, end_time, \
                  received_bytes, total_bytes, state, danger_type, url \
                  FROM downloads ORDER BY start_time DESC";
    match store.try_query(chained, |row| chromium_download_row(source, user, row)) {
        Ok(rows) => rows,
        Err(e) => {
            log::debug!("downloads: url chain query failed ({}), trying legacy schema", e);
            store.query("downloads", legacy, |row| chromium_download_row(source, user, row))
        }
    }
}

fn chromium_cookies(store: &SqliteStore, source: &str, user: &str) -> Vec<CookieEntry> {
    let sql = "SELECT name, value, host_key, path, expires_utc, last_access_utc, creation_utc, is_secure, is_httponly \
               FROM cookies ORDER BY last_access_utc DESC";
    store.query("cookies", sql, |row| {
        Ok(CookieEntry {
            source: source.to_string(),
            user_profile: user.to_string(),
            name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            value: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            host: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            path: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            expiry: positive(row.get(4)?).and_then(webkit_to_datetime),
            last_accessed: positive(row.get(5)?).and_then(webkit_to_datetime),
            creation_time: positive(row.get(6)?).and_then(webkit_to_datetime),
            is_secure: row.get::<_, Option<i64>>(7)?.unwrap_or(0) != 0,
            is_http_only: row.get::<_, Option<i64>>(8)?.unwrap_or(0) != 0,
        })
    })
}

pub fn extract_chromium(view: &dyn FilesystemView, profile: &UserProfile, limit: usize) -> BrowserData {
    let mut data = BrowserData::default();
    for (source, relative) in CHROMIUM_PROFILES {
        let dir = profile.join(relative);
        if !view.exists(&dir) {
            continue;
        }
        log::debug!("{} profile {}", source, dir);
        if let Some(store) = open_store(view, &join_path(&dir, "History")) {
            data.history.extend(chromium_history(&store, source, &profile.user_name, limit));
            data.downloads.extend(chromium_downloads(&store, source, &profile.user_name));
        }
        let cookies = ["Network/Cookies", "Cookies"]
            .iter()
            .map(|name| join_path(&dir, name))
            .find(|path| view.exists(path));
        if let Some(store) = cookies.and_then(|path| open_store(view, &path)) {
            data.cookies.extend(chromium_cookies(&store, source, &profile.user_name));
        }
    }
    data
}

pub fn extract_browser_artifacts(
    view: &dyn FilesystemView,
    profiles: &[UserProfile],
    history_limit: usize,
) -> BrowserArtifacts {
    let mut artifacts = BrowserArtifacts::default();
    for profile in profiles {
        artifacts.firefox.extend(extract_firefox(view, profile, history_limit));
        artifacts.chrome_edge.extend(extract_chromium(view, profile, history_limit));
        let ie = extract_ie_artifacts(view, profile);
        artifacts.internet_explorer.history.extend(ie.history);
        artifacts.internet_explorer.cookies.extend(ie.cookies);
        artifacts.internet_explorer.cache.extend(ie.cache);
    }
    log::info!(
        "Browsers: {} history, {} cookie(s), {} download(s)",
        artifacts.total_history(),
        artifacts.total_cookies(),
        artifacts.total_downloads()
    );
    artifacts
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::fs::testing::MemoryView;

    fn jean() -> UserProfile {
        UserProfile {
            path: "/Users/jean".to_string(),
            user_name: "jean".to_string(),
        }
    }

    #[test]
    fn test_firefox_history_and_downloads() {
        let mut view = MemoryView::new();
        let ff = "/Users/jean/AppData/Roaming/Mozilla/Firefox/Profiles/x1y2z3.default";
        view.add_file(&format!("{}/places.sqlite", ff), places_sqlite());
        view.add_file(
            &format!("{}/cookies.sqlite", ff),
            sqlite_bytes(&format!(
                "CREATE TABLE moz_cookies (name TEXT, value TEXT, host TEXT, path TEXT, expiry INTEGER, \
                   lastAccessed INTEGER, creationTime INTEGER, isSecure INTEGER, isHttpOnly INTEGER);
                 INSERT INTO moz_cookies VALUES ('sid', 'abc', '.example.com', '/', {e}, {a}, {a}, 1, 0);",
                e = VISIT_UNIX + 86_400,
                a = VISIT_UNIX * 1_000_000
            )),
        );

        let data = extract_firefox(&view, &jean(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(data.history.len(), 2);
        assert_eq!(data.history[0].url, "http://dl.example.com/tool.zip");
        assert_eq!(data.history[1].last_visit, unix_seconds_to_datetime(VISIT_UNIX));
        assert_eq!(data.history[1].hidden, Some(false));
        assert_eq!(data.downloads.len(), 1);
        assert_eq!(
            data.downloads[0].target_path.as_deref(),
            Some("C:/Users/jean/Downloads/my tool.zip")
        );
        assert_eq!(data.cookies.len(), 1);
        assert_eq!(data.cookies[0].expiry, unix_seconds_to_datetime(VISIT_UNIX + 86_400));
        assert!(data.cookies[0].is_secure);

        assert_eq!(extract_firefox(&view, &jean(), 1).history.len(), 1);
    }

    #[test]
    fn test_chrome_history_downloads_cookies() {
        let mut view = MemoryView::new();
        let dir = "/Users/jean/AppData/Local/Google/Chrome/User Data/Default";
        view.add_file(&format!("{}/History", dir), chrome_history_sqlite());
        view.add_file(
            &format!("{}/Network/Cookies", dir),
            sqlite_bytes(&format!(
                "CREATE TABLE cookies (host_key TEXT, name TEXT, value TEXT, path TEXT, expires_utc INTEGER, \
                   last_access_utc INTEGER, creation_utc INTEGER, is_secure INTEGER, is_httponly INTEGER);
                 INSERT INTO cookies VALUES ('.google.com', 'NID', '', '/', 0, {v}, {v}, 1, 1);",
                v = VISIT_WEBKIT
            )),
        );

        let data = extract_chromium(&view, &jean(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(data.history.len(), 1);
        assert_eq!(data.history[0].source, "chrome");
        assert_eq!(data.history[0].last_visit, unix_seconds_to_datetime(VISIT_UNIX));
        assert_eq!(data.history[0].typed_count, Some(2));
        assert_eq!(data.downloads.len(), 1);
        assert_eq!(data.downloads[0].url.as_deref(), Some("http://files.example/x.exe"));
        assert_eq!(data.cookies.len(), 1);
        assert_eq!(data.cookies[0].expiry, None);
        assert!(data.cookies[0].is_http_only);
    }

    #[test]
    fn test_legacy_download_schema() {
        let mut view = MemoryView::new();
        let dir = "/Users/jean/AppData/Local/Microsoft/Edge/User Data/Default";
        view.add_file(
            &format!("{}/History", dir),
            sqlite_bytes(
                "CREATE TABLE downloads (id INTEGER PRIMARY KEY, current_path TEXT, target_path TEXT, \
                   start_time INTEGER, end_time INTEGER, received_bytes INTEGER, total_bytes INTEGER, \
                   state INTEGER, danger_type INTEGER, url TEXT);
                 INSERT INTO downloads VALUES (1, 'a', 'b', 0, 0, 1, 1, 1, 0, 'http://old.example/');",
            ),
        );
        let data = extract_chromium(&view, &jean(), DEFAULT_HISTORY_LIMIT);
        // no urls table: history query fails and yields nothing
        assert!(data.history.is_empty());
        assert_eq!(data.downloads.len(), 1);
        assert_eq!(data.downloads[0].source, "edge");
        assert_eq!(data.downloads[0].url.as_deref(), Some("http://old.example/"));
        assert_eq!(data.downloads[0].start_time, None);
    }

    #[test]
    fn test_not_sqlite_is_skipped() {
        let mut view = MemoryView::new();
        view.add_file(
            "/Users/jean/AppData/Local/Google/Chrome/User Data/Default/History",
            b"garbage".to_vec(),
        );
        let artifacts = extract_browser_artifacts(&view, &[jean()], DEFAULT_HISTORY_LIMIT);
        assert_eq!(artifacts.total_history(), 0);
    }

    #[test]
    fn test_decode_file_uri() {
        assert_eq!(decode_file_uri("file:///D:/a%20b.txt"), "D:/a b.txt");
        assert_eq!(decode_file_uri("C:\\plain"), "C:\\plain");
    }
}
