//! Registry artifacts: USB history, UserAssist, installed programs, run keys,
//! last logged-on user, time zone and network configuration.

use crate::datetime::{filetime_to_datetime, unix_seconds_to_datetime};
use crate::error::{Error, Result};
use crate::fs::FilesystemView;
use crate::profiles::UserProfile;
use crate::registry::{Hive, Key, RegistryData};
use crate::text::{le_u32, le_u64};
use crate::types::Diagnostic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CATEGORY: &str = "registry";

/// SYSTEM hive locations (NT 6+, then NT 5 installs under WINNT)
const SYSTEM_HIVES: [&str; 2] = ["/Windows/System32/config/SYSTEM", "/WINNT/System32/config/SYSTEM"];
const SOFTWARE_HIVES: [&str; 2] = ["/Windows/System32/config/SOFTWARE", "/WINNT/System32/config/SOFTWARE"];

const UNINSTALL_KEYS: [&str; 2] = [
    "Microsoft\\Windows\\CurrentVersion\\Uninstall",
    "Wow6432Node\\Microsoft\\Windows\\CurrentVersion\\Uninstall",
];

const SYSTEM_RUN_KEYS: [&str; 6] = [
    "Microsoft\\Windows\\CurrentVersion\\Run",
    "Microsoft\\Windows\\CurrentVersion\\RunOnce",
    "Microsoft\\Windows\\CurrentVersion\\RunServices",
    "Microsoft\\Windows\\CurrentVersion\\RunServicesOnce",
    "Wow6432Node\\Microsoft\\Windows\\CurrentVersion\\Run",
    "Wow6432Node\\Microsoft\\Windows\\CurrentVersion\\RunOnce",
];

const USER_RUN_KEYS: [&str; 2] = [
    "Software\\Microsoft\\Windows\\CurrentVersion\\Run",
    "Software\\Microsoft\\Windows\\CurrentVersion\\RunOnce",
];

const USERASSIST_KEY: &str = "Software\\Microsoft\\Windows\\CurrentVersion\\Explorer\\UserAssist";
const WINLOGON_KEY: &str = "Microsoft\\Windows NT\\CurrentVersion\\Winlogon";
const LOGONUI_KEY: &str = "Microsoft\\Windows\\CurrentVersion\\Authentication\\LogonUI";
const NETWORK_ADAPTER_CLASS: &str = "Control\\Class\\{4D36E972-E325-11CE-BFC1-08002BE10318}";

/// Well-known UserAssist GUIDs
const USERASSIST_GUIDS: [(&str, &str); 4] = [
    ("{CEBFF5CD-ACE2-4F4F-9178-9926F41749EA}", "Executable file execution"),
    ("{F4E57C4B-2036-45F0-A9AB-443BCFE33D9F}", "Shortcut file execution"),
    ("{75048700-EF1F-11D0-9888-006097DEACF9}", "Active Desktop"),
    ("{5E6AB780-7743-11CF-A12B-00AA004AE837}", "Internet Explorer toolbar"),
];

/// A USB device instance seen by the plug-and-play manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbDevice {
    /// `USBSTOR` or `USB`
    pub device_class: String,
    /// Device key name (vendor/product string)
    pub device_name: String,
    /// Instance key name, usually the serial number
    pub instance_id: String,
    pub friendly_name: String,
    /// Last-written time of the instance key
    pub first_install: Option<DateTime<Utc>>,
}

/// Count value payload, by Windows generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAssistPayload {
    /// XP/2003: 16 bytes, run count stored with an offset of 5
    Legacy {
        session: u32,
        run_count: u32,
        last_run: Option<DateTime<Utc>>,
    },
    /// Windows 7+: 72 bytes
    Modern {
        run_count: u32,
        focus_count: u32,
        focus_time_ms: u32,
        last_run: Option<DateTime<Utc>>,
    },
}

impl UserAssistPayload {
    pub fn parse(data: &[u8]) -> Option<Self> {
        match data.len() {
            16 => Some(Self::Legacy {
                session: le_u32(data, 0)?,
                run_count: le_u32(data, 4)?.saturating_sub(5),
                last_run: le_u64(data, 8).and_then(filetime_to_datetime),
            }),
            n if n >= 72 => Some(Self::Modern {
                run_count: le_u32(data, 4)?,
                focus_count: le_u32(data, 8)?,
                focus_time_ms: le_u32(data, 12)?,
                last_run: le_u64(data, 60).and_then(filetime_to_datetime),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAssistEntry {
    /// Profile the NTUSER.DAT belongs to
    pub user: String,
    pub guid: String,
    pub guid_description: Option<String>,
    /// ROT13-decoded value name
    pub program: String,
    pub run_count: u32,
    pub focus_count: Option<u32>,
    pub focus_time_ms: Option<u32>,
    pub last_run: Option<DateTime<Utc>>,
    /// `legacy` or `modern`
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledProgram {
    /// Uninstall subkey name
    pub registry_key: String,
    pub display_name: String,
    pub display_version: String,
    pub publisher: String,
    /// Usually `YYYYMMDD`, kept as written
    pub install_date: String,
    pub install_location: String,
    pub uninstall_string: String,
    /// Kilobytes
    pub estimated_size: Option<u32>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunKeyEntry {
    /// `SOFTWARE` or the NTUSER.DAT path
    pub hive: String,
    pub key_path: String,
    pub name: String,
    pub value: String,
    /// `system` or `user`
    #[serde(rename = "type")]
    pub entry_type: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastLoggedUser {
    pub default_user_name: Option<String>,
    pub default_domain_name: Option<String>,
    pub last_used_username: Option<String>,
    /// `LogonUI\LastLoggedOnUser` (Vista+)
    pub last_logged_on_user: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimezoneInfo {
    pub time_zone_key_name: Option<String>,
    pub standard_name: Option<String>,
    pub daylight_name: Option<String>,
    /// Minutes west of UTC
    pub bias: Option<i32>,
    pub active_time_bias: Option<i32>,
    pub standard_bias: Option<i32>,
    pub daylight_bias: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkAdapter {
    pub driver_desc: Option<String>,
    pub driver_version: Option<String>,
    pub driver_date: Option<String>,
    pub net_cfg_instance_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpParameters {
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub dhcp_domain: Option<String>,
    pub search_list: Option<String>,
}

/// Per-interface TCP/IP settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub interface_id: String,
    pub dhcp_enabled: bool,
    pub ip_addresses: Vec<String>,
    pub subnet_masks: Vec<String>,
    pub default_gateways: Vec<String>,
    pub dhcp_server: Option<String>,
    pub dhcp_domain: Option<String>,
    pub lease_obtained: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub computer_name: Option<String>,
    pub network_adapters: Vec<NetworkAdapter>,
    pub tcp_parameters: TcpParameters,
    pub interfaces: Vec<NetworkInterface>,
}

/// Everything the registry category produces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryArtifacts {
    pub usb_history: Vec<UsbDevice>,
    pub userassist: Vec<UserAssistEntry>,
    pub installed_programs: Vec<InstalledProgram>,
    pub run_keys: Vec<RunKeyEntry>,
    pub last_logged_user: LastLoggedUser,
    pub timezone_info: TimezoneInfo,
    pub network_info: NetworkInfo,
}

/// ROT13 over ASCII letters; every other character passes through
pub fn rot13(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'a'..='m' | 'A'..='M' => ((c as u8) + 13) as char,
            'n'..='z' | 'N'..='Z' => ((c as u8) - 13) as char,
            _ => c,
        })
        .collect()
}

/// Load the first hive found at `candidates`.
///
/// A missing hive is `Ok(None)`; a hive that exists but does not parse is an error.
fn load_hive(view: &dyn FilesystemView, candidates: &[&str]) -> Result<Option<(String, Hive)>> {
    for path in candidates {
        match view.read(path) {
            Ok(data) => {
                let hive = Hive::parse(data).map_err(|e| Error::Parse(format!("{}: {}", path, e)))?;
                log::debug!("Loaded hive {}", path);
                return Ok(Some((path.to_string(), hive)));
            }
            Err(Error::NotFound(_)) => continue,
            Err(e) => return Err(Error::Read(format!("{}: {}", path, e))),
        }
    }
    Ok(None)
}

/// `ControlSetNNN` named by `Select\Current`, falling back to `ControlSet001`
pub fn current_control_set(hive: &Hive) -> String {
    hive.open_key("Select")
        .and_then(|select| select.u32_value("Current"))
        .filter(|&n| n > 0 && n < 1000)
        .map(|n| format!("ControlSet{:03}", n))
        .filter(|name| hive.open_key(name).is_some())
        .unwrap_or_else(|| "ControlSet001".to_string())
}

fn signed(key: &Key<'_>, name: &str) -> Option<i32> {
    key.value(name).and_then(|v| match v.data {
        RegistryData::DWord(d) => Some(d as i32),
        _ => None,
    })
}

fn multi(key: &Key<'_>, name: &str) -> Vec<String> {
    match key.value(name).map(|v| v.data) {
        Some(RegistryData::MultiString(items)) => items.into_iter().filter(|s| !s.is_empty()).collect(),
        Some(RegistryData::String(s)) if !s.is_empty() => vec![s],
        _ => Vec::new(),
    }
}

pub fn extract_usb_history(hive: &Hive) -> Vec<UsbDevice> {
    let control_set = current_control_set(hive);
    let mut devices = Vec::new();
    for class in ["USBSTOR", "USB"] {
        let path = format!("{}\\Enum\\{}", control_set, class);
        let enum_key = match hive.open_key(&path) {
            Some(key) => key,
            None => {
                log::debug!("{} not present", path);
                continue;
            }
        };
        for device in enum_key.subkeys() {
            for instance in device.subkeys() {
                devices.push(UsbDevice {
                    device_class: class.to_string(),
                    device_name: device.name().to_string(),
                    instance_id: instance.name().to_string(),
                    friendly_name: instance.string_value("FriendlyName").unwrap_or_default(),
                    first_install: instance.last_written(),
                });
            }
        }
    }
    devices
}

pub fn extract_userassist(hive: &Hive, user: &str) -> Vec<UserAssistEntry> {
    let root = match hive.open_key(USERASSIST_KEY) {
        Some(key) => key,
        None => return Vec::new(),
    };
    let mut entries = Vec::new();
    for guid_key in root.subkeys() {
        let guid = guid_key.name().to_string();
        let count = match guid_key.subkey("Count") {
            Some(count) => count,
            None => continue,
        };
        let description = USERASSIST_GUIDS
            .iter()
            .find(|(g, _)| g.eq_ignore_ascii_case(&guid))
            .map(|(_, d)| d.to_string());

        for value in count.values() {
            let program = rot13(&value.name);
            let (run_count, focus_count, focus_time_ms, last_run, format) = match UserAssistPayload::parse(&value.raw) {
                Some(UserAssistPayload::Legacy { run_count, last_run, .. }) => {
                    (run_count, None, None, last_run, "legacy")
                }
                Some(UserAssistPayload::Modern {
                    run_count,
                    focus_count,
                    focus_time_ms,
                    last_run,
                }) => (run_count, Some(focus_count), Some(focus_time_ms), last_run, "modern"),
                None => {
                    log::debug!(
                        "UserAssist {}: {} byte payload for {} skipped",
                        guid,
                        value.raw.len(),
                        program
                    );
                    continue;
                }
            };
            entries.push(UserAssistEntry {
                user: user.to_string(),
                guid: guid.clone(),
                guid_description: description.clone(),
                program,
                run_count,
                focus_count,
                focus_time_ms,
                last_run,
                format: format.to_string(),
            });
        }
    }
    entries
}

pub fn extract_installed_programs(hive: &Hive) -> Vec<InstalledProgram> {
    let mut programs = Vec::new();
    for path in UNINSTALL_KEYS {
        let uninstall = match hive.open_key(path) {
            Some(key) => key,
            None => continue,
        };
        for program in uninstall.subkeys() {
            let display_name = program.string_value("DisplayName").unwrap_or_default();
            if display_name.is_empty() {
                continue;
            }
            programs.push(InstalledProgram {
                registry_key: program.name().to_string(),
                display_name,
                display_version: program.string_value("DisplayVersion").unwrap_or_default(),
                publisher: program.string_value("Publisher").unwrap_or_default(),
                install_date: program.string_value("InstallDate").unwrap_or_default(),
                install_location: program.string_value("InstallLocation").unwrap_or_default(),
                uninstall_string: program.string_value("UninstallString").unwrap_or_default(),
                estimated_size: program.u32_value("EstimatedSize"),
                last_modified: program.last_written(),
            });
        }
    }
    programs
}

pub fn extract_run_keys(hive: &Hive, hive_label: &str, paths: &[&str], entry_type: &str) -> Vec<RunKeyEntry> {
    let mut entries = Vec::new();
    for path in paths {
        let key = match hive.open_key(path) {
            Some(key) => key,
            None => continue,
        };
        for value in key.values() {
            entries.push(RunKeyEntry {
                hive: hive_label.to_string(),
                key_path: path.to_string(),
                value: value.data.as_string().unwrap_or_default(),
                name: value.name,
                entry_type: entry_type.to_string(),
                last_modified: key.last_written(),
            });
        }
    }
    entries
}

pub fn extract_last_logged_user(hive: &Hive) -> LastLoggedUser {
    let mut user = LastLoggedUser::default();
    if let Some(winlogon) = hive.open_key(WINLOGON_KEY) {
        user.default_user_name = winlogon.string_value("DefaultUserName");
        user.default_domain_name = winlogon.string_value("DefaultDomainName");
        user.last_used_username = winlogon.string_value("LastUsedUsername");
    }
    if let Some(logonui) = hive.open_key(LOGONUI_KEY) {
        user.last_logged_on_user = logonui.string_value("LastLoggedOnUser");
    }
    user
}

pub fn extract_timezone(hive: &Hive) -> TimezoneInfo {
    let path = format!("{}\\Control\\TimeZoneInformation", current_control_set(hive));
    match hive.open_key(&path) {
        Some(tz) => TimezoneInfo {
            time_zone_key_name: tz.string_value("TimeZoneKeyName"),
            standard_name: tz.string_value("StandardName"),
            daylight_name: tz.string_value("DaylightName"),
            bias: signed(&tz, "Bias"),
            active_time_bias: signed(&tz, "ActiveTimeBias"),
            standard_bias: signed(&tz, "StandardBias"),
            daylight_bias: signed(&tz, "DaylightBias"),
        },
        None => TimezoneInfo::default(),
    }
}

pub fn extract_network(hive: &Hive) -> NetworkInfo {
    let control_set = current_control_set(hive);
    let mut info = NetworkInfo::default();

    info.computer_name = hive
        .open_key(&format!("{}\\Control\\ComputerName\\ComputerName", control_set))
        .and_then(|k| k.string_value("ComputerName"));

    if let Some(class) = hive.open_key(&format!("{}\\{}", control_set, NETWORK_ADAPTER_CLASS)) {
        for adapter in class.subkeys() {
            if !adapter.name().chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let entry = NetworkAdapter {
                driver_desc: adapter.string_value("DriverDesc"),
                driver_version: adapter.string_value("DriverVersion"),
                driver_date: adapter.string_value("DriverDate"),
                net_cfg_instance_id: adapter.string_value("NetCfgInstanceId"),
            };
            if entry != NetworkAdapter::default() {
                info.network_adapters.push(entry);
            }
        }
    }

    if let Some(tcpip) = hive.open_key(&format!("{}\\Services\\Tcpip\\Parameters", control_set)) {
        info.tcp_parameters = TcpParameters {
            hostname: tcpip.string_value("Hostname"),
            domain: tcpip.string_value("Domain"),
            dhcp_domain: tcpip.string_value("DhcpDomain"),
            search_list: tcpip.string_value("SearchList"),
        };
        if let Some(interfaces) = tcpip.subkey("Interfaces") {
            for interface in interfaces.subkeys() {
                info.interfaces.push(parse_interface(&interface));
            }
        }
    }
    info
}

fn parse_interface(key: &Key<'_>) -> NetworkInterface {
    let dhcp_enabled = key.u32_value("EnableDHCP").unwrap_or(0) != 0;
    let (ip_addresses, subnet_masks, default_gateways) = if dhcp_enabled {
        (
            multi(key, "DhcpIPAddress"),
            multi(key, "DhcpSubnetMask"),
            multi(key, "DhcpDefaultGateway"),
        )
    } else {
        (multi(key, "IPAddress"), multi(key, "SubnetMask"), multi(key, "DefaultGateway"))
    };
    NetworkInterface {
        interface_id: key.name().to_string(),
        dhcp_enabled,
        ip_addresses: ip_addresses.into_iter().filter(|ip| ip != "0.0.0.0").collect(),
        subnet_masks,
        default_gateways,
        dhcp_server: key.string_value("DhcpServer"),
        dhcp_domain: key.string_value("DhcpDomain"),
        lease_obtained: key
            .u32_value("LeaseObtainedTime")
            .filter(|&t| t > 0)
            .and_then(|t| unix_seconds_to_datetime(i64::from(t))),
        last_modified: key.last_written(),
    }
}

/// Run every registry sub-artifact against the hives on `view`.
///
/// Each hive is opened just before its sub-artifacts run and dropped right
/// after. A hive that exists but cannot be parsed leaves its sub-artifacts
/// empty and adds a diagnostic.
pub fn extract_registry_artifacts(
    view: &dyn FilesystemView,
    profiles: &[UserProfile],
    diagnostics: &mut Vec<Diagnostic>,
) -> RegistryArtifacts {
    let mut artifacts = RegistryArtifacts::default();

    match load_hive(view, &SYSTEM_HIVES) {
        Ok(Some((_, system))) => {
            artifacts.usb_history = extract_usb_history(&system);
            artifacts.timezone_info = extract_timezone(&system);
            artifacts.network_info = extract_network(&system);
        }
        Ok(None) => log::info!("No SYSTEM hive found"),
        Err(e) => {
            log::warn!("SYSTEM hive unusable: {}", e);
            diagnostics.push(Diagnostic::new(CATEGORY, format!("SYSTEM hive: {}", e)));
        }
    }

    match load_hive(view, &SOFTWARE_HIVES) {
        Ok(Some((_, software))) => {
            artifacts.installed_programs = extract_installed_programs(&software);
            artifacts.run_keys = extract_run_keys(&software, "SOFTWARE", &SYSTEM_RUN_KEYS, "system");
            artifacts.last_logged_user = extract_last_logged_user(&software);
        }
        Ok(None) => log::info!("No SOFTWARE hive found"),
        Err(e) => {
            log::warn!("SOFTWARE hive unusable: {}", e);
            diagnostics.push(Diagnostic::new(CATEGORY, format!("SOFTWARE hive: {}", e)));
        }
    }

    for profile in profiles {
        let ntuser = profile.join("NTUSER.DAT");
        match load_hive(view, &[ntuser.as_str()]) {
            Ok(Some((path, hive))) => {
                artifacts.userassist.extend(extract_userassist(&hive, &profile.user_name));
                artifacts
                    .run_keys
                    .extend(extract_run_keys(&hive, &path, &USER_RUN_KEYS, "user"));
            }
            Ok(None) => log::debug!("{} has no NTUSER.DAT", profile.path),
            Err(e) => {
                log::warn!("{} unusable: {}", ntuser, e);
                diagnostics.push(Diagnostic::new(CATEGORY, e.to_string()));
            }
        }
    }

    log::info!(
        "Registry: {} USB devices, {} UserAssist entries, {} programs, {} run keys",
        artifacts.usb_history.len(),
        artifacts.userassist.len(),
        artifacts.installed_programs.len(),
        artifacts.run_keys.len()
    );
    artifacts
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::fs::testing::MemoryView;
    use crate::profiles::discover_profiles;
    use crate::registry::testing::{build_hive, TestKey};
    use chrono::TimeZone;

    fn view_with_hives() -> MemoryView {
        let mut view = MemoryView::new();
        view.add_file("/Windows/System32/config/SYSTEM", system_hive());
        view.add_file("/Windows/System32/config/SOFTWARE", software_hive());
        view.add_file("/Users/jean/NTUSER.DAT", ntuser_hive());
        view
    }

    #[test]
    fn test_rot13_is_involution() {
        for input in ["HRZR_EHACNGU:P:\\abgrcnq.rkr", "Hello, World! 123", "", "ünïcödé"] {
            assert_eq!(rot13(&rot13(input)), input);
        }
        assert_eq!(rot13("pzq.rkr"), "cmd.exe");
    }

    #[test]
    fn test_userassist_payload_lengths() {
        let mut legacy = vec![0u8; 16];
        legacy[4] = 3;
        assert!(matches!(
            UserAssistPayload::parse(&legacy),
            Some(UserAssistPayload::Legacy { run_count: 0, last_run: None, .. })
        ));
        assert!(UserAssistPayload::parse(&[0u8; 40]).is_none());
        assert!(matches!(
            UserAssistPayload::parse(&[0u8; 72]),
            Some(UserAssistPayload::Modern { .. })
        ));
    }

    #[test]
    fn test_full_registry_extraction() {
        let view = view_with_hives();
        let profiles = discover_profiles(&view);
        let mut diagnostics = Vec::new();
        let artifacts = extract_registry_artifacts(&view, &profiles, &mut diagnostics);
        assert!(diagnostics.is_empty());

        assert_eq!(artifacts.usb_history.len(), 2);
        let stor = &artifacts.usb_history[0];
        assert_eq!(stor.device_class, "USBSTOR");
        assert_eq!(stor.instance_id, "4C530001230420110134&0");
        assert_eq!(stor.friendly_name, "SanDisk Cruzer USB Device");
        assert_eq!(stor.first_install, filetime_to_datetime(INSTALL_TIME));
        assert_eq!(artifacts.usb_history[1].device_class, "USB");

        let tz = &artifacts.timezone_info;
        assert_eq!(tz.time_zone_key_name.as_deref(), Some("Pacific Standard Time"));
        assert_eq!(tz.bias, Some(480));
        assert_eq!(tz.daylight_bias, Some(-60));

        let net = &artifacts.network_info;
        assert_eq!(net.computer_name.as_deref(), Some("JEAN-PC"));
        assert_eq!(net.network_adapters.len(), 1);
        assert_eq!(net.tcp_parameters.domain.as_deref(), Some("m57.biz"));
        assert_eq!(net.interfaces[0].ip_addresses, vec!["192.168.1.64"]);
        assert_eq!(
            net.interfaces[0].lease_obtained,
            Some(Utc.timestamp_opt(1_215_000_000, 0).unwrap())
        );

        let names: Vec<&str> = artifacts.installed_programs.iter().map(|p| p.display_name.as_str()).collect();
        assert_eq!(names, vec!["Mozilla Firefox 3.0", "7-Zip 4.65"]);
        assert_eq!(artifacts.installed_programs[0].estimated_size, Some(25_000));

        assert_eq!(artifacts.run_keys.len(), 3);
        assert_eq!(artifacts.run_keys[0].entry_type, "system");
        assert_eq!(artifacts.run_keys[1].key_path, "Wow6432Node\\Microsoft\\Windows\\CurrentVersion\\RunOnce");
        assert_eq!(artifacts.run_keys[2].hive, "/Users/jean/NTUSER.DAT");
        assert_eq!(artifacts.run_keys[2].entry_type, "user");

        assert_eq!(artifacts.last_logged_user.default_user_name.as_deref(), Some("Jean"));
        assert_eq!(
            artifacts.last_logged_user.last_logged_on_user.as_deref(),
            Some("JEAN-PC\\Jean")
        );

        assert_eq!(artifacts.userassist.len(), 2);
        let legacy = &artifacts.userassist[0];
        assert_eq!(legacy.program, "UEME_RUNPATH:C:\\WINDOWS\\system32\\notepad.exe");
        assert_eq!(legacy.run_count, 3);
        assert_eq!(legacy.format, "legacy");
        assert_eq!(legacy.guid_description.as_deref(), Some("Active Desktop"));
        let modern = &artifacts.userassist[1];
        assert_eq!(modern.program, "{1AC14E77-02E7-4E5D-B744-2EB1AE5198B7}\\cmd.exe");
        assert_eq!(modern.run_count, 12);
        assert_eq!(modern.focus_count, Some(3));
        assert_eq!(modern.user, "jean");
    }

    #[test]
    fn test_corrupt_system_hive_is_diagnosed() {
        let mut view = view_with_hives();
        let mut broken = system_hive();
        broken[0x24..0x28].copy_from_slice(&0x7FFF_0000u32.to_le_bytes());
        view.add_file("/Windows/System32/config/SYSTEM", broken);

        let mut diagnostics = Vec::new();
        let artifacts = extract_registry_artifacts(&view, &discover_profiles(&view), &mut diagnostics);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].category, CATEGORY);
        assert!(artifacts.usb_history.is_empty());
        assert_eq!(artifacts.timezone_info, TimezoneInfo::default());
        assert_eq!(artifacts.installed_programs.len(), 2);
    }

    #[test]
    fn test_missing_hives_are_quiet() {
        let view = MemoryView::new();
        let mut diagnostics = Vec::new();
        let artifacts = extract_registry_artifacts(&view, &[], &mut diagnostics);
        assert!(diagnostics.is_empty());
        assert_eq!(artifacts, RegistryArtifacts::default());
    }

    #[test]
    fn test_control_set_fallback() {
        let root = TestKey::new("ROOT").child(TestKey::new("ControlSet001"));
        let hive = Hive::parse(build_hive(&root)).unwrap();
        assert_eq!(current_control_set(&hive), "ControlSet001");
    }
}
