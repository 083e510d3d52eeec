//! Boundary: gathers the one-time system snapshot recorded with each session.
//!
//! All OS, clock, and env-var access for session records lives here.

use std::collections::BTreeMap;
use std::env;
use std::thread;

use chrono::{SecondsFormat, Utc};
use lineage_types::{PlatformInfo, RuntimeInfo, SystemSnapshot};

/// General-purpose variables recorded in every snapshot.
pub const DEFAULT_ENVIRONMENT: &[&str] = &[
    "CONDA_DEFAULT_ENV",
    "CONDA_PREFIX",
    "VIRTUAL_ENV",
    "PATH",
    "LD_LIBRARY_PATH",
    "DYLD_LIBRARY_PATH",
    "USER",
    "HOME",
    "SHELL",
    "CARGO_HOME",
    "RUSTUP_TOOLCHAIN",
];

/// What the host wants recorded beyond the fixed platform facts.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub version: String,
    pub dependencies: BTreeMap<String, String>,
    /// Application-specific variables (`envvars` in the snapshot).
    pub envvars: Vec<String>,
    /// General-purpose variables (`environment` in the snapshot).
    pub environment: Vec<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            dependencies: lineage_dependencies(),
            envvars: vec![lineage_config::SCHEMA_ENV_VAR.to_string()],
            environment: DEFAULT_ENVIRONMENT.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Versions of the lineage crates linked into this process.
#[must_use]
pub fn lineage_dependencies() -> BTreeMap<String, String> {
    [
        ("lineage-types", lineage_types::VERSION),
        ("lineage-config", lineage_config::VERSION),
        ("lineage-core", env!("CARGO_PKG_VERSION")),
    ]
    .into_iter()
    .map(|(name, version)| (name.to_string(), version.to_string()))
    .collect()
}

#[must_use]
pub fn gather(config: &SnapshotConfig) -> SystemSnapshot {
    let uname = uname();
    SystemSnapshot {
        version: config.version.clone(),
        dependencies: config.dependencies.clone(),
        envvars: read_vars(&config.envvars),
        executable: env::current_exe().ok().map(|p| p.display().to_string()),
        platform: PlatformInfo {
            architecture_bits: format!("{}bit", usize::BITS),
            machine: env::consts::ARCH.to_string(),
            node: uname.as_ref().map(|u| u.node.clone()),
            system: env::consts::OS.to_string(),
            family: env::consts::FAMILY.to_string(),
            release: uname.as_ref().map(|u| u.release.clone()),
            version: uname.map(|u| u.version),
            num_cpus: thread::available_parallelism().map_or(1, usize::from),
            boot_time: boot_time(),
        },
        runtime: RuntimeInfo {
            implementation: "rust".to_string(),
            minimum_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            debug_assertions: cfg!(debug_assertions),
        },
        environment: read_vars(&config.environment),
        arguments: env::args().collect(),
        start_time_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    }
}

/// Login name of the user running the process.
#[must_use]
pub fn agent_name() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn read_vars(names: &[String]) -> BTreeMap<String, Option<String>> {
    names
        .iter()
        .map(|name| (name.clone(), env::var(name).ok()))
        .collect()
}

struct Uname {
    node: String,
    release: String,
    version: String,
}

#[cfg(unix)]
fn uname() -> Option<Uname> {
    fn field(raw: &[libc::c_char]) -> String {
        let bytes: Vec<u8> = raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    // SAFETY: utsname is plain data; uname only writes into the struct we own.
    let mut info: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&raw mut info) } != 0 {
        return None;
    }
    Some(Uname {
        node: field(&info.nodename),
        release: field(&info.release),
        version: field(&info.version),
    })
}

#[cfg(not(unix))]
fn uname() -> Option<Uname> {
    None
}

#[cfg(target_os = "linux")]
fn boot_time() -> Option<String> {
    let stat = std::fs::read_to_string("/proc/stat").ok()?;
    let secs: i64 = stat
        .lines()
        .find_map(|line| line.strip_prefix("btime "))?
        .trim()
        .parse()
        .ok()?;
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(not(target_os = "linux"))]
fn boot_time() -> Option<String> {
    None
}
