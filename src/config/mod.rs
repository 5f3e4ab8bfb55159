use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConfigFile {
    #[serde(alias = "base_url")]
    pub api_url: Option<String>,
    pub kind: Option<String>,
    pub timeout: Option<usize>,
    pub retries: Option<u32>,
    pub retry_base_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub rate: Option<u32>,
    pub poll_interval: Option<u64>,
    pub export_dir: Option<String>,
    #[serde(alias = "fallback_file")]
    pub offline: Option<String>,
    pub proxy: Option<String>,
    pub header: Option<String>,
    pub no_color: Option<bool>,
    pub output: Option<String>,
    pub output_format: Option<String>,
    pub search: Option<String>,
    pub filters: Option<BTreeMap<String, String>>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .or_else(|| {
            let drive = env::var_os("HOMEDRIVE")?;
            let path = env::var_os("HOMEPATH")?;
            Some(PathBuf::from(drive).join(path))
        })
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(home_dir()?.join(".kdash").join("config.yml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn load_config(path: &PathBuf, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(ConfigFile::default()),
        Ok(contents) => serde_yaml::from_str::<ConfigFile>(&contents)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}

fn default_config_yaml() -> String {
    r#"# kdash config
#
# Location (default):
#   ~/.kdash/config.yml
#
# Every key is optional; command-line flags win over this file.

# Backend
api_url: http://localhost:8000/
# proxy: http://127.0.0.1:8080
# header: "Authorization: Bearer <token>"
timeout: 10
retries: 3
retry_base_ms: 250

# View: cases, plans or results
kind: cases
# search: boot
# filters:
#   test_type: unit
#   status: never_run

# Offline dataset used when the backend is unreachable
# offline: ./dataset.json

# Bulk operations (concurrency 1 keeps item calls sequential)
concurrency: 1
# rate: 10
export_dir: .

# Polling interval in seconds for --watch
poll_interval: 30

# Output
# output: ./cases.json
# output_format: json
no_color: false
"#
    .to_string()
}

pub fn ensure_default_config_file(path: &PathBuf) -> Result<bool, String> {
    if path.exists() {
        return Ok(false);
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("invalid config path '{}'", path.display()))?;
    std::fs::create_dir_all(parent).map_err(|e| {
        format!(
            "failed to create config directory '{}': {e}",
            parent.display()
        )
    })?;
    let contents = default_config_yaml();
    std::fs::write(path, contents)
        .map_err(|e| format!("failed to write config file '{}': {e}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let cfg: ConfigFile = serde_yaml::from_str(&default_config_yaml()).unwrap();
        assert_eq!(cfg.api_url.as_deref(), Some("http://localhost:8000/"));
        assert_eq!(cfg.concurrency, Some(1));
        assert_eq!(cfg.kind.as_deref(), Some("cases"));
        assert!(cfg.filters.is_none());
    }

    #[test]
    fn missing_file_is_allowed_only_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yml");
        assert_eq!(load_config(&path, true).unwrap(), ConfigFile::default());
        assert!(load_config(&path, false).is_err());
    }

    #[test]
    fn init_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yml");
        assert!(ensure_default_config_file(&path).unwrap());
        assert!(!ensure_default_config_file(&path).unwrap());
        let cfg = load_config(&path, false).unwrap();
        assert_eq!(cfg.poll_interval, Some(30));
    }

    #[test]
    fn filters_map_and_aliases() {
        let cfg: ConfigFile = serde_yaml::from_str(
            "base_url: https://lab.example/\nfallback_file: ./d.json\nfilters:\n  testType: unit\n",
        )
        .unwrap();
        assert_eq!(cfg.api_url.as_deref(), Some("https://lab.example/"));
        assert_eq!(cfg.offline.as_deref(), Some("./d.json"));
        assert_eq!(cfg.filters.unwrap().get("testType").map(String::as_str), Some("unit"));
    }
}
