use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::RwLock,
};

use anyhow::Context;

use crate::parser::PatternRule;

pub const DEFAULT_CONFIG_PATH: &str = "Panel_Setting/config.json";
pub const DEFAULT_WRAPPER: &str = "Panel_Setting/pty-proxy";
pub const DEFAULT_GATE_URL: &str = "http://uniteban.xyz:19132/api.php";

fn default_port() -> String {
    ":8080".to_string()
}

fn default_wrapper() -> String {
    DEFAULT_WRAPPER.to_string()
}

fn default_gate_url() -> String {
    DEFAULT_GATE_URL.to_string()
}

fn default_true() -> bool {
    true
}

/// Panel settings file. Key names match existing deployments.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PanelConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(rename = "ServerPath", default)]
    pub server_path: String,
    #[serde(rename = "Wrapper", default = "default_wrapper")]
    pub wrapper: String,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "LoaderVersion", default)]
    pub loader_version: String,
    /// Kick flagged players instead of only annotating them.
    #[serde(rename = "Uniteban", default = "default_true")]
    pub uniteban: bool,
    #[serde(rename = "UnitebanUrl", default = "default_gate_url")]
    pub uniteban_url: String,
    #[serde(rename = "PlayerPatterns", default)]
    pub player_patterns: Vec<PatternRule>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            server_path: String::new(),
            wrapper: default_wrapper(),
            version: String::new(),
            loader_version: String::new(),
            uniteban: true,
            uniteban_url: default_gate_url(),
            player_patterns: Vec::new(),
        }
    }
}

impl PanelConfig {
    /// Accepts `":8080"`, `"8080"` or a full `host:port`.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let raw = self.port.trim();
        let full = if let Some(port) = raw.strip_prefix(':') {
            format!("0.0.0.0:{port}")
        } else if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            format!("0.0.0.0:{raw}")
        } else {
            raw.to_string()
        };
        full.parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address: {raw:?}"))
    }

    pub fn wrapper_path(&self) -> Option<PathBuf> {
        let w = self.wrapper.trim();
        (!w.is_empty()).then(|| PathBuf::from(w))
    }

    pub fn server_path(&self) -> Option<PathBuf> {
        let p = self.server_path.trim();
        (!p.is_empty()).then(|| PathBuf::from(p))
    }
}

pub fn config_path_from_env() -> PathBuf {
    std::env::var("ZEPHYR_CONFIG")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Loaded config plus its backing file. Writes go through a temp file and a
/// rename so a crash never leaves a truncated config behind.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<PanelConfig>,
}

impl ConfigStore {
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: PanelConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(Self {
            path,
            current: RwLock::new(cfg),
        })
    }

    pub fn snapshot(&self) -> PanelConfig {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn raw_json(&self) -> anyhow::Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read config {}", self.path.display()))
    }

    /// Validates `text` as a panel config, writes it verbatim and returns the
    /// parsed result.
    pub async fn replace_raw_json(&self, text: &str) -> anyhow::Result<PanelConfig> {
        let cfg: PanelConfig = serde_json::from_str(text).context("config is not valid JSON")?;
        write_atomic(&self.path, text.as_bytes()).await?;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = cfg.clone();
        Ok(cfg)
    }

    /// Persists a discovered server version. Unknown keys in the file are kept.
    pub async fn record_versions(&self, version: &str, loader: &str) -> anyhow::Result<bool> {
        {
            let cur = self.current.read().unwrap_or_else(|e| e.into_inner());
            if cur.version == version && cur.loader_version == loader {
                return Ok(false);
            }
        }

        let raw = self.raw_json().await?;
        let mut doc: serde_json::Value =
            serde_json::from_str(&raw).context("parse config for update")?;
        let Some(obj) = doc.as_object_mut() else {
            anyhow::bail!("config root is not an object");
        };
        obj.insert("Version".into(), serde_json::Value::String(version.into()));
        obj.insert(
            "LoaderVersion".into(),
            serde_json::Value::String(loader.into()),
        );
        let text = serde_json::to_string_pretty(&doc).context("serialize config")?;
        write_atomic(&self.path, text.as_bytes()).await?;

        let mut cur = self.current.write().unwrap_or_else(|e| e.into_inner());
        cur.version = version.to_string();
        cur.loader_version = loader.to_string();
        tracing::info!(version, loader, "server version recorded");
        Ok(true)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}
