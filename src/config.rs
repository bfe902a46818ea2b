use crate::core::error::{Error, Result};
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Return path granted to one-way connectionless flows (UDP, ICMP, all)
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionlessReplies {
    /// No return path at all
    #[default]
    #[strum(serialize = "none")]
    None,
    /// Replies admitted through connection tracking, like TCP
    #[strum(serialize = "established")]
    Established,
}

/// Compiler configuration
///
/// Every field has a default so a partial (or absent) config file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompilerConfig {
    #[serde(default)]
    pub connectionless_replies: ConnectionlessReplies,
    /// Tag every rule with `-m comment` naming the flows it realizes
    #[serde(default = "default_true")]
    pub emit_comments: bool,
    /// Emit an all-ACCEPT `*nat` table ahead of `*filter`
    #[serde(default = "default_true")]
    pub include_nat_table: bool,
    /// Synthesize flows on the rayon pool
    #[serde(default)]
    pub parallel: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            connectionless_replies: ConnectionlessReplies::None,
            emit_comments: true,
            include_nat_table: true,
            parallel: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Loads the compiler config.
///
/// With an explicit `path` the file must exist and parse. Without one, the
/// XDG config dir is consulted and a missing file yields the defaults.
///
/// # Async
/// Uses `tokio::fs` for non-blocking I/O.
pub async fn load_config(path: Option<&Path>) -> Result<CompilerConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let Some(mut dir) = get_config_dir() else {
                return Ok(CompilerConfig::default());
            };
            dir.push("config.json");
            if !tokio::fs::try_exists(&dir).await? {
                tracing::debug!("No config at {}, using defaults", dir.display());
                return Ok(CompilerConfig::default());
            }
            dir
        }
    };

    let json = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let config = serde_json::from_str::<CompilerConfig>(&json)
        .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))?;

    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}
