use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::SourceInfo;
use super::diagnostics::ValidationError;
use super::diagnostics::Warning;
use super::diagnostics::format_diagnostics;
use super::partial::PartialConfig;
use crate::integrations::open_epaper_link::AP_MAC;
use crate::integrations::open_epaper_link::OpenEPaperLinkConfig;

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

const DEFAULT_PORT: u16 = 8565;

#[derive(Debug, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub integrations: IntegrationsConfig,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"epaperd::engine" = "debug"`
    pub overrides: HashMap<String, LogLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Address the HTTP API binds to
    pub listen: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Default)]
pub struct IntegrationsConfig {
    pub open_epaper_link: Option<OpenEPaperLinkConfig>,
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// Supports:
    /// - Multiple config files (e.g., a shared base plus site files adding tags)
    /// - Import statements within config files
    /// - Conflict detection across all sources
    /// - Validation with all errors and warnings reported together
    ///
    /// Returns Ok((Config, diagnostics)) where diagnostics contains warnings.
    /// Only returns Err if there are actual errors (not just warnings).
    pub fn from_files(
        paths: &[PathBuf],
    ) -> Result<(Self, Vec<Diagnostic>), Box<dyn std::error::Error>> {
        let configs = PartialConfig::load_with_imports(paths)?;
        let (partial, diagnostics) = PartialConfig::merge(configs);
        Self::from_partial(partial, diagnostics)
    }

    /// Convert a merged PartialConfig to a Config, validating all fields
    ///
    /// Takes diagnostics from the merge step and adds validation diagnostics.
    pub fn from_partial(
        mut partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Vec<Diagnostic>), Box<dyn std::error::Error>> {
        let logging = partial
            .logging
            .take()
            .map(|l| LoggingConfig {
                level: l.level.map(|s| *s.get_ref()).unwrap_or_default(),
                overrides: l
                    .overrides
                    .map(|hm| hm.into_iter().map(|(k, v)| (k, *v.get_ref())).collect())
                    .unwrap_or_default(),
            })
            .unwrap_or_default();

        let api = partial
            .api
            .take()
            .map(|a| ApiConfig {
                listen: a.listen.map(|s| s.into_inner()).unwrap_or_else(default_listen),
                port: a.port.map(|s| s.into_inner()).unwrap_or(DEFAULT_PORT),
            })
            .unwrap_or_default();

        if api.port == 0 {
            diagnostics.push(validation_error(
                &partial,
                "api.port",
                "api.port",
                "port must not be 0".to_string(),
            ));
        }

        let open_epaper_link = partial
            .integrations
            .take()
            .and_then(|i| i.open_epaper_link)
            .map(|p| {
                let defaults = OpenEPaperLinkConfig::default();
                OpenEPaperLinkConfig {
                    image_dir: p.image_dir.map_or(defaults.image_dir, |s| s.into_inner()),
                    online: p.online.map_or(defaults.online, |s| s.into_inner()),
                    blacklist: p.blacklist.map(|s| s.into_inner()).unwrap_or_default(),
                    tags: p
                        .tags
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(mac, tag)| (mac, tag.into_inner()))
                        .collect(),
                }
            });

        if let Some(oepl) = &open_epaper_link {
            Self::validate_open_epaper_link(oepl, &partial, &mut diagnostics);
        }

        let config = Config {
            logging,
            api,
            integrations: IntegrationsConfig { open_epaper_link },
        };

        if diagnostics.iter().any(Diagnostic::is_error) {
            Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format_diagnostics(&diagnostics),
            )))
        } else {
            Ok((config, diagnostics))
        }
    }

    /// Check the OpenEPaperLink section for ids that can never work.
    fn validate_open_epaper_link(
        oepl: &OpenEPaperLinkConfig,
        partial: &PartialConfig,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        const PREFIX: &str = "integrations.open_epaper_link";

        for tag_mac in oepl.tags.keys() {
            let field_path = format!("{}.tags.{}", PREFIX, tag_mac);
            if tag_mac.trim().is_empty() {
                diagnostics.push(validation_error(
                    partial,
                    &field_path,
                    &field_path,
                    "tag MAC must not be empty".to_string(),
                ));
            } else if tag_mac == AP_MAC {
                diagnostics.push(validation_error(
                    partial,
                    &field_path,
                    &field_path,
                    "the access point cannot be configured as a tag".to_string(),
                ));
            }
        }

        let blacklist_path = format!("{}.blacklist", PREFIX);
        for (idx, tag_mac) in oepl.blacklist.iter().enumerate() {
            if tag_mac.trim().is_empty() {
                diagnostics.push(validation_error(
                    partial,
                    &blacklist_path,
                    &format!("{}[{}]", blacklist_path, idx),
                    "blacklist entries must not be empty".to_string(),
                ));
            } else if !oepl.tags.contains_key(tag_mac) {
                diagnostics.push(Diagnostic::Warning(Warning::UnknownBlacklistedTag {
                    tag_mac: tag_mac.clone(),
                }));
            }
        }
    }
}

/// Build a validation error located at the definition recorded for `origin`.
fn validation_error(
    partial: &PartialConfig,
    origin: &str,
    field_path: &str,
    message: String,
) -> Diagnostic {
    let location = partial.origins.get(origin);
    Diagnostic::Error(Error::Validation(ValidationError {
        field_path: field_path.to_string(),
        message,
        span: location.map(|l| l.span.clone()),
        source: location.map(|l| SourceInfo {
            file_path: l.file_path.clone(),
            content: l.content.clone(),
        }),
    }))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_merge_non_overlapping_configs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = write(
            temp_dir.path(),
            "base.toml",
            r#"
[logging]
level = "info"

[api]
port = 9100
"#,
        );
        let tags = write(
            temp_dir.path(),
            "tags.toml",
            r#"
[logging.overrides]
"epaperd::api" = "debug"

[integrations.open_epaper_link]
image_dir = "/var/lib/epaperd"

[integrations.open_epaper_link.tags.0000021EDE1F3B1A]
name = "Kitchen"
hw_type = 0x12
"#,
        );

        let result = Config::from_files(&[base, tags]);
        assert!(result.is_ok(), "Config loading failed: {:?}", result.err());

        let (config, diagnostics) = result.unwrap();
        assert!(diagnostics.is_empty(), "Expected no diagnostics");
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(
            config.logging.overrides.get("epaperd::api"),
            Some(&LogLevel::Debug)
        );
        assert_eq!(config.api.port, 9100);
        assert_eq!(config.api.listen, "127.0.0.1");

        let oepl = config.integrations.open_epaper_link.unwrap();
        assert_eq!(oepl.image_dir, PathBuf::from("/var/lib/epaperd"));
        assert!(oepl.online);
        let tag = oepl.tags.get("0000021EDE1F3B1A").unwrap();
        assert_eq!(tag.name.as_deref(), Some("Kitchen"));
        assert_eq!(tag.hw_type, 0x12);
    }

    #[test]
    fn test_tags_split_across_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = write(
            temp_dir.path(),
            "base.toml",
            r#"
[integrations.open_epaper_link]
image_dir = "/srv/epaperd"
blacklist = ["0000021EDE1F3B1B"]

[integrations.open_epaper_link.tags.0000021EDE1F3B1A]
name = "Kitchen"
"#,
        );
        let site = write(
            temp_dir.path(),
            "site.toml",
            r#"
[integrations.open_epaper_link.tags.0000021EDE1F3B1B]
name = "Office"
hw_type = 1
"#,
        );

        let (config, diagnostics) = Config::from_files(&[base, site]).unwrap();
        assert!(diagnostics.is_empty());

        let oepl = config.integrations.open_epaper_link.unwrap();
        assert_eq!(oepl.image_dir, PathBuf::from("/srv/epaperd"));
        assert_eq!(oepl.tags.len(), 2);
        assert_eq!(oepl.tags["0000021EDE1F3B1B"].name.as_deref(), Some("Office"));
    }

    #[test]
    fn test_conflict_detection() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = write(temp_dir.path(), "base.toml", "[logging]\nlevel = \"info\"\n");
        let conflict = write(temp_dir.path(), "conflict.toml", "[logging]\nlevel = \"debug\"\n");

        let result = Config::from_files(&[base, conflict]);
        assert!(result.is_err());

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Merge conflict"));
        assert!(err_msg.contains("logging.level"));
    }

    #[test]
    fn test_multiple_conflicts_reported() {
        let temp_dir = tempfile::tempdir().unwrap();
        let body = r#"
[logging.overrides]
"target1" = "trace"

[api]
listen = "0.0.0.0"

[integrations.open_epaper_link]
online = false
"#;
        let a = write(temp_dir.path(), "a.toml", body);
        let b = write(temp_dir.path(), "b.toml", body);

        let err_msg = Config::from_files(&[a, b]).unwrap_err().to_string();
        assert!(err_msg.contains("logging.overrides.target1"));
        assert!(err_msg.contains("api.listen"));
        assert!(err_msg.contains("integrations.open_epaper_link"));
    }

    #[test]
    fn test_relative_import_paths() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(
            temp_dir.path(),
            "configs/base.toml",
            "[logging]\nlevel = \"warn\"\n",
        );
        let main = write(
            temp_dir.path(),
            "main.toml",
            "imports = [\"configs/base.toml\"]\n\n[api]\nport = 8080\n",
        );

        let (config, _diagnostics) = Config::from_files(&[main]).unwrap();
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn test_import_cycle_detection() {
        let temp_dir = tempfile::tempdir().unwrap();
        let a = write(temp_dir.path(), "a.toml", "imports = [\"b.toml\"]\n");
        write(temp_dir.path(), "b.toml", "imports = [\"a.toml\"]\n");

        let err_msg = Config::from_files(&[a]).unwrap_err().to_string();
        assert!(err_msg.contains("Import cycle"));
    }

    #[test]
    fn test_empty_config_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let empty = write(temp_dir.path(), "empty.toml", "");

        let (config, diagnostics) = Config::from_files(&[empty]).unwrap();
        assert_eq!(diagnostics.len(), 1, "Expected 1 warning for empty config");
        assert!(diagnostics[0].is_warning());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.api, ApiConfig::default());
        assert!(config.integrations.open_epaper_link.is_none());
    }

    #[test]
    fn test_access_point_tag_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write(
            temp_dir.path(),
            "main.toml",
            "[integrations.open_epaper_link.tags.ap]\nname = \"Gateway\"\n",
        );

        let err_msg = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err_msg.contains("integrations.open_epaper_link.tags.ap"));
        assert!(err_msg.contains("access point"));
    }

    #[test]
    fn test_zero_port_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write(temp_dir.path(), "main.toml", "[api]\nport = 0\n");

        let err_msg = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err_msg.contains("port must not be 0"));
    }

    #[test]
    fn test_unknown_blacklisted_tag_is_a_warning() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write(
            temp_dir.path(),
            "main.toml",
            r#"
[integrations.open_epaper_link]
blacklist = ["00000000DEADBEEF"]
"#,
        );

        let (config, diagnostics) = Config::from_files(&[path]).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_warning());
        assert_eq!(
            config.integrations.open_epaper_link.unwrap().blacklist,
            vec!["00000000DEADBEEF".to_string()]
        );
    }

    #[test]
    fn test_unknown_field_is_a_parse_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write(
            temp_dir.path(),
            "main.toml",
            "[integrations.open_epaper_link]\nimage_path = \"/tmp\"\n",
        );

        let err_msg = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err_msg.contains("Failed to parse"));
    }

    #[test]
    fn test_missing_file_error() {
        let missing_path = PathBuf::from("/nonexistent/epaperd.toml");

        let err_msg = Config::from_files(&[missing_path]).unwrap_err().to_string();
        assert!(err_msg.contains("Failed to read"));
        assert!(err_msg.contains("/nonexistent/epaperd.toml"));
    }
}
