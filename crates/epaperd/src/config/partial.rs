use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use toml::Spanned;

use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::MergeConflictLocation;
use super::diagnostics::MergeError;
use super::diagnostics::SourceInfo;
use super::diagnostics::Warning;
use super::LogLevel;
use crate::integrations::open_epaper_link::TagConfig;

/// One config file as written, before merging and validation.
#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub api: Option<PartialApiConfig>,
    pub integrations: Option<PartialIntegrationsConfig>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,

    /// Where each field of a merged config was defined, keyed by field path
    #[serde(skip)]
    pub origins: HashMap<String, MergeConflictLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialApiConfig {
    pub listen: Option<Spanned<String>>,
    pub port: Option<Spanned<u16>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialIntegrationsConfig {
    pub open_epaper_link: Option<PartialOpenEPaperLinkConfig>,
}

/// `[integrations.open_epaper_link]` as written in one file.
///
/// Tags merge per MAC, so a site file can add tags to a shared base file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialOpenEPaperLinkConfig {
    pub image_dir: Option<Spanned<PathBuf>>,
    pub online: Option<Spanned<bool>>,
    pub blacklist: Option<Spanned<Vec<String>>>,
    pub tags: Option<BTreeMap<String, Spanned<TagConfig>>>,
}

/// Accumulates first-wins merge results and the conflicts found on the way.
#[derive(Default)]
struct Merger {
    diagnostics: Vec<Diagnostic>,
    origins: HashMap<String, MergeConflictLocation>,
}

impl Merger {
    /// Merge one spanned field into `slot`.
    ///
    /// The first definition is kept. A later definition of the same field path
    /// is recorded as a merge error pointing at both locations.
    fn field<T>(
        &mut self,
        slot: &mut Option<Spanned<T>>,
        incoming: Option<Spanned<T>>,
        field_path: String,
        what: &str,
        source: &SourceInfo,
    ) {
        let Some(value) = incoming else {
            return;
        };

        let location = MergeConflictLocation {
            file_path: source.file_path.clone(),
            span: value.span(),
            content: source.content.clone(),
        };

        if let Some(previous) = self.origins.get(&field_path) {
            self.diagnostics
                .push(Diagnostic::Error(Error::Merge(MergeError {
                    message: format!("{} defined in multiple config files", what),
                    conflicts: vec![previous.clone(), location],
                    field_path,
                })));
        } else {
            *slot = Some(value);
            self.origins.insert(field_path, location);
        }
    }
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Returns every loaded file in order, imports before the file importing them.
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if !visited.insert(canonical_path.clone()) {
            return Err(LoadError::ImportCycle {
                visited: visited.iter().cloned().collect(),
                path: canonical_path,
            });
        }

        let config = Self::from_file(path)?;

        // Relative imports resolve against the importing file's directory
        let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
        for import in &config.imports {
            let import_path = PathBuf::from(import);
            let resolved = if import_path.is_absolute() {
                import_path
            } else {
                parent_dir.join(import_path)
            };
            Self::load_recursive(&resolved, visited, configs)?;
        }

        configs.push(config);

        // Only the current import chain counts towards cycles; siblings may
        // import the same file.
        visited.remove(&canonical_path);

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.api.is_none()
            && self.integrations.is_none()
            && self.imports.is_empty()
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics. Conflicts are collected as errors and
    /// merging continues, so every conflict is reported in one pass.
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut merger = Merger::default();
        let mut imports = Vec::new();

        for config in configs {
            let source = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            if config.is_empty() {
                merger
                    .diagnostics
                    .push(Diagnostic::Warning(Warning::EmptyConfig {
                        file_path: source.file_path.clone(),
                    }));
            }

            imports.extend(config.imports);

            if let Some(logging) = config.logging {
                let result_logging = result.logging.get_or_insert_with(Default::default);
                merger.field(
                    &mut result_logging.level,
                    logging.level,
                    "logging.level".to_string(),
                    "Logging level",
                    &source,
                );

                for (target, level) in logging.overrides.unwrap_or_default() {
                    let mut slot = None;
                    merger.field(
                        &mut slot,
                        Some(level),
                        format!("logging.overrides.{}", target),
                        &format!("Logging override for '{}'", target),
                        &source,
                    );
                    if let Some(level) = slot {
                        result_logging
                            .overrides
                            .get_or_insert_with(HashMap::new)
                            .insert(target, level);
                    }
                }
            }

            if let Some(api) = config.api {
                let result_api = result.api.get_or_insert_with(Default::default);
                merger.field(
                    &mut result_api.listen,
                    api.listen,
                    "api.listen".to_string(),
                    "API listen address",
                    &source,
                );
                merger.field(
                    &mut result_api.port,
                    api.port,
                    "api.port".to_string(),
                    "API port",
                    &source,
                );
            }

            if let Some(oepl) = config.integrations.and_then(|i| i.open_epaper_link) {
                let result_oepl = result
                    .integrations
                    .get_or_insert_with(Default::default)
                    .open_epaper_link
                    .get_or_insert_with(Default::default);

                merger.field(
                    &mut result_oepl.image_dir,
                    oepl.image_dir,
                    "integrations.open_epaper_link.image_dir".to_string(),
                    "OpenEPaperLink image directory",
                    &source,
                );
                merger.field(
                    &mut result_oepl.online,
                    oepl.online,
                    "integrations.open_epaper_link.online".to_string(),
                    "OpenEPaperLink online flag",
                    &source,
                );
                merger.field(
                    &mut result_oepl.blacklist,
                    oepl.blacklist,
                    "integrations.open_epaper_link.blacklist".to_string(),
                    "OpenEPaperLink blacklist",
                    &source,
                );

                for (tag_mac, tag) in oepl.tags.unwrap_or_default() {
                    let mut slot = None;
                    merger.field(
                        &mut slot,
                        Some(tag),
                        format!("integrations.open_epaper_link.tags.{}", tag_mac),
                        &format!("Tag '{}'", tag_mac),
                        &source,
                    );
                    if let Some(tag) = slot {
                        result_oepl
                            .tags
                            .get_or_insert_with(BTreeMap::new)
                            .insert(tag_mac, tag);
                    }
                }
            }
        }

        result.imports = imports;
        result.origins = merger.origins;

        (result, merger.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, content: &str) -> PartialConfig {
        let mut config: PartialConfig = toml::from_str(content).unwrap();
        config.source = Some(SourceInfo {
            file_path: PathBuf::from(path),
            content: content.to_string(),
        });
        config
    }

    #[test]
    fn test_merge_keeps_first_definition() {
        let a = parse("a.toml", "[api]\nport = 9000\n");
        let b = parse("b.toml", "[api]\nport = 9001\nlisten = \"0.0.0.0\"\n");

        let (merged, diagnostics) = PartialConfig::merge([a, b]);

        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_error());
        let api = merged.api.unwrap();
        assert_eq!(*api.port.unwrap().get_ref(), 9000);
        assert_eq!(api.listen.unwrap().into_inner(), "0.0.0.0");
    }

    #[test]
    fn test_merge_records_origins() {
        let a = parse(
            "a.toml",
            "[integrations.open_epaper_link]\nimage_dir = \"/tmp/images\"\n",
        );

        let (merged, diagnostics) = PartialConfig::merge([a]);

        assert!(diagnostics.is_empty());
        let origin = merged
            .origins
            .get("integrations.open_epaper_link.image_dir")
            .unwrap();
        assert_eq!(origin.file_path, PathBuf::from("a.toml"));
    }

    #[test]
    fn test_tags_merge_per_mac() {
        let base = parse(
            "base.toml",
            r#"
[integrations.open_epaper_link]
image_dir = "/srv"

[integrations.open_epaper_link.tags.AAAA]
name = "Kitchen"
"#,
        );
        let site = parse(
            "site.toml",
            "[integrations.open_epaper_link.tags.BBBB]\nhw_type = 1\n",
        );

        let (merged, diagnostics) = PartialConfig::merge([base, site]);

        assert!(diagnostics.is_empty());
        let oepl = merged.integrations.unwrap().open_epaper_link.unwrap();
        let tags: Vec<_> = oepl.tags.unwrap().into_keys().collect();
        assert_eq!(tags, vec!["AAAA".to_string(), "BBBB".to_string()]);
    }

    #[test]
    fn test_same_tag_in_two_files_conflicts() {
        let a = parse("a.toml", "[integrations.open_epaper_link.tags.AAAA]\nhw_type = 1\n");
        let b = parse("b.toml", "[integrations.open_epaper_link.tags.AAAA]\nhw_type = 2\n");

        let (merged, diagnostics) = PartialConfig::merge([a, b]);

        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_error());
        let tags = merged.integrations.unwrap().open_epaper_link.unwrap().tags.unwrap();
        assert_eq!(tags["AAAA"].get_ref().hw_type, 1);
    }

    #[test]
    fn test_override_conflicts_are_per_target() {
        let a = parse("a.toml", "[logging.overrides]\n\"epaperd::api\" = \"debug\"\n");
        let b = parse(
            "b.toml",
            "[logging.overrides]\n\"epaperd::engine\" = \"trace\"\n",
        );

        let (merged, diagnostics) = PartialConfig::merge([a, b]);

        assert!(diagnostics.is_empty());
        assert_eq!(merged.logging.unwrap().overrides.unwrap().len(), 2);
    }
}
