use std::fmt;
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use std::path::PathBuf;

use ariadne::Color;
use ariadne::Label;
use ariadne::Report;
use ariadne::ReportKind;
use ariadne::Source;

/// A config file's path and text, kept so errors can quote it
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file_path: PathBuf,
    pub content: String,
}

/// A diagnostic message that can be either a warning or an error
#[derive(Debug, Clone)]
pub enum Diagnostic {
    Warning(Warning),
    Error(Error),
}

/// Warning messages that don't prevent config loading
#[derive(Debug, Clone)]
pub enum Warning {
    EmptyConfig { file_path: PathBuf },
    /// A blacklist entry that names no configured tag. Harmless, but usually a typo.
    UnknownBlacklistedTag { tag_mac: String },
}

/// Error messages that indicate problems with the config
#[derive(Debug, Clone)]
pub enum Error {
    Merge(MergeError),
    Validation(ValidationError),
}

/// Error type for merge conflicts
#[derive(Debug, Clone)]
pub struct MergeError {
    pub field_path: String,
    pub message: String,
    pub conflicts: Vec<MergeConflictLocation>,
}

/// Where a field was defined: file, byte span, and the file's text for rendering
#[derive(Debug, Clone)]
pub struct MergeConflictLocation {
    pub file_path: PathBuf,
    pub span: Range<usize>,
    pub content: String,
}

/// Error type for validation failures
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
    pub span: Option<Range<usize>>,
    pub source: Option<SourceInfo>,
}

/// Failure to read the config files at all. Nothing is merged after one of these.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Import cycle detected at '{}' ({} file(s) visited)", .path.display(), .visited.len())]
    ImportCycle { path: PathBuf, visited: Vec<PathBuf> },
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::Error(_))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Diagnostic::Warning(_))
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::EmptyConfig { file_path } => write!(
                f,
                "Warning: Config file '{}' is empty and has no effect",
                file_path.display()
            ),
            Warning::UnknownBlacklistedTag { tag_mac } => write!(
                f,
                "Warning: Blacklisted tag '{}' is not a configured tag",
                tag_mac
            ),
        }
    }
}

/// Render diagnostics for the terminal.
///
/// Warnings are one line each. Errors with a known location get an ariadne
/// report pointing into the offending file(s).
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut output = Vec::new();

    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::Warning(warning) => {
                writeln!(output, "{}", warning).ok();
            }
            Diagnostic::Error(Error::Merge(merge_error)) => {
                write_merge_error(merge_error, &mut output);
            }
            Diagnostic::Error(Error::Validation(validation_error)) => {
                write_validation_error(validation_error, &mut output);
            }
        }
    }

    String::from_utf8_lossy(&output).into_owned()
}

fn file_id(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn write_merge_error(merge_error: &MergeError, output: &mut Vec<u8>) {
    let Some(first) = merge_error.conflicts.first() else {
        writeln!(
            output,
            "Merge conflict in '{}': {}",
            merge_error.field_path, merge_error.message
        )
        .ok();
        return;
    };

    let labels = merge_error.conflicts.iter().enumerate().map(|(idx, conflict)| {
        let (msg, color) = match idx {
            0 => ("first definition here", Color::Red),
            _ => ("conflicts with this definition", Color::Yellow),
        };
        Label::new((file_id(&conflict.file_path), conflict.span.clone()))
            .with_message(msg)
            .with_color(color)
    });

    // One cache holding every file involved, so a conflict across two files
    // renders as a single report.
    let cache = ariadne::sources(
        merge_error
            .conflicts
            .iter()
            .map(|c| (file_id(&c.file_path), c.content.clone())),
    );

    Report::build(
        ReportKind::Error,
        (file_id(&first.file_path), first.span.clone()),
    )
    .with_message(format!("Merge conflict in '{}'", merge_error.field_path))
    .with_labels(labels)
    .with_note(&merge_error.message)
    .finish()
    .write(cache, &mut *output)
    .ok();
}

fn write_validation_error(validation_error: &ValidationError, output: &mut Vec<u8>) {
    let (Some(span), Some(source)) = (&validation_error.span, &validation_error.source) else {
        writeln!(
            output,
            "Validation error in '{}': {}",
            validation_error.field_path, validation_error.message
        )
        .ok();
        return;
    };

    let id = file_id(&source.file_path);
    Report::build(ReportKind::Error, (id.clone(), span.clone()))
        .with_message(format!(
            "Validation error in '{}'",
            validation_error.field_path
        ))
        .with_label(
            Label::new((id.clone(), span.clone()))
                .with_message(&validation_error.message)
                .with_color(Color::Red),
        )
        .finish()
        .write((id, Source::from(&source.content)), &mut *output)
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_without_location() {
        let diagnostics = vec![Diagnostic::Error(Error::Validation(ValidationError {
            field_path: "api.port".to_string(),
            message: "port must not be 0".to_string(),
            span: None,
            source: None,
        }))];

        insta::assert_snapshot!(
            format_diagnostics(&diagnostics).trim_end(),
            @"Validation error in 'api.port': port must not be 0"
        );
    }

    #[test]
    fn test_warnings_render_one_line_each() {
        let diagnostics = vec![
            Diagnostic::Warning(Warning::EmptyConfig {
                file_path: PathBuf::from("/etc/epaperd/empty.toml"),
            }),
            Diagnostic::Warning(Warning::UnknownBlacklistedTag {
                tag_mac: "0000021EDE1F3B1A".to_string(),
            }),
        ];

        let output = format_diagnostics(&diagnostics);
        assert_eq!(output.lines().count(), 2);
        assert!(output.contains("/etc/epaperd/empty.toml"));
        assert!(output.contains("0000021EDE1F3B1A"));
        assert!(diagnostics.iter().all(Diagnostic::is_warning));
    }

    #[test]
    fn test_validation_error_with_location_names_file() {
        let content = "[integrations.open_epaper_link.tags.ap]\nname = \"AP\"\n".to_string();
        let diagnostics = vec![Diagnostic::Error(Error::Validation(ValidationError {
            field_path: "integrations.open_epaper_link.tags.ap".to_string(),
            message: "the access point cannot be configured as a tag".to_string(),
            span: Some(0..39),
            source: Some(SourceInfo {
                file_path: PathBuf::from("main.toml"),
                content,
            }),
        }))];

        let output = format_diagnostics(&diagnostics);
        assert!(output.contains("main.toml"));
        assert!(output.contains("integrations.open_epaper_link.tags.ap"));
        assert!(output.contains("the access point cannot be configured as a tag"));
    }
}
