use crate::constants;
use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Strategy for handling a failed converter invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Record the failure and move on to the next file
    #[default]
    Continue,
    /// Stop issuing new invocations after the first failure
    Abort,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(ErrorPolicy::Continue),
            "abort" => Ok(ErrorPolicy::Abort),
            other => Err(format!("unknown error policy '{}' (expected continue or abort)", other)),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Continue => write!(f, "continue"),
            ErrorPolicy::Abort => write!(f, "abort"),
        }
    }
}

/// How the external converter is launched.
///
/// The converter is run as `program [args...] <output_root> <input_path>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: constants::DEFAULT_CONVERTER_PROGRAM.to_string(),
            args: Vec::new(),
            timeout_secs: None,
        }
    }
}

/// Fully resolved dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub categories: Vec<String>,
    pub concurrency: usize,
    pub on_error: ErrorPolicy,
    pub converter: ConverterConfig,
    pub log_dir: Option<PathBuf>,
}

impl DispatchConfig {
    /// Create a configuration with default categories, concurrency 1 and continue-on-error
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            categories: constants::default_categories(),
            concurrency: constants::DEFAULT_CONCURRENCY,
            on_error: ErrorPolicy::default(),
            converter: ConverterConfig::default(),
            log_dir: None,
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_error_policy(mut self, on_error: ErrorPolicy) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_converter(mut self, converter: ConverterConfig) -> Self {
        self.converter = converter;
        self
    }

    /// Validate the configuration before any work is dispatched
    pub fn validate(&self) -> Result<()> {
        if !self.input_root.exists() {
            return Err(DispatchError::Config(format!(
                "Input root '{}' does not exist",
                self.input_root.display()
            )));
        }
        if !self.input_root.is_dir() {
            return Err(DispatchError::Config(format!(
                "Input root '{}' is not a directory",
                self.input_root.display()
            )));
        }
        // Candidate patterns are globbed as UTF-8 strings
        if self.input_root.to_str().is_none() {
            return Err(DispatchError::Config(format!(
                "Input root '{}' is not valid UTF-8",
                self.input_root.display()
            )));
        }

        validate_categories(&self.categories)?;

        if self.concurrency == 0 {
            return Err(DispatchError::Config("Concurrency must be at least 1".to_string()));
        }
        if self.converter.program.trim().is_empty() {
            return Err(DispatchError::Config("Converter program must not be empty".to_string()));
        }
        if self.converter.timeout_secs == Some(0) {
            return Err(DispatchError::Config(
                "Converter timeout must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_categories(categories: &[String]) -> Result<()> {
    if categories.is_empty() {
        return Err(DispatchError::Config("At least one category is required".to_string()));
    }

    let mut seen = HashSet::new();
    for category in categories {
        if category.is_empty() || category == "." || category == ".." {
            return Err(DispatchError::Config(format!("Invalid category label '{}'", category)));
        }
        if category.contains('/') || category.contains('\\') {
            return Err(DispatchError::Config(format!(
                "Category label '{}' must not contain a path separator",
                category
            )));
        }
        if !seen.insert(category.as_str()) {
            return Err(DispatchError::Config(format!("Duplicate category label '{}'", category)));
        }
    }
    Ok(())
}

/// Split a comma-separated category list, trimming whitespace
pub fn parse_categories(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Converter section of a partial configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConverter {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
}

/// Configuration layer as read from a TOML file or the command line.
/// Layers are merged with [`PartialConfig::merge`] and then resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub input_root: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub categories: Option<Vec<String>>,
    pub concurrency: Option<usize>,
    pub on_error: Option<ErrorPolicy>,
    pub converter: PartialConverter,
    pub log_dir: Option<PathBuf>,
}

impl PartialConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DispatchError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let config: PartialConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Overlay `other` on top of `self`; fields set in `other` win
    pub fn merge(self, other: PartialConfig) -> Self {
        Self {
            input_root: other.input_root.or(self.input_root),
            output_root: other.output_root.or(self.output_root),
            categories: other.categories.or(self.categories),
            concurrency: other.concurrency.or(self.concurrency),
            on_error: other.on_error.or(self.on_error),
            converter: PartialConverter {
                program: other.converter.program.or(self.converter.program),
                args: other.converter.args.or(self.converter.args),
                timeout_secs: other.converter.timeout_secs.or(self.converter.timeout_secs),
            },
            log_dir: other.log_dir.or(self.log_dir),
        }
    }

    /// Fill remaining gaps with defaults. Both roots are required.
    pub fn resolve(self) -> Result<DispatchConfig> {
        let input_root = self
            .input_root
            .ok_or_else(|| DispatchError::Config("Input root is required (--input)".to_string()))?;
        let output_root = self
            .output_root
            .ok_or_else(|| DispatchError::Config("Output root is required (--output)".to_string()))?;

        let defaults = ConverterConfig::default();
        let mut config = DispatchConfig::new(input_root, output_root);
        if let Some(categories) = self.categories {
            config.categories = categories;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(on_error) = self.on_error {
            config.on_error = on_error;
        }
        config.converter = ConverterConfig {
            program: self.converter.program.unwrap_or(defaults.program),
            args: self.converter.args.unwrap_or(defaults.args),
            timeout_secs: self.converter.timeout_secs,
        };
        config.log_dir = self.log_dir;
        Ok(config)
    }
}
