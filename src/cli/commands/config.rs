//! Config command handlers
//!
//! Implements `config show` and `config validate`.

use crate::cli::args::{ConfigShowArgs, ConfigValidateArgs};
use crate::config::{ConfigStore, YamlFileStore, parse_settings, unknown_keys};
use crate::error::{ConfigError, ScareBoxError, ValidationIssue};

/// Print the effective configuration as YAML.
///
/// # Errors
///
/// Returns a config error if the file exists but cannot be parsed.
pub fn show(args: &ConfigShowArgs) -> Result<(), ScareBoxError> {
    let settings = YamlFileStore::new(&args.config).load()?;
    print!("{}", serde_yaml::to_string(&settings)?);
    Ok(())
}

/// Check the configuration file and report every issue found.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] if any error is found, or any
/// warning under `--strict`.
pub fn validate(args: &ConfigValidateArgs) -> Result<(), ScareBoxError> {
    let store = YamlFileStore::new(&args.config);
    let Some(text) = store.read_raw()? else {
        return Err(ConfigError::MissingFile {
            path: args.config.clone(),
        }
        .into());
    };
    tracing::info!(file = %args.config.display(), "validating configuration");

    let settings = parse_settings(&text, &args.config)?;
    let mut result = settings.validate();
    for key in unknown_keys(&text, &args.config)? {
        result
            .warnings
            .push(ValidationIssue::warning(key, "unknown key is ignored"));
    }

    for issue in result.issues() {
        eprintln!("  {issue}");
    }

    let failed = result.has_errors() || (args.strict && !result.warnings.is_empty());
    if failed {
        let mut errors = result.errors;
        if args.strict {
            errors.extend(result.warnings);
        }
        return Err(ConfigError::ValidationError {
            path: args.config.display().to_string(),
            errors,
        }
        .into());
    }

    println!(
        "{}: OK ({} warning(s))",
        args.config.display(),
        result.warnings.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args(file: &NamedTempFile, strict: bool) -> ConfigValidateArgs {
        ConfigValidateArgs {
            config: file.path().to_path_buf(),
            strict,
        }
    }

    fn yaml(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn valid_file_passes() {
        let file = yaml("mode: adult\ntiming:\n  countdown_duration: 1.0\n");
        assert!(validate(&args(&file, true)).is_ok());
    }

    #[test]
    fn unknown_key_fails_only_when_strict() {
        let file = yaml("mode: adult\ncolour: red\n");
        assert!(validate(&args(&file, false)).is_ok());
        let err = validate(&args(&file, true)).unwrap_err();
        assert!(matches!(
            err,
            ScareBoxError::Config(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn inverted_band_is_an_error() {
        let file = yaml("audio:\n  trigger_frequency_min: 2000\n  trigger_frequency_max: 100\n");
        assert!(validate(&args(&file, false)).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let args = ConfigValidateArgs {
            config: dir.path().join("absent.yaml"),
            strict: false,
        };
        let err = validate(&args).unwrap_err();
        assert!(matches!(
            err,
            ScareBoxError::Config(ConfigError::MissingFile { .. })
        ));
    }
}
