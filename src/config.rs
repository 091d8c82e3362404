use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf};

const DEFAULT_PUBLIC_BASE_URL: &str = "https://server-flipbook-production.up.railway.app";
const DEFAULT_MAX_FILES: usize = 20;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Fixed template tree copied into every flipbook.
    pub template_dir: PathBuf,
    /// Root of `<uuid>/` flipbooks and `temp-uploads/`.
    pub output_dir: PathBuf,
    /// Staging area for raw multipart parts.
    pub upload_dir: PathBuf,
    /// Directory served on the root URL prefix.
    pub static_dir: PathBuf,
    /// URL prefix used when building the `url` field of responses.
    pub public_base_url: String,
    /// `*` allows every origin.
    pub allowed_origins: Vec<String>,
    pub max_files: usize,
    /// Remove staging, partial output and received parts when a request fails.
    pub cleanup_on_failure: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "JPEG batch to flipbook server")]
pub struct Args {
    /// Host to bind to (overrides FLIPBOOK_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FLIPBOOK_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Template directory (overrides FLIPBOOK_TEMPLATE_DIR)
    #[arg(long)]
    pub template_dir: Option<PathBuf>,

    /// Output directory (overrides FLIPBOOK_OUTPUT_DIR)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Multipart staging directory (overrides FLIPBOOK_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Directory served at `/` (overrides FLIPBOOK_STATIC_DIR)
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Public URL prefix for flipbook links (overrides FLIPBOOK_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Allowed CORS origin, repeatable (overrides FLIPBOOK_ALLOWED_ORIGINS)
    #[arg(long = "allowed-origin")]
    pub allowed_origins: Vec<String>,

    /// Maximum file parts per upload (overrides FLIPBOOK_MAX_FILES)
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Clean up temporary state of failed uploads
    #[arg(long)]
    pub cleanup_on_failure: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse(), |key| env::var(key))
    }

    /// Merge parsed CLI args over values looked up by `lookup`, falling back to defaults.
    pub fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |key: &str| -> Result<Option<String>> {
            match lookup(key) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", key)),
            }
        };

        // --- Environment fallback ---
        let env_host = var("FLIPBOOK_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match var("FLIPBOOK_PORT")? {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing FLIPBOOK_PORT value `{}`", value))?,
            None => 3000,
        };
        let env_template = var("FLIPBOOK_TEMPLATE_DIR")?.unwrap_or_else(|| "./template".into());
        let env_output = var("FLIPBOOK_OUTPUT_DIR")?.unwrap_or_else(|| "./output".into());
        let env_uploads = var("FLIPBOOK_UPLOAD_DIR")?.unwrap_or_else(|| "./uploads".into());
        let env_static = var("FLIPBOOK_STATIC_DIR")?.unwrap_or_else(|| ".".into());
        let env_base_url =
            var("FLIPBOOK_PUBLIC_BASE_URL")?.unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.into());
        let env_origins = var("FLIPBOOK_ALLOWED_ORIGINS")?
            .map(|value| split_origins(&value))
            .unwrap_or_default();
        let env_max_files = match var("FLIPBOOK_MAX_FILES")? {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("parsing FLIPBOOK_MAX_FILES value `{}`", value))?,
            None => DEFAULT_MAX_FILES,
        };
        let env_cleanup = match var("FLIPBOOK_CLEANUP_ON_FAILURE")? {
            Some(value) => parse_flag(&value)
                .with_context(|| format!("parsing FLIPBOOK_CLEANUP_ON_FAILURE value `{}`", value))?,
            None => false,
        };

        // --- Merge ---
        let mut allowed_origins = if args.allowed_origins.is_empty() {
            env_origins
        } else {
            args.allowed_origins
        };
        if allowed_origins.is_empty() {
            allowed_origins.push("*".into());
        }

        let max_files = args.max_files.unwrap_or(env_max_files);
        if max_files == 0 {
            bail!("max files must be at least 1");
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            template_dir: args.template_dir.unwrap_or_else(|| env_template.into()),
            output_dir: args.output_dir.unwrap_or_else(|| env_output.into()),
            upload_dir: args.upload_dir.unwrap_or_else(|| env_uploads.into()),
            static_dir: args.static_dir.unwrap_or_else(|| env_static.into()),
            public_base_url: args.public_base_url.unwrap_or(env_base_url),
            allowed_origins,
            max_files,
            cleanup_on_failure: args.cleanup_on_failure || env_cleanup,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }
}

fn split_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got `{}`", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(
        vars: &[(&str, &str)],
    ) -> impl Fn(&str) -> Result<String, env::VarError> + use<> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_without_env_or_args() {
        let cfg = AppConfig::merge(Args::default(), lookup_from(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.template_dir, PathBuf::from("./template"));
        assert_eq!(cfg.output_dir, PathBuf::from("./output"));
        assert_eq!(cfg.max_files, 20);
        assert!(cfg.allows_any_origin());
        assert!(!cfg.cleanup_on_failure);
        assert_eq!(cfg.public_base_url, DEFAULT_PUBLIC_BASE_URL);
    }

    #[test]
    fn env_values_override_defaults() {
        let cfg = AppConfig::merge(
            Args::default(),
            lookup_from(&[
                ("FLIPBOOK_PORT", "8080"),
                ("FLIPBOOK_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
                ("FLIPBOOK_CLEANUP_ON_FAILURE", "yes"),
                ("FLIPBOOK_OUTPUT_DIR", "/srv/flipbooks"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(
            cfg.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(!cfg.allows_any_origin());
        assert!(cfg.cleanup_on_failure);
        assert_eq!(cfg.output_dir, PathBuf::from("/srv/flipbooks"));
    }

    #[test]
    fn args_take_precedence_over_env() {
        let args = Args {
            port: Some(9000),
            public_base_url: Some("http://localhost:9000".into()),
            allowed_origins: vec!["http://localhost:5173".into()],
            ..Args::default()
        };
        let cfg = AppConfig::merge(
            args,
            lookup_from(&[
                ("FLIPBOOK_PORT", "8080"),
                ("FLIPBOOK_ALLOWED_ORIGINS", "*"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.public_base_url, "http://localhost:9000");
        assert_eq!(cfg.allowed_origins, vec!["http://localhost:5173".to_string()]);
    }

    #[test]
    fn invalid_env_values_are_rejected() {
        let bad_port = AppConfig::merge(Args::default(), lookup_from(&[("FLIPBOOK_PORT", "http")]));
        assert!(bad_port.is_err());

        let bad_flag = AppConfig::merge(
            Args::default(),
            lookup_from(&[("FLIPBOOK_CLEANUP_ON_FAILURE", "maybe")]),
        );
        assert!(bad_flag.is_err());

        let zero_files =
            AppConfig::merge(Args::default(), lookup_from(&[("FLIPBOOK_MAX_FILES", "0")]));
        assert!(zero_files.is_err());
    }
}
