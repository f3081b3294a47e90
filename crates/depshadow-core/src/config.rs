//! Optional config from .depshadowrc or ~/.depshadowrc (JSON), plus NuGet.Config
//! source discovery. CLI flags override both.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::registry::is_url;
use crate::xml::{parse_document, Element};

const RC_FILE: &str = ".depshadowrc";
const NUGET_CONFIG_NAMES: &[&str] = &["NuGet.Config", "nuget.config", "NuGet.config"];

/// Optional config from file. CLI and env override these.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub public_packages_source: Option<String>,
    pub anonymize: Option<bool>,
    pub concurrency: Option<usize>,
    pub sources: Vec<String>,
}

/// Load config from .depshadowrc in dir, then ~/.depshadowrc. Missing or invalid file = default.
pub fn load_config(dir: &Path) -> Config {
    let mut candidates = vec![dir.join(RC_FILE)];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(RC_FILE));
    }
    for path in &candidates {
        if path.is_file() {
            match std::fs::read_to_string(path) {
                Ok(text) => return parse_config(&text).unwrap_or_else(|| {
                    warn!(path = %path.display(), "ignoring invalid config file");
                    Config::default()
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "cannot read config file"),
            }
            break;
        }
    }
    Config::default()
}

fn parse_config(text: &str) -> Option<Config> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;
    let v = v.as_object()?;
    let mut cfg = Config::default();
    if let Some(s) = v.get("publicPackagesSource").and_then(|x| x.as_str()) {
        cfg.public_packages_source = Some(s.to_string());
    }
    if let Some(a) = v.get("anonymize").and_then(|x| x.as_bool()) {
        cfg.anonymize = Some(a);
    }
    if let Some(c) = v.get("concurrency").and_then(|x| x.as_u64()) {
        cfg.concurrency = usize::try_from(c).ok().filter(|c| *c > 0);
    }
    if let Some(sources) = v.get("sources").and_then(|x| x.as_array()) {
        cfg.sources = sources
            .iter()
            .filter_map(|s| s.as_str())
            .map(str::to_string)
            .collect();
    }
    Some(cfg)
}

/// Fan-out for registry lookups and project loading: `DEPSHADOW_CONCURRENCY`,
/// else four per core within `[4, 64]`.
pub fn default_concurrency() -> usize {
    if let Some(n) = std::env::var("DEPSHADOW_CONCURRENCY")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
    {
        return n;
    }
    (num_cpus::get() * 4).clamp(4, 64)
}

/// The user-level NuGet.Config, where the dotnet toolchain keeps it.
pub fn user_nuget_config() -> Option<PathBuf> {
    if cfg!(windows) {
        dirs::config_dir().map(|d| d.join("NuGet").join("NuGet.Config"))
    } else {
        dirs::home_dir().map(|h| h.join(".nuget").join("NuGet").join("NuGet.Config"))
    }
}

/// Enabled package sources visible from `start_dir`: every NuGet.Config from
/// the directory upward, then the user-level file. Closer files win, and a
/// `<clear/>` drops everything declared further out.
pub fn discover_package_sources(start_dir: &Path) -> Vec<String> {
    discover_package_sources_with(start_dir, user_nuget_config().as_deref())
}

pub fn discover_package_sources_with(start_dir: &Path, user_config: Option<&Path>) -> Vec<String> {
    let mut files = Vec::new();
    let mut dir = Some(start_dir);
    while let Some(current) = dir {
        if let Some(found) = NUGET_CONFIG_NAMES
            .iter()
            .map(|name| current.join(name))
            .find(|p| p.is_file())
        {
            files.push(found);
        }
        dir = current.parent();
    }
    if let Some(user) = user_config.filter(|p| p.is_file()) {
        if !files.iter().any(|f| f == user) {
            files.push(user.to_path_buf());
        }
    }

    let mut sources = NuGetSources::default();
    for path in files.iter().rev() {
        if let Err(e) = sources.apply_file(path) {
            warn!(error = %e, "skipping NuGet.Config");
        }
    }
    sources.enabled()
}

#[derive(Default)]
struct NuGetSources {
    entries: Vec<(String, String)>,
    disabled: Vec<String>,
}

impl NuGetSources {
    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io("read NuGet.Config", path, e))?;
        let root = parse_document(&text, Some(path))?;
        if !root.is("configuration") {
            return Err(Error::Config {
                path: path.to_path_buf(),
                message: "root element is not <configuration>".to_string(),
            });
        }
        let base = path.parent().unwrap_or(Path::new(""));
        debug!(path = %path.display(), "reading package sources");

        if let Some(section) = root.child("packageSources") {
            for entry in &section.children {
                if entry.is("clear") {
                    self.entries.clear();
                } else if let Some((key, value)) = add_entry(entry) {
                    let location = resolve_location(value, base);
                    self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
                    self.entries.push((key.to_string(), location));
                } else if entry.is("remove") {
                    if let Some(key) = entry.attr("key") {
                        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
                    }
                }
            }
        }
        if let Some(section) = root.child("disabledPackageSources") {
            for entry in &section.children {
                if entry.is("clear") {
                    self.disabled.clear();
                } else if let Some((key, value)) = add_entry(entry) {
                    self.disabled.retain(|k| !k.eq_ignore_ascii_case(key));
                    if value.trim().eq_ignore_ascii_case("true") {
                        self.disabled.push(key.to_string());
                    }
                }
            }
        }
        Ok(())
    }

    fn enabled(self) -> Vec<String> {
        let disabled = self.disabled;
        self.entries
            .into_iter()
            .filter(|(key, _)| !disabled.iter().any(|d| d.eq_ignore_ascii_case(key)))
            .map(|(_, location)| location)
            .collect()
    }
}

fn add_entry(element: &Element) -> Option<(&str, &str)> {
    if !element.is("add") {
        return None;
    }
    Some((element.attr("key")?, element.attr("value")?))
}

/// URLs and absolute paths pass through; relative folder feeds resolve
/// against the config file's directory.
fn resolve_location(value: &str, base: &Path) -> String {
    let value = value.trim();
    if is_url(value) || Path::new(value).is_absolute() {
        return value.to_string();
    }
    base.join(value).to_string_lossy().into_owned()
}
