use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Build profile handed to the cross-compilation toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Debug,
    Release,
}

impl Profile {
    /// Directory name the toolchain uses under the build output root.
    pub fn subdir(&self) -> &'static str {
        match self {
            Profile::Debug => "debug",
            Profile::Release => "release",
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Profile::Release
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subdir())
    }
}

fn default_build_command() -> String {
    "cargo".to_string()
}

fn default_target() -> String {
    "thumbv7m-none-eabi".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Build tool invoked for the compile stage.
    #[serde(default = "default_build_command")]
    pub command: String,
    /// Cross-compilation target triple.
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub profile: Profile,
    /// Name of the binary artifact the build produces.
    #[serde(default)]
    pub project_name: String,
    /// Directory the build tool runs in (defaults to the current directory).
    #[serde(default)]
    pub project_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            target: default_target(),
            profile: Profile::default(),
            project_name: String::new(),
            project_dir: None,
        }
    }
}

impl BuildConfig {
    /// Deterministic artifact location:
    /// `<build_root>/<target-triple>/<profile>/<project-name>`.
    pub fn artifact_path(&self, build_root: &Path) -> PathBuf {
        build_root
            .join(&self.target)
            .join(self.profile.subdir())
            .join(&self.project_name)
    }
}

fn default_true() -> bool {
    true
}

fn default_semihosting_target() -> String {
    "native".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SemihostingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Who services semihosting calls: "native", "gdb", or "auto".
    #[serde(default = "default_semihosting_target")]
    pub target: String,
}

impl Default for SemihostingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target: default_semihosting_target(),
        }
    }
}

impl SemihostingConfig {
    /// Value for the emulator's `-semihosting-config` flag.
    pub fn config_arg(&self) -> String {
        format!(
            "enable={},target={}",
            if self.enabled { "on" } else { "off" },
            self.target
        )
    }
}

fn default_emulator_command() -> String {
    "qemu-system-arm".to_string()
}

fn default_cpu() -> String {
    "cortex-m3".to_string()
}

fn default_machine() -> String {
    "lm3s6965evb".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EmulatorConfig {
    /// Emulator binary invoked for the launch stage.
    #[serde(default = "default_emulator_command")]
    pub command: String,
    #[serde(default = "default_cpu")]
    pub cpu: String,
    #[serde(default = "default_machine")]
    pub machine: String,
    /// Graphical output; off means `-nographic`.
    #[serde(default)]
    pub graphics: bool,
    #[serde(default)]
    pub semihosting: SemihostingConfig,
    /// Optional flash capacity, e.g. "256 KiB". The kernel image must fit.
    #[serde(default)]
    pub flash_limit: Option<String>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            command: default_emulator_command(),
            cpu: default_cpu(),
            machine: default_machine(),
            graphics: false,
            semihosting: SemihostingConfig::default(),
            flash_limit: None,
        }
    }
}

impl EmulatorConfig {
    pub fn flash_limit_bytes(&self) -> Result<Option<u64>> {
        self.flash_limit
            .as_deref()
            .map(|s| parse_size(s).with_context(|| format!("invalid flash_limit '{s}'")))
            .transpose()
    }
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

/// On-disk pipeline description (YAML). Every field has a sensible default,
/// so a manifest only needs to state what differs from the stock
/// Cortex-M3 / lm3s6965evb setup.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PipelineManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

impl Default for PipelineManifest {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            name: None,
            build: BuildConfig::default(),
            emulator: EmulatorConfig::default(),
        }
    }
}

impl PipelineManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open pipeline manifest at {:?}", path.as_ref()))?;
        let manifest: Self =
            serde_yaml::from_reader(f).context("Failed to parse pipeline manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if self.build.command.trim().is_empty() {
            anyhow::bail!("Build 'command' cannot be empty");
        }
        if self.build.target.trim().is_empty() {
            anyhow::bail!("Build 'target' cannot be empty");
        }
        if self.emulator.command.trim().is_empty() {
            anyhow::bail!("Emulator 'command' cannot be empty");
        }
        if self.emulator.cpu.trim().is_empty() {
            anyhow::bail!("Emulator 'cpu' cannot be empty");
        }
        if self.emulator.machine.trim().is_empty() {
            anyhow::bail!("Emulator 'machine' cannot be empty");
        }

        match self.emulator.semihosting.target.as_str() {
            "native" | "gdb" | "auto" => {}
            other => anyhow::bail!(
                "Unknown semihosting target '{other}'. Supported: native, gdb, auto"
            ),
        }

        self.emulator.flash_limit_bytes()?;

        Ok(())
    }
}

/// Parse a size string: either a plain byte count ("262144") or a
/// human-readable size ("256 KiB").
pub fn parse_size(size_str: &str) -> Result<u64> {
    let trimmed = size_str.trim();
    if let Ok(bytes) = trimmed.parse::<u64>() {
        return Ok(bytes);
    }

    use human_size::{Byte, Size, SpecificSize};
    let s: Size = trimmed
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_manifest() {
        let yaml = r#"
schema_version: "1.0"
name: "embedded demo"
build:
  target: "thumbv7m-none-eabi"
  profile: release
  project_name: "embedded"
emulator:
  cpu: "cortex-m3"
  machine: "lm3s6965evb"
  flash_limit: "256 KiB"
"#;
        let manifest: PipelineManifest = serde_yaml::from_str(yaml).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.build.project_name, "embedded");
        assert_eq!(manifest.build.command, "cargo");
        assert_eq!(manifest.emulator.command, "qemu-system-arm");
        assert_eq!(
            manifest.emulator.flash_limit_bytes().unwrap(),
            Some(256 * 1024)
        );
    }

    #[test]
    fn test_minimal_manifest_defaults() {
        let yaml = r#"
schema_version: "1.0"
"#;
        let manifest: PipelineManifest = serde_yaml::from_str(yaml).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.build.target, "thumbv7m-none-eabi");
        assert_eq!(manifest.build.profile, Profile::Release);
        assert_eq!(manifest.emulator.cpu, "cortex-m3");
        assert_eq!(manifest.emulator.machine, "lm3s6965evb");
        assert!(!manifest.emulator.graphics);
        assert!(manifest.emulator.semihosting.enabled);
        assert_eq!(manifest.emulator.semihosting.target, "native");
        assert!(manifest.build.project_name.is_empty());
    }

    #[test]
    fn test_invalid_version() {
        let yaml = r#"
schema_version: "2.0"
"#;
        let manifest: PipelineManifest = serde_yaml::from_str(yaml).unwrap();
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn test_unknown_semihosting_target() {
        let yaml = r#"
schema_version: "1.0"
emulator:
  semihosting:
    target: "serial"
"#;
        let manifest: PipelineManifest = serde_yaml::from_str(yaml).unwrap();
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("semihosting target"));
    }

    #[test]
    fn test_bad_flash_limit() {
        let yaml = r#"
schema_version: "1.0"
emulator:
  flash_limit: "lots"
"#;
        let manifest: PipelineManifest = serde_yaml::from_str(yaml).unwrap();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_artifact_path() {
        let build = BuildConfig {
            project_name: "embedded".to_string(),
            ..BuildConfig::default()
        };
        assert_eq!(
            build.artifact_path(Path::new("target")),
            PathBuf::from("target/thumbv7m-none-eabi/release/embedded")
        );
    }

    #[test]
    fn test_artifact_path_debug_profile() {
        let build = BuildConfig {
            project_name: "embedded".to_string(),
            profile: Profile::Debug,
            ..BuildConfig::default()
        };
        assert_eq!(
            build.artifact_path(Path::new("out")),
            PathBuf::from("out/thumbv7m-none-eabi/debug/embedded")
        );
    }

    #[test]
    fn test_semihosting_arg() {
        assert_eq!(
            SemihostingConfig::default().config_arg(),
            "enable=on,target=native"
        );
    }

    #[test]
    fn test_parse_size_plain_bytes() {
        assert_eq!(parse_size("262144").unwrap(), 262144);
    }

    #[test]
    fn test_parse_size_human_readable() {
        assert_eq!(parse_size("256 KiB").unwrap(), 262144);
    }

    #[test]
    fn test_parse_size_invalid() {
        assert!(parse_size("garbage").is_err());
    }
}
