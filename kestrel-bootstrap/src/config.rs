use std::{
    collections::{BTreeMap, HashMap},
    env,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use config::{ConfigError, File, ValueKind};
use serde::Deserialize;

static DEFAULT_CONFIG_FOLDER: LazyLock<PathBuf> = LazyLock::new(|| {
    if let Ok(dir) = env::var("KESTREL_CONFIG") {
        return PathBuf::from(dir);
    }
    let mut root_path = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            // fall back to the working directory if the executable path is unknown
            let mut current_exe = env::current_exe().unwrap_or_default();
            current_exe.pop();
            current_exe
        }
    };
    root_path.push("etc");
    root_path
});

/// Config is the configuration of the application.
///
/// It is loaded from the optional `config.toml` file in the `etc` folder and
/// then overridden by environment variables.
///
/// # Example
/// ```no_run
/// use kestrel_bootstrap::config::Config;
/// use kestrel_bootstrap::telemetry::TelemetryConfig;
/// let config = Config::load(Some("KESTREL"), "__").unwrap();
/// let telemetry = config.get::<TelemetryConfig>().unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    inner: config::Config,
}

impl Config {
    pub fn new(inner: config::Config) -> Self {
        Self { inner }
    }

    pub fn load(
        env_config_prefix: Option<&str>,
        env_config_split: &str,
    ) -> Result<Self, ConfigError> {
        Self::from_folder(
            DEFAULT_CONFIG_FOLDER.as_path(),
            env_config_prefix,
            env_config_split,
        )
    }

    pub fn from_folder(
        path: &Path,
        env_config_prefix: Option<&str>,
        env_config_split: &str,
    ) -> Result<Self, ConfigError> {
        let cfg = path.join("config.toml");
        let mut builder = config::Config::builder();

        if cfg.exists() {
            builder = builder.add_source(File::from(cfg))
        } else {
            tracing::warn!("not found config `{}`", cfg.display());
        }
        // add environment variables to config
        if let Some(prefix) = env_config_prefix {
            builder = builder
                .add_source(config::Environment::with_prefix(prefix).separator(env_config_split));
        } else {
            builder =
                builder.add_source(config::Environment::default().separator(env_config_split));
        }
        let config = builder.build()?;

        Ok(Self { inner: config })
    }

    /// Reads the section named by `T::PREFIX`.
    ///
    /// A missing section deserializes from an empty table, so types with
    /// `#[serde(default)]` get their defaults.
    pub fn get<'de, T>(&self) -> Result<T, ConfigError>
    where
        T: ConfigPrefix + Deserialize<'de>,
    {
        match self.inner.get::<T>(T::PREFIX) {
            Ok(o) => Ok(o),
            Err(e) => {
                let ConfigError::NotFound(_) = &e else {
                    return Err(e);
                };
                let v = config::Value::new(None, ValueKind::Table(Default::default()));

                match T::deserialize(v) {
                    Ok(o) => Ok(o),
                    Err(_) => Err(e),
                }
            }
        }
    }

    pub fn to_properties(&self) -> Result<Properties, ConfigError> {
        Properties::from_config(self)
    }
}

/// ConfigPrefix names the table a typed section is read from.
///
/// # Example
/// ```
/// use kestrel_bootstrap::config::ConfigPrefix;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct PortConfig {
///     port: u16,
/// }
/// impl ConfigPrefix for PortConfig {
///     const PREFIX: &'static str = "port";
/// }
/// ```
pub trait ConfigPrefix {
    const PREFIX: &'static str;
}

/// Flattened `key = value` view of a [`Config`].
///
/// Nested tables join their keys with `.` and array items are indexed as
/// `key[n]`, so every leaf value gets its own line.
pub struct Properties {
    properties: BTreeMap<String, String>,
}

impl Properties {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let root: HashMap<String, config::Value> = config.inner.clone().try_deserialize()?;
        let mut properties = BTreeMap::new();
        for (key, value) in &root {
            Self::collect(key.clone(), value, &mut properties);
        }
        Ok(Self { properties })
    }

    fn collect(key: String, value: &config::Value, properties: &mut BTreeMap<String, String>) {
        let leaf = match &value.kind {
            ValueKind::Table(table) => {
                for (child, nested) in table {
                    Self::collect(format!("{key}.{child}"), nested, properties);
                }
                return;
            }
            ValueKind::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    Self::collect(format!("{key}[{index}]"), item, properties);
                }
                return;
            }
            ValueKind::Float(f) => format!("{f:.2}"),
            ValueKind::Nil => "Null".to_string(),
            _ => value.to_string(),
        };
        properties.insert(key, leaf);
    }

    /// `key = value` lines sorted by key.
    pub fn to_lines(&self) -> Vec<String> {
        self.properties
            .iter()
            .map(|(key, value)| format!("{key} = {value}"))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use rstest::{fixture, rstest};

    fn from_toml(toml: &str) -> Config {
        let inner = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap();
        Config::new(inner)
    }

    #[fixture]
    fn nested() -> Config {
        from_toml(
            r#"
            name = "kestrel"
            [server]
            port = 8080
            ratio = 0.5
            [[server.hosts]]
            addr = "a"
            [[server.hosts]]
            addr = "b"
            "#,
        )
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct Section {
        enabled: bool,
        retries: u32,
    }

    impl Default for Section {
        fn default() -> Self {
            Self {
                enabled: true,
                retries: 3,
            }
        }
    }

    impl ConfigPrefix for Section {
        const PREFIX: &'static str = "section";
    }

    #[rstest]
    fn flattens_tables_and_arrays(nested: Config) {
        let properties = nested.to_properties().unwrap();
        assert_eq!(properties.get("name"), Some("kestrel"));
        assert_eq!(properties.get("server.port"), Some("8080"));
        assert_eq!(properties.get("server.ratio"), Some("0.50"));
        assert_eq!(properties.get("server.hosts[0].addr"), Some("a"));
        assert_eq!(properties.get("server.hosts[1].addr"), Some("b"));
        assert_eq!(properties.get("server.hosts"), None);
    }

    #[rstest]
    fn lines_are_sorted(nested: Config) {
        assert_eq!(
            nested.to_properties().unwrap().to_lines(),
            [
                "name = kestrel",
                "server.hosts[0].addr = a",
                "server.hosts[1].addr = b",
                "server.port = 8080",
                "server.ratio = 0.50",
            ]
        );
    }

    #[test]
    fn missing_section_uses_defaults() {
        let config = from_toml("other = 1");
        assert_eq!(config.get::<Section>().unwrap(), Section::default());
    }

    #[test]
    fn present_section_overrides_defaults() {
        let config = from_toml("[section]\nretries = 5");
        assert_eq!(
            config.get::<Section>().unwrap(),
            Section {
                enabled: true,
                retries: 5
            }
        );
    }

    #[test]
    fn missing_folder_yields_empty_config() {
        let config = Config::from_folder(
            Path::new("/nonexistent/kestrel"),
            Some("KESTREL_TEST_UNSET"),
            "__",
        )
        .unwrap();
        assert_eq!(config.get::<Section>().unwrap(), Section::default());
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = env::temp_dir().join(format!("kestrel-config-env-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.toml"),
            "[section]\nenabled = true\nretries = 1\n",
        )
        .unwrap();
        // SAFETY: the variable name is unique to this test.
        unsafe { env::set_var("KESTRELCFGENV__SECTION__RETRIES", "9") };

        let config = Config::from_folder(&dir, Some("KESTRELCFGENV"), "__").unwrap();

        unsafe { env::remove_var("KESTRELCFGENV__SECTION__RETRIES") };
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(
            config.get::<Section>().unwrap(),
            Section {
                enabled: true,
                retries: 9
            }
        );
        assert_eq!(
            config.to_properties().unwrap().to_lines(),
            ["section.enabled = true", "section.retries = 9"]
        );
    }
}
