use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub index: IndexConfig,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Column names; when absent they are taken from the first row of the file.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub skip_lines: Option<u64>,
    #[serde(default)]
    pub every_nth: Option<u64>,
    #[serde(default)]
    pub regex_search: Option<String>,
    #[serde(default)]
    pub regex_replace: Option<String>,
    #[serde(default)]
    pub watch: WatchMode,
    #[serde(default = "default_event_timeout", with = "humantime_serde")]
    pub event_timeout: Duration,
    #[serde(default)]
    pub pad_short_rows: bool,
    #[serde(default = "default_null_text")]
    pub null_text: Option<String>,
}

fn default_delimiter() -> char {
    ','
}

fn default_event_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_null_text() -> Option<String> {
    Some("null".to_string())
}

impl SourceConfig {
    /// Leading lines to discard: the header row is skipped when columns are
    /// derived from it, unless an explicit count is configured.
    pub fn effective_skip_lines(&self) -> u64 {
        match (self.skip_lines, &self.columns) {
            (Some(n), _) => n,
            (None, Some(_)) => 0,
            (None, None) => 1,
        }
    }
}

/// Text encoding of the source file, written as a codec label such as `utf-8`,
/// `latin1` or `windows-1252`. A `-lossy` suffix replaces malformed sequences
/// instead of failing the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    codec: &'static encoding_rs::Encoding,
    lossy: bool,
}

const LOSSY_SUFFIX: &str = "-lossy";

impl Encoding {
    pub fn utf8() -> Self {
        Self {
            codec: encoding_rs::UTF_8,
            lossy: false,
        }
    }

    pub fn utf8_lossy() -> Self {
        Self {
            lossy: true,
            ..Self::utf8()
        }
    }

    pub fn from_label(label: &str) -> Result<Self, String> {
        let label = label.trim();
        let (name, lossy) = match label.strip_suffix(LOSSY_SUFFIX) {
            Some(name) => (name, true),
            None => (label, false),
        };

        let compact: String = name.chars().filter(|c| *c != '-' && *c != '_').collect();
        let codec = encoding_rs::Encoding::for_label(name.as_bytes())
            .or_else(|| encoding_rs::Encoding::for_label(compact.as_bytes()))
            .ok_or_else(|| format!("unknown encoding '{}'", label))?;

        // Lines are split on the newline byte before decoding.
        if !codec.is_ascii_compatible() {
            return Err(format!(
                "encoding '{}' is not supported: newlines are not single bytes",
                label
            ));
        }

        Ok(Self { codec, lossy })
    }

    pub fn codec(&self) -> &'static encoding_rs::Encoding {
        self.codec
    }

    pub fn is_lossy(&self) -> bool {
        self.lossy
    }

    pub fn label(&self) -> String {
        let name = self.codec.name().to_ascii_lowercase();
        if self.lossy {
            format!("{}{}", name, LOSSY_SUFFIX)
        } else {
            name
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Self::utf8()
    }
}

impl Serialize for Encoding {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for Encoding {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Encoding::from_label(&label).map_err(serde::de::Error::custom)
    }
}

/// How the source behaves once it reaches the end of the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchMode {
    /// Stop at end of file.
    Off,
    /// Block on file change notifications.
    #[default]
    Events,
    /// Sleep the interval and look again.
    Poll(Duration),
}

impl WatchMode {
    pub fn is_watching(&self) -> bool {
        !matches!(self, WatchMode::Off)
    }
}

impl Serialize for WatchMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            WatchMode::Off => serializer.serialize_str("off"),
            WatchMode::Events => serializer.serialize_str("events"),
            WatchMode::Poll(interval) => serializer.serialize_str(
                &humantime_serde::re::humantime::format_duration(*interval).to_string(),
            ),
        }
    }
}

impl<'de> Deserialize<'de> for WatchMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(false) | Raw::Seconds(0) => Ok(WatchMode::Off),
            Raw::Flag(true) => Ok(WatchMode::Events),
            Raw::Seconds(secs) => Ok(WatchMode::Poll(Duration::from_secs(secs))),
            Raw::Text(text) => parse_watch_mode(&text).map_err(serde::de::Error::custom),
        }
    }
}

pub fn parse_watch_mode(text: &str) -> Result<WatchMode, String> {
    match text.trim().to_ascii_lowercase().as_str() {
        "off" | "no" | "false" | "0" => Ok(WatchMode::Off),
        "events" | "inotify" | "notify" => Ok(WatchMode::Events),
        other => {
            if let Ok(secs) = other.parse::<u64>() {
                return Ok(WatchMode::Poll(Duration::from_secs(secs)));
            }
            humantime_serde::re::humantime::parse_duration(other)
                .map(WatchMode::Poll)
                .map_err(|e| format!("invalid watch mode '{}': {}", text, e))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Defaults to `<source path>.index`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub date_column: Option<String>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default)]
    pub identifier_column: Option<String>,
}

fn default_date_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: None,
            date_column: None,
            date_format: default_date_format(),
            identifier_column: None,
        }
    }
}

impl IndexConfig {
    pub fn index_path(&self, source_path: &Path) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => {
                let mut name = source_path.as_os_str().to_os_string();
                name.push(".index");
                PathBuf::from(name)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// DuckDB database path, or `:memory:`.
    pub connection: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    pub offset_column: String,
    #[serde(default)]
    pub line_column: Option<String>,
    #[serde(default)]
    pub server_name_column: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default = "default_rows_per_commit")]
    pub rows_per_commit: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default, with = "humantime_serde")]
    pub commit_delay: Duration,
}

fn default_rows_per_commit() -> usize {
    1000
}

fn default_workers() -> usize {
    1
}

impl SinkConfig {
    /// Value written to the server-identity column, falling back to the host name.
    pub fn server_identity(&self) -> Option<String> {
        self.server_name_column.as_ref()?;
        match &self.server_name {
            Some(name) => Some(name.clone()),
            None => Some(
                hostname::get()
                    .map(|h| h.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| "localhost".to_string()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_mode_variants() {
        assert_eq!(parse_watch_mode("no").unwrap(), WatchMode::Off);
        assert_eq!(parse_watch_mode("inotify").unwrap(), WatchMode::Events);
        assert_eq!(
            parse_watch_mode("5").unwrap(),
            WatchMode::Poll(Duration::from_secs(5))
        );
        assert_eq!(
            parse_watch_mode("250ms").unwrap(),
            WatchMode::Poll(Duration::from_millis(250))
        );
        assert!(parse_watch_mode("sometimes").is_err());
    }

    #[test]
    fn test_watch_mode_from_yaml() {
        let off: WatchMode = serde_yaml::from_str("false").unwrap();
        assert_eq!(off, WatchMode::Off);
        let poll: WatchMode = serde_yaml::from_str("3").unwrap();
        assert_eq!(poll, WatchMode::Poll(Duration::from_secs(3)));
        let events: WatchMode = serde_yaml::from_str("events").unwrap();
        assert_eq!(events, WatchMode::Events);
    }

    #[test]
    fn test_encoding_labels() {
        assert_eq!(Encoding::from_label("utf8").unwrap(), Encoding::utf8());
        assert_eq!(Encoding::from_label("utf-8-lossy").unwrap(), Encoding::utf8_lossy());

        let latin = Encoding::from_label("latin-1").unwrap();
        assert_eq!(latin.codec(), encoding_rs::WINDOWS_1252);
        assert!(!latin.is_lossy());
        assert_eq!(latin.label(), "windows-1252");

        assert!(Encoding::from_label("utf-16le").is_err());
        assert!(Encoding::from_label("klingon").is_err());
    }

    #[test]
    fn test_encoding_from_yaml() {
        let encoding: Encoding = serde_yaml::from_str("cp1252-lossy").unwrap();
        assert_eq!(encoding.codec(), encoding_rs::WINDOWS_1252);
        assert!(encoding.is_lossy());
        assert_eq!(serde_yaml::to_string(&encoding).unwrap().trim(), "windows-1252-lossy");
    }

    #[test]
    fn test_effective_skip_lines() {
        let mut source: SourceConfig = serde_yaml::from_str("path: /tmp/x.csv").unwrap();
        assert_eq!(source.effective_skip_lines(), 1);
        source.columns = Some(vec!["a".into()]);
        assert_eq!(source.effective_skip_lines(), 0);
        source.skip_lines = Some(3);
        assert_eq!(source.effective_skip_lines(), 3);
    }

    #[test]
    fn test_index_path_default() {
        let index = IndexConfig::default();
        assert_eq!(
            index.index_path(Path::new("/var/log/app.csv")),
            PathBuf::from("/var/log/app.csv.index")
        );
    }

    #[test]
    fn test_server_identity_only_with_column() {
        let mut sink: SinkConfig =
            serde_yaml::from_str("connection: ':memory:'\ntable: t\noffset_column: o").unwrap();
        assert_eq!(sink.server_identity(), None);
        sink.server_name_column = Some("host".into());
        sink.server_name = Some("web-1".into());
        assert_eq!(sink.server_identity().as_deref(), Some("web-1"));
    }
}
