//! Player configuration.
//!
//! Built-in defaults, overridden by an optional TOML file (`SIGNAGE_CONFIG`,
//! default `signage.toml`), overridden by `SIGNAGE_*` environment variables
//! (`__` separates nested keys, e.g. `SIGNAGE_SLIDE_SECONDS=15`).

use crate::daykey::DayKey;
use crate::engine::Timing;
use crate::media::CandidateSet;
use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "signage.toml";

/// Candidate filenames as written in the configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CandidateConfig {
    /// Played every day.
    pub always: Vec<String>,
    /// Played only on their day.
    pub days: BTreeMap<DayKey, Vec<String>>,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        let always = (1..=5).map(|n| format!("every{}.jpg", n)).collect();
        let days = DayKey::ALL
            .iter()
            .map(|day| {
                let files = (1..=3).map(|n| format!("{}{}.jpg", day, n)).collect();
                (*day, files)
            })
            .collect();
        Self { always, days }
    }
}

impl CandidateConfig {
    pub fn candidate_set(&self) -> CandidateSet {
        CandidateSet::new(self.always.as_slice(), &self.days)
    }
}

/// All player settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `http(s)` URL or directory the candidate files are resolved against.
    pub media_base: String,
    /// IANA timezone that decides the day key and midnight.
    pub timezone: String,
    pub slide_seconds: u64,
    pub video_failsafe_seconds: u64,
    /// Crossfade length used by the display surface.
    pub fade_ms: u64,
    pub midnight_floor_seconds: u64,
    /// Upper bound on preparing one slide before it is skipped.
    pub preload_timeout_seconds: u64,
    /// Budget for decoded images and spooled videos.
    pub prepared_cache_mb: u64,
    /// Directory remote videos are downloaded to. System temp dir if unset.
    pub spool_dir: Option<String>,
    pub probe_timeout_seconds: u64,
    /// Append a per-boot `?v=` token to media URLs.
    pub cache_bust: bool,
    pub candidates: CandidateConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            media_base: "http://localhost:8080/".to_string(),
            timezone: "America/Toronto".to_string(),
            slide_seconds: 10,
            video_failsafe_seconds: 60,
            fade_ms: 900,
            midnight_floor_seconds: 5,
            preload_timeout_seconds: 60,
            prepared_cache_mb: 256,
            spool_dir: None,
            probe_timeout_seconds: 5,
            cache_bust: true,
            candidates: CandidateConfig::default(),
        }
    }
}

impl Settings {
    /// Load from the file named by `SIGNAGE_CONFIG` and the environment.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("SIGNAGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("SIGNAGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        tracing::debug!("Configuration loaded from {} (if present)", path);
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        self.tz()?;
        if self.slide_seconds == 0 {
            anyhow::bail!("slide_seconds must be greater than zero");
        }
        if self.video_failsafe_seconds == 0 {
            anyhow::bail!("video_failsafe_seconds must be greater than zero");
        }
        if self.preload_timeout_seconds == 0 {
            anyhow::bail!("preload_timeout_seconds must be greater than zero");
        }
        Ok(())
    }

    /// Parsed reference timezone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone {}: {}", self.timezone, e))
    }

    pub fn timing(&self) -> Timing {
        Timing {
            slide: Duration::from_secs(self.slide_seconds),
            video_failsafe: Duration::from_secs(self.video_failsafe_seconds),
            preload: Duration::from_secs(self.preload_timeout_seconds),
        }
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn midnight_floor(&self) -> Duration {
        Duration::from_secs(self.midnight_floor_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    #[cfg_attr(not(feature = "display"), allow(dead_code))]
    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_content() {
        let settings = Settings::default();
        assert_eq!(settings.timing().slide, Duration::from_secs(10));
        assert_eq!(settings.timing().video_failsafe, Duration::from_secs(60));
        assert_eq!(settings.timing().preload, Duration::from_secs(60));
        assert_eq!(settings.spool_dir(), std::env::temp_dir());
        assert_eq!(settings.tz().unwrap(), chrono_tz::America::Toronto);

        let set = settings.candidates.candidate_set();
        let friday: Vec<_> = set.for_day(DayKey::Fri).map(|i| i.path().to_string()).collect();
        assert_eq!(
            friday,
            vec![
                "every1.jpg",
                "every2.jpg",
                "every3.jpg",
                "every4.jpg",
                "every5.jpg",
                "fri1.jpg",
                "fri2.jpg",
                "fri3.jpg"
            ]
        );
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signage.toml");
        std::fs::write(
            &path,
            r#"
media_base = "/srv/signage"
timezone = "Europe/Paris"
slide_seconds = 15
preload_timeout_seconds = 20
spool_dir = "/var/cache/signage"

[candidates]
always = ["welcome.jpg", "promo.mp4"]

[candidates.days]
mon = ["menu-monday.jpg"]
saturday = ["brunch.mp4"]
"#,
        )
        .unwrap();

        let settings = Settings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.media_base, "/srv/signage");
        assert_eq!(settings.tz().unwrap(), chrono_tz::Europe::Paris);
        assert_eq!(settings.slide_seconds, 15);
        assert_eq!(settings.video_failsafe_seconds, 60);
        assert_eq!(settings.timing().preload, Duration::from_secs(20));
        assert_eq!(settings.spool_dir(), PathBuf::from("/var/cache/signage"));

        let set = settings.candidates.candidate_set();
        let saturday: Vec<_> = set.for_day(DayKey::Sat).map(|i| i.path()).collect();
        assert_eq!(saturday, vec!["welcome.jpg", "promo.mp4", "brunch.mp4"]);
        let sunday: Vec<_> = set.for_day(DayKey::Sun).map(|i| i.path()).collect();
        assert_eq!(sunday, vec!["welcome.jpg", "promo.mp4"]);
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let settings = Settings {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_slide_duration() {
        let settings = Settings {
            slide_seconds: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
