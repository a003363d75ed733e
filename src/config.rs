//! Configuration: tuning parameters, validated detection config, and the
//! read-only JSON file adapter used by the binary.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::capture::Region;
use crate::error::ConfigurationError;
use crate::input::Keybind;
use crate::matcher::{MatchMethod, ThresholdPolicy};
use crate::state::{CastingParams, CooldownScope};
use crate::templates::{Template, TemplateSet, TemplateStore};

/// Accepted detection frequencies, in Hz
pub const MIN_FREQUENCY_HZ: f64 = 0.01;
pub const MAX_FREQUENCY_HZ: f64 = 1000.0;

/// Interval used when the frequency cannot be turned into one
const FALLBACK_INTERVAL: Duration = Duration::from_millis(100);

/// Detection tuning, supplied externally and read-only during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Ticks per second
    pub frequency_hz: f64,

    /// Minimum confidence any template needs, regardless of its own threshold
    pub confidence_floor: f32,

    /// Similarity measure; read once when the binary starts
    pub match_method: MatchMethod,

    /// Per-template threshold overrides by name
    pub overrides: HashMap<String, f32>,

    /// Suppression window after an actuation
    pub cooldown_ms: u64,

    pub cooldown_scope: CooldownScope,

    /// Allow the same template to fire twice in a row
    pub repeat_cast: bool,

    /// Consecutive winning ticks before a template qualifies
    pub stable_ticks: u32,

    /// Minimum gap between two simulated key presses
    pub min_press_interval_ms: u64,

    /// Consecutive capture failures tolerated before detection halts
    pub max_capture_failures: u32,

    /// Only capture while this window (title substring) is not minimized
    pub target_window: Option<String>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            frequency_hz: 10.0,
            confidence_floor: 0.0,
            match_method: MatchMethod::Zncc,
            overrides: HashMap::new(),
            cooldown_ms: 500,
            cooldown_scope: CooldownScope::Global,
            repeat_cast: true,
            stable_ticks: 1,
            min_press_interval_ms: 50,
            max_capture_failures: 50,
            target_window: None,
        }
    }
}

impl Tuning {
    /// Tick interval; only meaningful for a validated frequency
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.frequency_hz).unwrap_or(FALLBACK_INTERVAL)
    }

    pub fn casting_params(&self) -> CastingParams {
        CastingParams {
            cooldown: Duration::from_millis(self.cooldown_ms),
            scope: self.cooldown_scope,
            repeat_cast: self.repeat_cast,
            stable_ticks: self.stable_ticks.max(1),
        }
    }

    pub fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(self.confidence_floor, self.overrides.clone())
    }
}

/// Everything except the templates: region, keybinds, tuning
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub region: Region,
    pub keybinds: Vec<Keybind>,
    pub tuning: Tuning,
}

impl DetectionSettings {
    pub fn new(region: Region, keybinds: Vec<Keybind>, tuning: Tuning) -> Self {
        Self {
            region,
            keybinds,
            tuning,
        }
    }
}

/// Immutable, validated configuration handed to the detection loop as a unit
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    region: Region,
    templates: TemplateSet,
    keybinds: Vec<Keybind>,
    tuning: Tuning,
}

fn check_unit_range(name: &str, value: f32) -> Result<(), ConfigurationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigurationError::ThresholdOutOfRange {
            name: name.to_string(),
            value,
        })
    }
}

impl ResolvedConfig {
    /// Validate a template snapshot against settings.
    ///
    /// `displays` are the attached display rectangles; when empty only the
    /// region's size is checked.
    pub fn resolve(
        templates: TemplateSet,
        settings: &DetectionSettings,
        displays: &[Region],
    ) -> Result<Self, ConfigurationError> {
        let tuning = &settings.tuning;
        let region = settings.region;

        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&tuning.frequency_hz) {
            return Err(ConfigurationError::InvalidFrequency(tuning.frequency_hz));
        }

        if region.is_empty() {
            return Err(ConfigurationError::EmptyRegion(region));
        }
        if !displays.is_empty() && !displays.iter().any(|d| d.contains(&region)) {
            return Err(ConfigurationError::RegionOutOfBounds(region));
        }

        if templates.is_empty() {
            return Err(ConfigurationError::NoTemplates);
        }

        let mut names = HashSet::new();
        for template in templates.iter() {
            if !names.insert(template.name()) {
                return Err(ConfigurationError::DuplicateTemplate(template.name().to_string()));
            }
            check_unit_range(template.name(), template.threshold())?;
            template.check_fits(&region)?;
        }

        check_unit_range("confidence_floor", tuning.confidence_floor)?;
        for (name, value) in &tuning.overrides {
            check_unit_range(name, *value)?;
            if !names.contains(name.as_str()) {
                tracing::warn!("Threshold override for unknown template '{}' is ignored", name);
            }
        }

        let mut bound = HashSet::new();
        for keybind in &settings.keybinds {
            if !names.contains(keybind.template.as_str()) {
                return Err(ConfigurationError::UnknownTemplate(keybind.template.clone()));
            }
            if !bound.insert(keybind.template.as_str()) {
                return Err(ConfigurationError::DuplicateKeybind(keybind.template.clone()));
            }
            if keybind.hold >= tuning.interval() {
                tracing::warn!(
                    "Hold for '{}' ({:?}) is longer than the tick interval ({:?}); ticks will be skipped",
                    keybind.template,
                    keybind.hold,
                    tuning.interval()
                );
            }
        }

        Ok(Self {
            region,
            templates,
            keybinds: settings.keybinds.clone(),
            tuning: tuning.clone(),
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn keybinds(&self) -> &[Keybind] {
        &self.keybinds
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn interval(&self) -> Duration {
        self.tuning.interval()
    }

    pub fn casting_params(&self) -> CastingParams {
        self.tuning.casting_params()
    }

    pub fn threshold_policy(&self) -> ThresholdPolicy {
        self.tuning.threshold_policy()
    }
}

/// Where the loop fetches configuration at start and on reload
///
/// The external configuration owner edits the store and settings; the loop
/// only reads them when asked to (re)resolve.
#[derive(Clone)]
pub struct ConfigSource {
    store: Arc<TemplateStore>,
    settings: Arc<RwLock<DetectionSettings>>,
}

impl ConfigSource {
    pub fn new(store: Arc<TemplateStore>, settings: DetectionSettings) -> Self {
        Self {
            store,
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn store(&self) -> &Arc<TemplateStore> {
        &self.store
    }

    /// Copy of the current settings
    pub fn settings(&self) -> DetectionSettings {
        self.settings.read().clone()
    }

    /// Edit the settings in place
    pub fn update_settings(&self, edit: impl FnOnce(&mut DetectionSettings)) {
        edit(&mut *self.settings.write());
    }

    /// Snapshot the store and validate it against the current settings
    pub fn resolve(&self, displays: &[Region]) -> Result<ResolvedConfig, ConfigurationError> {
        let templates = self.store.snapshot();
        let settings = self.settings.read().clone();
        ResolvedConfig::resolve(templates, &settings, displays)
    }
}

// ---------------------------------------------------------------------------
// JSON file adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub name: String,
    /// Image path, relative to the config file's directory
    pub image: String,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub offset: Option<[u32; 2]>,
}

fn default_threshold() -> f32 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeybindEntry {
    pub template: String,
    /// Chord such as "1", "f5" or "alt+3"
    pub key: String,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
}

fn default_hold_ms() -> u64 {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeySettings {
    /// Toggles casting on and off
    pub toggle: String,
    /// Asks the UI to show or hide itself
    pub visibility: String,
}

impl Default for HotkeySettings {
    fn default() -> Self {
        Self {
            toggle: "f10".to_string(),
            visibility: "f11".to_string(),
        }
    }
}

/// On-disk configuration written by the setup tooling. Never written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub region: Region,

    /// Highest priority first
    pub templates: Vec<TemplateEntry>,

    #[serde(default)]
    pub keybinds: Vec<KeybindEntry>,

    #[serde(default)]
    pub tuning: Tuning,

    #[serde(default)]
    pub hotkeys: HotkeySettings,
}

impl AppConfig {
    /// Default location: `config/config.json` next to the executable
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let exe_path = env::current_exe().context("Could not locate the executable")?;
        let exe_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow!("Could not determine executable directory"))?;
        Ok(exe_dir.join("config").join("config.json"))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load every template image, resolving paths against `base_dir`
    pub fn load_templates(&self, base_dir: &Path) -> anyhow::Result<Vec<Template>> {
        self.templates
            .iter()
            .map(|entry| {
                let path = base_dir.join(&entry.image);
                let image = image::open(&path)
                    .with_context(|| format!("Failed to load template image {}", path.display()))?
                    .to_rgba8();
                let template = Template::new(entry.name.clone(), image, entry.threshold)
                    .with_context(|| format!("Invalid template '{}'", entry.name))?;
                Ok(match entry.offset {
                    Some([x, y]) => template.with_offset(x, y),
                    None => template,
                })
            })
            .collect()
    }

    /// Parse keybinds and bundle them with the region and tuning
    pub fn detection_settings(&self) -> anyhow::Result<DetectionSettings> {
        let keybinds = self
            .keybinds
            .iter()
            .map(|entry| {
                Keybind::parse(entry.template.clone(), &entry.key, entry.hold_ms)
                    .with_context(|| format!("Invalid keybind for '{}'", entry.template))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(DetectionSettings::new(self.region, keybinds, self.tuning.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn template(name: &str, threshold: f32) -> Template {
        Template::new(name, RgbaImage::from_pixel(20, 20, Rgba([9, 9, 9, 255])), threshold).unwrap()
    }

    fn settings(keybinds: Vec<Keybind>) -> DetectionSettings {
        DetectionSettings::new(Region::new(0, 0, 100, 40), keybinds, Tuning::default())
    }

    fn bind(name: &str) -> Keybind {
        Keybind::parse(name, "1", 50).unwrap()
    }

    #[test]
    fn test_default_tuning() {
        let tuning = Tuning::default();
        assert_eq!(tuning.interval(), Duration::from_millis(100));
        assert_eq!(tuning.casting_params().cooldown, Duration::from_millis(500));
        assert_eq!(tuning.min_press_interval_ms, 50);
        assert!(tuning.repeat_cast);
    }

    #[test]
    fn test_resolve_accepts_valid_config() {
        let set = TemplateSet::new(vec![template("N5", 0.8)]);
        let config = ResolvedConfig::resolve(set, &settings(vec![bind("N5")]), &[]).unwrap();
        assert_eq!(config.templates().len(), 1);
        assert_eq!(config.keybinds().len(), 1);
    }

    #[test]
    fn test_resolve_rejects_unknown_keybind_template() {
        let set = TemplateSet::new(vec![template("N5", 0.8)]);
        let err = ResolvedConfig::resolve(set, &settings(vec![bind("C1")]), &[]).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownTemplate("C1".to_string()));
    }

    #[test]
    fn test_resolve_rejects_duplicate_keybind() {
        let set = TemplateSet::new(vec![template("N5", 0.8)]);
        let err = ResolvedConfig::resolve(set, &settings(vec![bind("N5"), bind("N5")]), &[]).unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateKeybind("N5".to_string()));
    }

    #[test]
    fn test_resolve_rejects_thresholds_out_of_range() {
        let set = TemplateSet::new(vec![template("N5", 1.2)]);
        let err = ResolvedConfig::resolve(set, &settings(vec![]), &[]).unwrap_err();
        assert!(matches!(err, ConfigurationError::ThresholdOutOfRange { .. }));

        let set = TemplateSet::new(vec![template("N5", f32::NAN)]);
        assert!(ResolvedConfig::resolve(set, &settings(vec![]), &[]).is_err());

        let mut s = settings(vec![]);
        s.tuning.overrides.insert("N5".to_string(), -0.1);
        let set = TemplateSet::new(vec![template("N5", 0.8)]);
        assert!(ResolvedConfig::resolve(set, &s, &[]).is_err());
    }

    #[test]
    fn test_resolve_checks_region() {
        let set = TemplateSet::new(vec![template("N5", 0.8)]);

        let mut s = settings(vec![]);
        s.region = Region::new(0, 0, 0, 40);
        assert!(matches!(
            ResolvedConfig::resolve(set.clone(), &s, &[]),
            Err(ConfigurationError::EmptyRegion(_))
        ));

        let s = settings(vec![]);
        let screen = [Region::new(0, 0, 50, 50)];
        assert!(matches!(
            ResolvedConfig::resolve(set.clone(), &s, &screen),
            Err(ConfigurationError::RegionOutOfBounds(_))
        ));

        let screens = [Region::new(-1920, 0, 1920, 1080), Region::new(0, 0, 1920, 1080)];
        assert!(ResolvedConfig::resolve(set, &s, &screens).is_ok());
    }

    #[test]
    fn test_resolve_rejects_oversized_template_and_bad_frequency() {
        let big = Template::new("Big", RgbaImage::new(120, 10), 0.8).unwrap();
        let err = ResolvedConfig::resolve(TemplateSet::new(vec![big]), &settings(vec![]), &[]).unwrap_err();
        assert!(matches!(err, ConfigurationError::Template(_)));

        let mut s = settings(vec![]);
        s.tuning.frequency_hz = 0.0;
        let set = TemplateSet::new(vec![template("N5", 0.8)]);
        assert_eq!(
            ResolvedConfig::resolve(set, &s, &[]).unwrap_err(),
            ConfigurationError::InvalidFrequency(0.0)
        );
    }

    #[test]
    fn test_resolve_rejects_extreme_frequencies_without_panicking() {
        let set = TemplateSet::new(vec![template("N5", 0.8)]);
        for hz in [1e-20, 1e20, -5.0, f64::NAN, f64::INFINITY] {
            let mut s = settings(vec![bind("N5")]);
            s.tuning.frequency_hz = hz;
            let err = ResolvedConfig::resolve(set.clone(), &s, &[]).unwrap_err();
            assert!(matches!(err, ConfigurationError::InvalidFrequency(_)), "{} Hz", hz);
            assert!(s.tuning.interval() <= Duration::from_millis(100));
        }

        let mut s = settings(vec![bind("N5")]);
        s.tuning.frequency_hz = MIN_FREQUENCY_HZ;
        assert_eq!(
            ResolvedConfig::resolve(set.clone(), &s, &[]).unwrap().interval(),
            Duration::from_secs(100)
        );
        s.tuning.frequency_hz = MAX_FREQUENCY_HZ;
        assert_eq!(
            ResolvedConfig::resolve(set, &s, &[]).unwrap().interval(),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_resolve_rejects_duplicates_and_empty_sets() {
        let set = TemplateSet::new(vec![template("N5", 0.8), template("N5", 0.9)]);
        assert_eq!(
            ResolvedConfig::resolve(set, &settings(vec![]), &[]).unwrap_err(),
            ConfigurationError::DuplicateTemplate("N5".to_string())
        );

        assert_eq!(
            ResolvedConfig::resolve(TemplateSet::default(), &settings(vec![]), &[]).unwrap_err(),
            ConfigurationError::NoTemplates
        );
    }

    #[test]
    fn test_config_source_sees_latest_edits() {
        let store = Arc::new(TemplateStore::new());
        let source = ConfigSource::new(store.clone(), settings(vec![bind("N5")]));
        assert!(source.resolve(&[]).is_err());

        store.insert(template("N5", 0.8));
        assert!(source.resolve(&[]).is_ok());

        source.update_settings(|s| s.tuning.frequency_hz = 20.0);
        assert_eq!(source.resolve(&[]).unwrap().interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_app_config_from_json() {
        let json = r#"{
            "region": { "x": 10, "y": 980, "width": 100, "height": 40 },
            "templates": [
                { "name": "N5", "image": "templates/n5.png" },
                { "name": "C1", "image": "templates/c1.png", "threshold": 0.9, "offset": [40, 0] }
            ],
            "keybinds": [
                { "template": "N5", "key": "1" },
                { "template": "C1", "key": "alt+2", "hold_ms": 80 }
            ],
            "tuning": { "frequency_hz": 20.0, "cooldown_scope": "per_template", "match_method": "absdiff" }
        }"#;

        let config = AppConfig::from_json(json).unwrap();
        assert_eq!(config.region, Region::new(10, 980, 100, 40));
        assert_eq!(config.templates[0].threshold, 0.8);
        assert_eq!(config.templates[1].offset, Some([40, 0]));
        assert_eq!(config.tuning.cooldown_ms, 500);
        assert_eq!(config.tuning.cooldown_scope, CooldownScope::PerTemplate);
        assert_eq!(config.tuning.match_method, MatchMethod::AbsDiff);
        assert_eq!(Tuning::default().match_method, MatchMethod::Zncc);
        assert_eq!(config.hotkeys, HotkeySettings::default());

        let settings = config.detection_settings().unwrap();
        assert_eq!(settings.keybinds[0].hold, Duration::from_millis(50));
        assert_eq!(settings.keybinds[1].chord.to_string(), "alt+2");
    }

    #[test]
    fn test_app_config_rejects_bad_key() {
        let json = r#"{
            "region": { "x": 0, "y": 0, "width": 10, "height": 10 },
            "templates": [],
            "keybinds": [{ "template": "N5", "key": "hyper+1" }]
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        let err = config.detection_settings().unwrap_err();
        assert!(err.to_string().contains("N5"));
    }

    #[test]
    fn test_load_templates_from_disk() {
        let dir = std::env::temp_dir().join(format!("spellcast-config-{}", std::process::id()));
        fs::create_dir_all(dir.join("templates")).unwrap();
        RgbaImage::from_pixel(8, 8, Rgba([200, 10, 10, 255]))
            .save(dir.join("templates").join("n5.png"))
            .unwrap();

        let json = r#"{
            "region": { "x": 0, "y": 0, "width": 40, "height": 20 },
            "templates": [{ "name": "N5", "image": "templates/n5.png", "offset": [4, 4] }]
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        let templates = config.load_templates(&dir).unwrap();
        assert_eq!(templates[0].width(), 8);
        assert_eq!(templates[0].offset(), Some((4, 4)));

        let missing = AppConfig::from_json(&json.replace("n5.png", "missing.png")).unwrap();
        assert!(missing.load_templates(&dir).is_err());

        fs::remove_dir_all(&dir).ok();
    }
}
