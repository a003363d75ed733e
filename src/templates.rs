//! Icon templates and the store they live in
//!
//! Templates are created during calibration by an external collaborator and
//! are read-only while detection runs. The loop only ever sees a `TemplateSet`
//! snapshot, so edits to the store never reach a tick in progress.

use std::sync::Arc;

use image::{imageops, GrayImage, RgbaImage};
use parking_lot::RwLock;

use crate::capture::Region;
use crate::error::MatchError;

/// Precomputed statistics of a template's grayscale image
///
/// Built once per template so a search pass only has to accumulate the frame
/// side of the correlation.
#[derive(Debug, Clone)]
pub struct TemplatePlan {
    gray: GrayImage,
    mean: f64,
    /// Sum of squared deviations from the mean
    energy: f64,
    zero_mean: Vec<f64>,
}

impl TemplatePlan {
    pub fn new(gray: GrayImage) -> Self {
        let count = (gray.width() as f64) * (gray.height() as f64);

        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for pixel in gray.pixels() {
            let v = pixel[0] as f64;
            sum += v;
            sum_sq += v * v;
        }

        let mean = if count > 0.0 { sum / count } else { 0.0 };
        let energy = (sum_sq - sum * mean).max(0.0);
        let zero_mean = gray.pixels().map(|p| p[0] as f64 - mean).collect();

        Self {
            gray,
            mean,
            energy,
            zero_mean,
        }
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    /// Pixel values minus the mean, row-major
    pub fn zero_mean(&self) -> &[f64] {
        &self.zero_mean
    }
}

/// A reference icon plus its match parameters
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    plan: Arc<TemplatePlan>,
    threshold: f32,
    offset: Option<(u32, u32)>,
}

impl Template {
    /// Create a template; the grayscale plan used for matching is computed here once
    pub fn new(name: impl Into<String>, image: RgbaImage, threshold: f32) -> Result<Self, MatchError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(MatchError::EmptyName);
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(MatchError::EmptyImage(name));
        }

        let plan = TemplatePlan::new(imageops::grayscale(&image));
        Ok(Self {
            name,
            plan: Arc::new(plan),
            threshold,
            offset: None,
        })
    }

    /// Pin the template to a fixed position inside the region instead of
    /// searching the whole region
    pub fn with_offset(mut self, x: u32, y: u32) -> Self {
        self.offset = Some((x, y));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plan(&self) -> &TemplatePlan {
        &self.plan
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn offset(&self) -> Option<(u32, u32)> {
        self.offset
    }

    pub fn width(&self) -> u32 {
        self.plan.width()
    }

    pub fn height(&self) -> u32 {
        self.plan.height()
    }

    /// Check the template (at its offset, if any) lies inside `region`
    pub fn check_fits(&self, region: &Region) -> Result<(), MatchError> {
        let (ox, oy) = self.offset.unwrap_or((0, 0));
        let fits = ox as u64 + self.width() as u64 <= region.width as u64
            && oy as u64 + self.height() as u64 <= region.height as u64;
        if fits {
            Ok(())
        } else {
            Err(MatchError::DoesNotFit {
                name: self.name.clone(),
                width: self.width(),
                height: self.height(),
                region_width: region.width,
                region_height: region.height,
            })
        }
    }
}

/// Immutable, priority-ordered set of templates (index 0 = highest priority)
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Arc<[Template]>,
}

impl TemplateSet {
    pub fn new(templates: Vec<Template>) -> Self {
        Self {
            templates: templates.into(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Template> {
        self.templates.iter()
    }

    pub fn as_slice(&self) -> &[Template] {
        &self.templates
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.templates.iter().position(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl From<Vec<Template>> for TemplateSet {
    fn from(templates: Vec<Template>) -> Self {
        Self::new(templates)
    }
}

/// Shared, editable collection of templates
///
/// Edited by the calibration side; the detection loop only calls `snapshot()`
/// at start and on explicit reload.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: RwLock<Vec<Template>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: Vec<Template>) -> Self {
        Self {
            templates: RwLock::new(templates),
        }
    }

    /// Add a template at the lowest priority, or replace the one with the same
    /// name in place (keeping its priority slot)
    pub fn insert(&self, template: Template) {
        let mut templates = self.templates.write();
        match templates.iter_mut().find(|t| t.name == template.name) {
            Some(slot) => *slot = template,
            None => templates.push(template),
        }
    }

    pub fn remove(&self, name: &str) -> Option<Template> {
        let mut templates = self.templates.write();
        let index = templates.iter().position(|t| t.name == name)?;
        Some(templates.remove(index))
    }

    /// Move a template to a new priority index (clamped to the end).
    /// Returns false when no template has that name.
    pub fn reorder(&self, name: &str, new_index: usize) -> bool {
        let mut templates = self.templates.write();
        let Some(index) = templates.iter().position(|t| t.name == name) else {
            return false;
        };
        let template = templates.remove(index);
        let new_index = new_index.min(templates.len());
        templates.insert(new_index, template);
        true
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }

    /// Ordered copy of the store at call time
    pub fn snapshot(&self) -> TemplateSet {
        TemplateSet::new(self.templates.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn icon(value: u8) -> RgbaImage {
        RgbaImage::from_pixel(40, 40, Rgba([value, value, value, 255]))
    }

    #[test]
    fn test_template_rejects_empty_image() {
        let err = Template::new("N5", RgbaImage::new(0, 40), 0.8).unwrap_err();
        assert_eq!(err, MatchError::EmptyImage("N5".to_string()));

        assert_eq!(Template::new("  ", icon(0), 0.8).unwrap_err(), MatchError::EmptyName);
    }

    #[test]
    fn test_plan_statistics() {
        let gray = GrayImage::from_fn(4, 1, |x, _| image::Luma([(x * 10) as u8]));
        let plan = TemplatePlan::new(gray);
        assert_eq!(plan.mean(), 15.0);
        // (-15)^2 + (-5)^2 + 5^2 + 15^2
        assert_eq!(plan.energy(), 500.0);
        assert_eq!(plan.zero_mean(), &[-15.0, -5.0, 5.0, 15.0]);

        let flat = Template::new("N5", icon(7), 0.8).unwrap();
        assert_eq!(flat.plan().mean(), 7.0);
        assert_eq!(flat.plan().energy(), 0.0);
    }

    #[test]
    fn test_template_fit_respects_offset() {
        let region = Region::new(0, 0, 100, 40);
        let template = Template::new("N5", icon(10), 0.8).unwrap();
        assert!(template.check_fits(&region).is_ok());

        let shifted = template.clone().with_offset(60, 0);
        assert!(shifted.check_fits(&region).is_ok());

        let too_far = template.with_offset(61, 0);
        assert!(matches!(too_far.check_fits(&region), Err(MatchError::DoesNotFit { .. })));
    }

    #[test]
    fn test_store_insert_replaces_in_place() {
        let store = TemplateStore::new();
        store.insert(Template::new("N5", icon(1), 0.8).unwrap());
        store.insert(Template::new("C1", icon(2), 0.8).unwrap());
        store.insert(Template::new("N5", icon(3), 0.9).unwrap());

        let set = store.snapshot();
        assert_eq!(set.names(), vec!["N5", "C1"]);
        assert_eq!(set.get("N5").unwrap().threshold(), 0.9);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_edits() {
        let store = TemplateStore::new();
        store.insert(Template::new("N5", icon(1), 0.8).unwrap());
        let snapshot = store.snapshot();

        store.insert(Template::new("C1", icon(2), 0.8).unwrap());
        store.remove("N5");

        assert_eq!(snapshot.names(), vec!["N5"]);
        assert_eq!(store.snapshot().names(), vec!["C1"]);
    }

    #[test]
    fn test_store_reorder() {
        let store = TemplateStore::with_templates(vec![
            Template::new("N5", icon(1), 0.8).unwrap(),
            Template::new("C1", icon(2), 0.8).unwrap(),
            Template::new("N1", icon(3), 0.8).unwrap(),
        ]);

        assert!(store.reorder("N1", 0));
        assert_eq!(store.snapshot().names(), vec!["N1", "N5", "C1"]);
        assert!(store.reorder("N1", 99));
        assert_eq!(store.snapshot().names(), vec!["N5", "C1", "N1"]);
        assert!(!store.reorder("missing", 0));
    }
}
