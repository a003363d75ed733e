//! Template matching: scores a captured frame against every template in a set.
//!
//! The similarity measure is a strategy injected into [`Matcher`]; selection of
//! the winning template (threshold, highest score, priority tie-break) is done
//! here so every strategy gets identical decision rules.

use std::collections::HashMap;
use std::time::Instant;

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::templates::{Template, TemplatePlan, TemplateSet};

/// Variance below which a window is treated as a flat colour
const FLAT_VARIANCE: f64 = 1e-6;

/// Scores are quantised to this step so an exact match reports exactly 1.0
const SCORE_QUANTUM: f64 = 1e-6;

/// A similarity measure between a frame window and a template
pub trait MatchStrategy: Send + Sync {
    /// Similarity in [0, 1] between the template and the frame window whose
    /// top-left corner is (`x`, `y`). Callers guarantee the window is in bounds.
    fn score_at(&self, frame: &GrayImage, template: &TemplatePlan, x: u32, y: u32) -> f32;

    fn name(&self) -> &'static str;
}

/// Similarity measure selected in the tuning file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    /// Normalized cross-correlation, tolerant of brightness changes
    #[default]
    Zncc,
    /// Mean absolute difference, brightness sensitive
    AbsDiff,
}

impl MatchMethod {
    pub fn strategy(self) -> Box<dyn MatchStrategy> {
        match self {
            MatchMethod::Zncc => Box::new(Zncc),
            MatchMethod::AbsDiff => Box::new(AbsDiff),
        }
    }
}

/// Zero-mean normalized cross-correlation
///
/// Invariant to uniform brightness and contrast changes. Anti-correlated
/// windows score 0. Two flat windows are compared by their mean brightness
/// since correlation is undefined for them.
#[derive(Debug, Default, Clone, Copy)]
pub struct Zncc;

impl MatchStrategy for Zncc {
    fn score_at(&self, frame: &GrayImage, template: &TemplatePlan, x: u32, y: u32) -> f32 {
        let (tw, th) = (template.width(), template.height());
        let n = (tw as f64) * (th as f64);
        let zero_mean = template.zero_mean();

        let mut sum_i = 0.0f64;
        let mut sum_i2 = 0.0f64;
        let mut cov = 0.0f64;

        for ty in 0..th {
            let row = &zero_mean[(ty * tw) as usize..((ty + 1) * tw) as usize];
            for (tx, t) in row.iter().enumerate() {
                let i = frame.get_pixel(x + tx as u32, y + ty)[0] as f64;
                sum_i += i;
                sum_i2 += i * i;
                cov += t * i;
            }
        }

        let var_t = template.energy();
        let var_i = sum_i2 - sum_i * sum_i / n;

        let flat_t = var_t <= FLAT_VARIANCE;
        let flat_i = var_i <= FLAT_VARIANCE;
        if flat_t && flat_i {
            let diff = (template.mean() - sum_i / n).abs();
            return (1.0 - diff / 255.0) as f32;
        }
        if flat_t || flat_i {
            return 0.0;
        }

        let score = cov / (var_t * var_i).sqrt();
        score.clamp(0.0, 1.0) as f32
    }

    fn name(&self) -> &'static str {
        "zncc"
    }
}

/// One minus the mean absolute pixel difference
///
/// Cheaper than ZNCC and sensitive to brightness, which suits icons rendered
/// at a fixed brightness.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbsDiff;

impl MatchStrategy for AbsDiff {
    fn score_at(&self, frame: &GrayImage, template: &TemplatePlan, x: u32, y: u32) -> f32 {
        let (tw, th) = (template.width(), template.height());
        let gray = template.gray();
        let mut total: u64 = 0;
        for ty in 0..th {
            for tx in 0..tw {
                let t = gray.get_pixel(tx, ty)[0] as i32;
                let i = frame.get_pixel(x + tx, y + ty)[0] as i32;
                total += (t - i).unsigned_abs() as u64;
            }
        }
        let max = 255.0 * (tw as f64) * (th as f64);
        (1.0 - total as f64 / max) as f32
    }

    fn name(&self) -> &'static str {
        "absdiff"
    }
}

/// Score of one template for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateScore {
    pub name: String,
    pub score: f32,
    /// Top-left corner of the best window inside the region
    pub location: (u32, u32),
}

/// Outcome of one match pass
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Winning template, `None` when nothing reached its threshold
    pub template: Option<String>,
    /// Winner's score, or the highest score observed when there is no winner
    pub confidence: f32,
    pub location: Option<(u32, u32)>,
    /// Every template's score, in priority order
    pub scores: Vec<TemplateScore>,
    pub timestamp: Instant,
}

impl MatchResult {
    pub fn none(confidence: f32, timestamp: Instant) -> Self {
        Self {
            template: None,
            confidence,
            location: None,
            scores: Vec::new(),
            timestamp,
        }
    }

    pub fn matched(template: impl Into<String>, confidence: f32, timestamp: Instant) -> Self {
        Self {
            template: Some(template.into()),
            confidence,
            location: None,
            scores: Vec::new(),
            timestamp,
        }
    }

    pub fn is_match(&self) -> bool {
        self.template.is_some()
    }

    /// Template name, or "none"
    pub fn label(&self) -> &str {
        self.template.as_deref().unwrap_or("none")
    }
}

/// Effective thresholds: a global floor plus per-template overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdPolicy {
    pub floor: f32,
    pub overrides: HashMap<String, f32>,
}

impl ThresholdPolicy {
    pub fn new(floor: f32, overrides: HashMap<String, f32>) -> Self {
        Self { floor, overrides }
    }

    /// The override for the template (or its own threshold), raised to the floor
    pub fn effective(&self, template: &Template) -> f32 {
        let own = self
            .overrides
            .get(template.name())
            .copied()
            .unwrap_or_else(|| template.threshold());
        own.max(self.floor)
    }
}

/// Scores frames against template sets with an injected strategy
pub struct Matcher {
    strategy: Box<dyn MatchStrategy>,
}

impl Matcher {
    pub fn new(strategy: Box<dyn MatchStrategy>) -> Self {
        Self { strategy }
    }

    pub fn from_method(method: MatchMethod) -> Self {
        Self::new(method.strategy())
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Score one template: at its offset when pinned, otherwise the best
    /// window anywhere in the frame (leftmost wins ties)
    pub fn score_template(&self, frame: &GrayImage, template: &Template) -> TemplateScore {
        let (fw, fh) = frame.dimensions();
        let (tw, th) = (template.width(), template.height());

        let mut best = TemplateScore {
            name: template.name().to_string(),
            score: 0.0,
            location: template.offset().unwrap_or((0, 0)),
        };

        match template.offset() {
            Some((x, y)) => {
                if x + tw <= fw && y + th <= fh {
                    best.score = quantise(self.strategy.score_at(frame, template.plan(), x, y));
                }
            }
            None => {
                if tw > fw || th > fh {
                    return best;
                }
                'search: for x in 0..=(fw - tw) {
                    for y in 0..=(fh - th) {
                        let score = quantise(self.strategy.score_at(frame, template.plan(), x, y));
                        if score > best.score {
                            best.score = score;
                            best.location = (x, y);
                            if score >= 1.0 {
                                break 'search;
                            }
                        }
                    }
                }
            }
        }

        best
    }

    /// Score every template in parallel; the result keeps priority order
    pub fn score_all(&self, frame: &Frame, templates: &TemplateSet) -> Vec<TemplateScore> {
        let gray = frame.to_gray();
        templates
            .as_slice()
            .par_iter()
            .map(|template| self.score_template(&gray, template))
            .collect()
    }

    /// Match using each template's own threshold
    pub fn match_frame(&self, frame: &Frame, templates: &TemplateSet) -> MatchResult {
        self.match_with(frame, templates, &ThresholdPolicy::default())
    }

    /// Match with a threshold policy. A template is a candidate when its score
    /// is at least its effective threshold; the highest candidate wins and ties
    /// go to the template earlier in the set.
    pub fn match_with(
        &self,
        frame: &Frame,
        templates: &TemplateSet,
        policy: &ThresholdPolicy,
    ) -> MatchResult {
        let scores = self.score_all(frame, templates);
        select(frame.captured_at(), templates, scores, policy)
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(Box::new(Zncc))
    }
}

fn quantise(score: f32) -> f32 {
    let score = (score as f64).clamp(0.0, 1.0);
    ((score / SCORE_QUANTUM).round() * SCORE_QUANTUM) as f32
}

fn select(
    timestamp: Instant,
    templates: &TemplateSet,
    scores: Vec<TemplateScore>,
    policy: &ThresholdPolicy,
) -> MatchResult {
    let mut highest = 0.0f32;
    let mut winner: Option<usize> = None;

    for (index, (template, scored)) in templates.iter().zip(&scores).enumerate() {
        highest = highest.max(scored.score);
        if scored.score < policy.effective(template) {
            continue;
        }
        let beats = match winner {
            None => true,
            Some(current) => scored.score > scores[current].score,
        };
        if beats {
            winner = Some(index);
        }
    }

    match winner {
        Some(index) => MatchResult {
            template: Some(scores[index].name.clone()),
            confidence: scores[index].score,
            location: Some(scores[index].location),
            scores,
            timestamp,
        },
        None => MatchResult {
            template: None,
            confidence: highest,
            location: None,
            scores,
            timestamp,
        },
    }
}
