//! RuleEngine - PPE Compliance Classification
//!
//! Pure function over one image's detections: subjects (persons) are matched
//! against each required equipment class by IoU, and every subject gets a
//! compliance status. Deterministic, no side effects.

use crate::config_store::CameraConfig;
use crate::detection::{BoundingBox, DetectedBox, DetectionLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default IoU above which equipment counts as worn by a subject
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.15;

/// Equipment class a subject can be required to wear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentClass {
    Helmet,
    Mask,
}

impl EquipmentClass {
    pub fn label(&self) -> DetectionLabel {
        match self {
            EquipmentClass::Helmet => DetectionLabel::Helmet,
            EquipmentClass::Mask => DetectionLabel::Mask,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentClass::Helmet => "helmet",
            EquipmentClass::Mask => "mask",
        }
    }
}

/// Rule set for one camera
#[derive(Debug, Clone, PartialEq)]
pub struct RuleConfig {
    /// Matching threshold (strictly greater than)
    pub iou_threshold: f32,
    /// Whether subjects are classified at all
    pub check_subjects: bool,
    /// Required equipment, in reporting order
    pub required: Vec<EquipmentClass>,
}

impl RuleConfig {
    pub fn new(iou_threshold: f32, required: Vec<EquipmentClass>) -> Self {
        let mut unique = Vec::with_capacity(required.len());
        for class in required {
            if !unique.contains(&class) {
                unique.push(class);
            }
        }
        Self {
            iou_threshold,
            check_subjects: true,
            required: unique,
        }
    }

    /// Rule set from a camera's per-class toggles
    pub fn for_camera(camera: &CameraConfig, iou_threshold: f32) -> Self {
        let mut required = Vec::new();
        if camera.detect_helmet {
            required.push(EquipmentClass::Helmet);
        }
        if camera.detect_mask {
            required.push(EquipmentClass::Mask);
        }
        Self {
            check_subjects: camera.detect_person,
            ..Self::new(iou_threshold, required)
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_IOU_THRESHOLD,
            vec![EquipmentClass::Helmet, EquipmentClass::Mask],
        )
    }
}

/// Per-subject compliance status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    /// Every required class absent (two or more required)
    MissingAll,
    /// Some required classes absent, in required order
    Missing(Vec<EquipmentClass>),
    /// Fallback when no other case applies
    Indeterminate,
}

impl ComplianceStatus {
    pub fn is_violation(&self) -> bool {
        !matches!(self, ComplianceStatus::Compliant)
    }
}

/// Compliance of one detected subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub subject: BoundingBox,
    /// Required class -> found with sufficient overlap
    pub equipment: BTreeMap<EquipmentClass, bool>,
    pub status: ComplianceStatus,
}

impl ComplianceResult {
    /// Required classes not found for this subject
    pub fn missing(&self) -> Vec<EquipmentClass> {
        self.equipment
            .iter()
            .filter(|(_, found)| !**found)
            .map(|(class, _)| *class)
            .collect()
    }
}

/// Violation category of a whole image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Missing(Vec<EquipmentClass>),
    Indeterminate,
}

impl ViolationKind {
    /// Event type name (`no_helmet`, `no_helmet_no_mask`, ...)
    pub fn as_event_type(&self) -> String {
        match self {
            ViolationKind::Missing(classes) => classes
                .iter()
                .map(|c| format!("no_{}", c.as_str()))
                .collect::<Vec<_>>()
                .join("_"),
            ViolationKind::Indeterminate => "indeterminate".to_string(),
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_event_type())
    }
}

/// All compliance results for one image
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub total_subjects: usize,
    pub compliant: usize,
    pub violations: usize,
    pub results: Vec<ComplianceResult>,
}

impl ViolationSummary {
    pub fn has_violation(&self) -> bool {
        self.violations > 0
    }

    /// Most severe violation in the image.
    ///
    /// More missing classes wins; ties go to the earlier class order.
    /// Indeterminate only when no subject has a definite finding.
    pub fn violation_kind(&self) -> Option<ViolationKind> {
        let worst = self
            .results
            .iter()
            .filter(|r| {
                matches!(
                    r.status,
                    ComplianceStatus::MissingAll | ComplianceStatus::Missing(_)
                )
            })
            .map(|r| r.missing())
            .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| b.cmp(a)));

        match worst {
            Some(missing) => Some(ViolationKind::Missing(missing)),
            None if self.has_violation() => Some(ViolationKind::Indeterminate),
            None => None,
        }
    }
}

/// Intersection over union; zero when the boxes do not overlap
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }

    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

fn derive_status(
    equipment: &BTreeMap<EquipmentClass, bool>,
    required: &[EquipmentClass],
) -> ComplianceStatus {
    let missing: Vec<EquipmentClass> = required
        .iter()
        .copied()
        .filter(|c| !equipment.get(c).copied().unwrap_or(false))
        .collect();

    match (missing.len(), required.len()) {
        (0, _) => ComplianceStatus::Compliant,
        (m, r) if m == r && r > 1 => ComplianceStatus::MissingAll,
        (m, r) if m <= r => ComplianceStatus::Missing(missing),
        _ => ComplianceStatus::Indeterminate,
    }
}

/// Classify every subject in one image's detections
pub fn classify(boxes: &[DetectedBox], config: &RuleConfig) -> ViolationSummary {
    if !config.check_subjects {
        return ViolationSummary::default();
    }

    let subjects = boxes.iter().filter(|b| b.label == DetectionLabel::Person);
    let mut summary = ViolationSummary::default();

    for subject in subjects {
        let equipment: BTreeMap<EquipmentClass, bool> = config
            .required
            .iter()
            .map(|class| {
                let found = boxes
                    .iter()
                    .filter(|b| b.label == class.label())
                    .any(|b| iou(&subject.bbox, &b.bbox) > config.iou_threshold);
                (*class, found)
            })
            .collect();

        let status = derive_status(&equipment, &config.required);
        if status.is_violation() {
            summary.violations += 1;
        } else {
            summary.compliant += 1;
        }
        summary.total_subjects += 1;
        summary.results.push(ComplianceResult {
            subject: subject.bbox,
            equipment,
            status,
        });
    }

    summary
}
