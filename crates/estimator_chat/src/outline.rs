//! The epics/features/risks outline the thinking agent prints at the start
//! of every response.
//!
//! ```text
//! Epics:
//! - Authentication ❌
//!   Features:
//!     - Login ❌
//!        Assumptions:
//!         - Users sign in with email
//!   Unknowns / Open Questions:
//!     - Which identity provider?
//!   Risks:
//!     - SSO integration effort
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::markdown::{fenced_blocks, FencedBlock};

/// Resolution status of an epic or feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Marked ✅
    Resolved,
    /// Marked ❌
    Open,
    /// No marker
    Unmarked,
}

impl Status {
    fn from_text(text: &str) -> Self {
        if text.contains('✅') {
            Self::Resolved
        } else if text.contains('❌') {
            Self::Open
        } else {
            Self::Unmarked
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub status: Status,
    pub assumptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epic {
    pub name: String,
    pub status: Status,
    pub features: Vec<Feature>,
    pub open_questions: Vec<String>,
    pub risks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub epics: Vec<Epic>,
}

impl Outline {
    /// Every feature with its epic name
    pub fn features(&self) -> impl Iterator<Item = (&Epic, &Feature)> {
        self.epics
            .iter()
            .flat_map(|epic| epic.features.iter().map(move |f| (epic, f)))
    }

    fn feature(&self, epic: &str, feature: &str) -> Option<&Feature> {
        self.epics
            .iter()
            .find(|e| e.name == epic)
            .and_then(|e| e.features.iter().find(|f| f.name == feature))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Epics,
    Features,
    Assumptions,
    Unknowns,
    Risks,
    Other,
}

impl Section {
    fn from_header(header: &str) -> Self {
        let header = header.to_lowercase();
        if header.contains("epic") {
            Self::Epics
        } else if header.contains("feature") {
            Self::Features
        } else if header.contains("assumption") {
            Self::Assumptions
        } else if header.contains("unknown") || header.contains("question") {
            Self::Unknowns
        } else if header.contains("risk") {
            Self::Risks
        } else {
            Self::Other
        }
    }
}

/// The fenced outline at the very start of a response, if present.
pub fn leading_outline(response: &str) -> Option<FencedBlock> {
    let trimmed = response.trim_start();
    if !(trimmed.starts_with("```") || trimmed.starts_with("~~~")) {
        return None;
    }
    fenced_blocks(trimmed).into_iter().next()
}

fn clean_name(text: &str) -> String {
    text.replace(['✅', '❌', '[', ']'], "")
        .replace("**", "")
        .trim()
        .trim_end_matches(" or")
        .trim()
        .to_string()
}

/// Parse an outline body. Lines that do not fit the structure are ignored.
pub fn parse(body: &str) -> Outline {
    let mut outline = Outline::default();
    let mut headers: Vec<(usize, Section)> = Vec::new();

    for line in body.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        let text = line.trim();

        if let Some(item) = text.strip_prefix("- ").or_else(|| text.strip_prefix("* ")) {
            while headers.last().is_some_and(|(h, _)| *h > indent) {
                headers.pop();
            }
            let section = headers.last().map(|(_, s)| *s).unwrap_or(Section::Epics);
            let status = Status::from_text(item);
            let name = clean_name(item);

            match section {
                Section::Epics => outline.epics.push(Epic {
                    name,
                    status,
                    features: Vec::new(),
                    open_questions: Vec::new(),
                    risks: Vec::new(),
                }),
                Section::Features => {
                    if let Some(epic) = outline.epics.last_mut() {
                        epic.features.push(Feature {
                            name,
                            status,
                            assumptions: Vec::new(),
                        });
                    }
                }
                Section::Assumptions => {
                    if let Some(feature) =
                        outline.epics.last_mut().and_then(|e| e.features.last_mut())
                    {
                        feature.assumptions.push(name);
                    }
                }
                Section::Unknowns => {
                    if let Some(epic) = outline.epics.last_mut() {
                        epic.open_questions.push(name);
                    }
                }
                Section::Risks => {
                    if let Some(epic) = outline.epics.last_mut() {
                        epic.risks.push(name);
                    }
                }
                Section::Other => {}
            }
        } else if let Some(header) = text.strip_suffix(':') {
            while headers.last().is_some_and(|(h, _)| *h >= indent) {
                headers.pop();
            }
            headers.push((indent, Section::from_header(header)));
        }
    }

    outline
}

fn resolution_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)✅|\b(good|resolved|done|complete|completed)\b").expect("valid marker regex")
    })
}

/// Whether a user message explicitly marks the current item resolved
pub fn is_resolution_marker(user_message: &str) -> bool {
    resolution_marker().is_match(user_message)
}

/// Features that went from ❌ to ✅ between two outlines although the user
/// message in between carried no resolution marker.
pub fn advanced_without_resolution(
    previous: &Outline,
    next: &Outline,
    user_message: &str,
) -> Vec<String> {
    if is_resolution_marker(user_message) {
        return Vec::new();
    }
    next.features()
        .filter(|(_, f)| f.status == Status::Resolved)
        .filter(|(epic, f)| {
            previous
                .feature(&epic.name, &f.name)
                .is_some_and(|prev| prev.status == Status::Open)
        })
        .map(|(_, f)| f.name.clone())
        .collect()
}
