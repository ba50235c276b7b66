use serde::{Deserialize, Serialize};
use std::fmt;

/// A named step of the document pipeline.
///
/// Stages are an open set: `extract` and `classify` are the well-known ones,
/// deployments may add more (e.g. geotagging) without touching the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stage(String);

impl Stage {
    pub const EXTRACT: &'static str = "extract";
    pub const CLASSIFY: &'static str = "classify";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn extract() -> Self {
        Self::new(Self::EXTRACT)
    }

    pub fn classify() -> Self {
        Self::new(Self::CLASSIFY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Stage {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Ordered list of stages. A task that completes in one stage is chained into
/// the next one; the last stage has no successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline(Vec<Stage>);

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self(stages)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.0
    }

    pub fn contains(&self, stage: &Stage) -> bool {
        self.0.contains(stage)
    }

    pub fn first(&self) -> Option<&Stage> {
        self.0.first()
    }

    /// Successor of `stage`, or `None` for the last stage (or an unknown one).
    pub fn next_after(&self, stage: &Stage) -> Option<&Stage> {
        let idx = self.0.iter().position(|s| s == stage)?;
        self.0.get(idx + 1)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self(vec![Stage::extract(), Stage::classify()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_chains_extract_into_classify() {
        let p = Pipeline::default();
        assert_eq!(p.first(), Some(&Stage::extract()));
        assert_eq!(p.next_after(&Stage::extract()), Some(&Stage::classify()));
        assert_eq!(p.next_after(&Stage::classify()), None);
        assert_eq!(p.next_after(&Stage::new("geotag")), None);
    }

    #[test]
    fn stage_serializes_as_plain_string() {
        let s = serde_json::to_string(&Stage::classify()).unwrap();
        assert_eq!(s, "\"classify\"");
        let back: Pipeline = serde_json::from_str(r#"["extract","geotag"]"#).unwrap();
        assert_eq!(back.next_after(&Stage::extract()), Some(&Stage::new("geotag")));
    }
}
