//! Skill catalog collaborator.
//!
//! A skill is an operator-authored instruction block the agent can opt
//! into per session. The catalog itself lives outside the core; the
//! session only resolves selected ids against it when assembling the
//! skills prompt.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An instruction block selectable per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    /// Markdown instructions injected into the system prompt when selected.
    pub prompt: String,
}

/// Read-only skill lookup.
pub trait SkillCatalog: Send + Sync {
    fn all(&self) -> Vec<Skill>;
    fn get(&self, id: &str) -> Option<Skill>;
}

/// Fixed in-memory catalog.
#[derive(Debug, Default)]
pub struct StaticSkillCatalog {
    by_id: HashMap<String, Skill>,
}

impl StaticSkillCatalog {
    pub fn new(skills: impl IntoIterator<Item = Skill>) -> Self {
        Self {
            by_id: skills.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }
}

impl SkillCatalog for StaticSkillCatalog {
    fn all(&self) -> Vec<Skill> {
        let mut skills: Vec<Skill> = self.by_id.values().cloned().collect();
        skills.sort_by(|a, b| a.id.cmp(&b.id));
        skills
    }

    fn get(&self, id: &str) -> Option<Skill> {
        self.by_id.get(id).cloned()
    }
}
