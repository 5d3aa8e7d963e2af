use std::path::Path;
use std::sync::Arc;

use rand::Rng;

use crate::error::AppError;
use crate::util::{non_empty_lines, read_lines};

/// Preloaded list of browser user-agent strings.
///
/// Cheap to clone; every replica shares the same list.
#[derive(Debug, Clone, Default)]
pub struct UserAgents {
    agents: Arc<Vec<String>>,
}

impl UserAgents {
    pub fn new(agents: Vec<String>) -> Self {
        Self {
            agents: Arc::new(agents),
        }
    }

    /// Build from newline-delimited text, dropping blank lines.
    pub fn from_lines(text: &str) -> Self {
        Self::new(non_empty_lines(text))
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        read_lines(path).map(Self::new)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Pick one entry uniformly at random.
    pub fn pick(&self) -> Result<String, AppError> {
        if self.agents.is_empty() {
            return Err(AppError::NoUserAgents);
        }
        let i = rand::rng().random_range(0..self.agents.len());
        Ok(self.agents[i].clone())
    }
}
