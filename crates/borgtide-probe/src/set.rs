use std::fmt;

/// Names of the environments that held at one refresh, in definition order.
///
/// A set is never updated in place; each refresh produces a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSet {
    names: Vec<String>,
}

impl EnvironmentSet {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

impl FromIterator<String> for EnvironmentSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for EnvironmentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names.join(", "))
    }
}
