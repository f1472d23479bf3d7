//! Positions of nodes inside a message tree.

use std::fmt;

/// One step from a node to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathStep {
    /// The n-th multipart child, zero-based.
    Part(usize),
    /// The message embedded in a `message/rfc822` body.
    Embedded,
}

/// Position of a node relative to the root of its tree.
///
/// The root has an empty path. A node never owns a reference to its parent;
/// the parent is found by resolving [`PartPath::parent`] from the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PartPath {
    steps: Vec<PathStep>,
}

impl PartPath {
    /// Returns the path of a tree root.
    #[must_use]
    pub const fn root() -> Self {
        Self { steps: Vec::new() }
    }

    /// Returns true if this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the steps from the root.
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Returns the path extended by one step.
    #[must_use]
    pub fn child(&self, step: PathStep) -> Self {
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.extend_from_slice(&self.steps);
        steps.push(step);
        Self { steps }
    }

    /// Returns the path of the enclosing node, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.steps.split_last()?;
        Some(Self {
            steps: rest.to_vec(),
        })
    }

    /// Number of multipart levels since the last embedded message.
    #[must_use]
    pub fn part_depth(&self) -> usize {
        self.steps
            .iter()
            .rev()
            .take_while(|step| matches!(step, PathStep::Part(_)))
            .count()
    }
}

impl From<Vec<PathStep>> for PartPath {
    fn from(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }
}

impl fmt::Display for PartPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "/");
        }
        for step in &self.steps {
            match step {
                PathStep::Part(n) => write!(f, "/{n}")?,
                PathStep::Embedded => write!(f, "/message")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_root() {
        let root = PartPath::root();
        assert!(root.is_root());
        assert!(root.parent().is_none());
        assert_eq!(root.to_string(), "/");
    }

    #[test]
    fn test_child_and_parent() {
        let path = PartPath::root()
            .child(PathStep::Part(1))
            .child(PathStep::Embedded)
            .child(PathStep::Part(0));

        assert_eq!(path.to_string(), "/1/message/0");
        assert_eq!(
            path.parent().unwrap().steps(),
            [PathStep::Part(1), PathStep::Embedded]
        );
    }

    #[test]
    fn test_part_depth_resets_at_embedded() {
        let path = PartPath::from(vec![
            PathStep::Part(0),
            PathStep::Part(2),
            PathStep::Embedded,
            PathStep::Part(1),
        ]);
        assert_eq!(path.part_depth(), 1);
        assert_eq!(path.parent().unwrap().part_depth(), 0);
        assert_eq!(PartPath::root().part_depth(), 0);
    }
}
