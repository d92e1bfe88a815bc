//! Migration chain model
//!
//! Revisions live on disk as `<seq>_<name>.up.sql` / `<seq>_<name>.down.sql`
//! pairs. The chain is strictly linear: unique, ordered sequence numbers,
//! every forward operation paired with its reverse.

use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// One reversible schema revision
#[derive(Debug, Clone)]
pub struct Revision {
    /// Position in the chain
    pub seq: u32,

    /// Human-readable name from the filename
    pub name: String,

    /// Forward operation
    pub up_sql: String,

    /// Reverse operation
    pub down_sql: String,
}

/// An ordered, linear chain of revisions
#[derive(Debug, Clone, Default)]
pub struct MigrationChain {
    revisions: Vec<Revision>,
}

impl MigrationChain {
    /// Load and validate the chain from a migrations directory
    pub async fn load(dir: &Dir) -> Result<Self, OrchestratorError> {
        if !dir.exists().await {
            return Err(OrchestratorError::MigrationError(format!(
                "migrations directory not found: {}",
                dir.path().display()
            )));
        }

        let mut ups: BTreeMap<u32, (String, String)> = BTreeMap::new();
        let mut downs: BTreeMap<u32, String> = BTreeMap::new();

        for path in dir.list_files().await? {
            let Some((seq, name, direction)) = parse_filename(&path) else {
                continue;
            };
            let contents = File::new(&path).read_string().await?;
            match direction {
                Direction::Up => {
                    if ups.insert(seq, (name.clone(), contents)).is_some() {
                        return Err(OrchestratorError::MigrationError(format!(
                            "duplicate revision {:04}: chain must be linear",
                            seq
                        )));
                    }
                }
                Direction::Down => {
                    if downs.insert(seq, contents).is_some() {
                        return Err(OrchestratorError::MigrationError(format!(
                            "duplicate reverse revision {:04}",
                            seq
                        )));
                    }
                }
            }
        }

        let mut revisions = Vec::with_capacity(ups.len());
        for (seq, (name, up_sql)) in ups {
            let down_sql = downs.remove(&seq).ok_or_else(|| {
                OrchestratorError::MigrationError(format!(
                    "revision {:04}_{} has no reverse operation",
                    seq, name
                ))
            })?;
            revisions.push(Revision {
                seq,
                name,
                up_sql,
                down_sql,
            });
        }

        if let Some((seq, _)) = downs.into_iter().next() {
            return Err(OrchestratorError::MigrationError(format!(
                "reverse revision {:04} has no forward operation",
                seq
            )));
        }

        let chain = Self { revisions };
        chain.validate()?;
        Ok(chain)
    }

    /// Build a chain from in-memory revisions (tests)
    pub fn from_revisions(mut revisions: Vec<Revision>) -> Result<Self, OrchestratorError> {
        revisions.sort_by_key(|r| r.seq);
        let chain = Self { revisions };
        chain.validate()?;
        Ok(chain)
    }

    /// Enforce the linearity invariant
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let mut prev: Option<u32> = None;
        for revision in &self.revisions {
            if let Some(prev) = prev {
                if revision.seq <= prev {
                    return Err(OrchestratorError::MigrationError(format!(
                        "chain is not strictly increasing at revision {:04}",
                        revision.seq
                    )));
                }
            }
            prev = Some(revision.seq);
        }
        Ok(())
    }

    /// All revisions, in chain order
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Look up a revision by sequence number
    pub fn find(&self, seq: u32) -> Option<&Revision> {
        self.revisions.iter().find(|r| r.seq == seq)
    }

    /// Revisions still to apply, in chain order, given the applied set.
    ///
    /// The applied set must be a prefix of the chain; anything else means
    /// the target database diverged from the chain and applying would
    /// branch history.
    pub fn pending(
        &self,
        applied: &[u32],
        up_to: Option<u32>,
    ) -> Result<Vec<&Revision>, OrchestratorError> {
        let prefix: Vec<u32> = self
            .revisions
            .iter()
            .take(applied.len())
            .map(|r| r.seq)
            .collect();
        let mut sorted = applied.to_vec();
        sorted.sort_unstable();
        if sorted != prefix {
            return Err(OrchestratorError::MigrationError(format!(
                "applied revisions {:?} are not a prefix of the chain",
                sorted
            )));
        }

        let mut pending = Vec::new();
        for revision in self.revisions.iter().skip(applied.len()) {
            if let Some(limit) = up_to {
                if revision.seq > limit {
                    break;
                }
            }
            pending.push(revision);
        }
        Ok(pending)
    }

    /// Revisions to reverse, newest first, to bring the applied set down
    /// to `down_to` (exclusive floor; None reverses everything applied).
    pub fn reversal(
        &self,
        applied: &[u32],
        down_to: Option<u32>,
    ) -> Result<Vec<&Revision>, OrchestratorError> {
        // Reuse the prefix validation
        self.pending(applied, None)?;

        let mut plan = Vec::new();
        for revision in self.revisions.iter().rev() {
            if !applied.contains(&revision.seq) {
                continue;
            }
            if let Some(floor) = down_to {
                if revision.seq <= floor {
                    break;
                }
            }
            plan.push(revision);
        }
        Ok(plan)
    }
}

enum Direction {
    Up,
    Down,
}

/// Parse `<seq>_<name>.up.sql` / `<seq>_<name>.down.sql`
fn parse_filename(path: &Path) -> Option<(u32, String, Direction)> {
    let file_name = path.file_name()?.to_str()?;
    let (stem, direction) = if let Some(stem) = file_name.strip_suffix(".up.sql") {
        (stem, Direction::Up)
    } else if let Some(stem) = file_name.strip_suffix(".down.sql") {
        (stem, Direction::Down)
    } else {
        return None;
    };

    let (seq, name) = stem.split_once('_')?;
    let seq = seq.parse::<u32>().ok()?;
    Some((seq, name.to_string(), direction))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(seq: u32, name: &str) -> Revision {
        Revision {
            seq,
            name: name.to_string(),
            up_sql: format!("-- up {}", seq),
            down_sql: format!("-- down {}", seq),
        }
    }

    #[test]
    fn test_pending_requires_prefix() {
        let chain =
            MigrationChain::from_revisions(vec![rev(1, "a"), rev(2, "b"), rev(3, "c")]).unwrap();

        let pending = chain.pending(&[1], None).unwrap();
        assert_eq!(pending.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![2, 3]);

        // A gap in the applied set is a branched history
        assert!(chain.pending(&[2], None).is_err());
    }

    #[test]
    fn test_reversal_is_reverse_chain_order() {
        let chain =
            MigrationChain::from_revisions(vec![rev(1, "a"), rev(2, "b"), rev(3, "c")]).unwrap();

        let plan = chain.reversal(&[1, 2, 3], Some(1)).unwrap();
        assert_eq!(plan.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[test]
    fn test_filename_parsing() {
        let parsed = parse_filename(Path::new("0002_add_notes.up.sql"));
        assert!(matches!(parsed, Some((2, ref name, Direction::Up)) if name == "add_notes"));
        assert!(parse_filename(Path::new("README.md")).is_none());
    }
}
