//! Match files and durable writes.
//!
//! A match file is a bincode stream: one `FileHeader`, then one
//! `MatchRecord` per match until end of file. Positions are not stored;
//! loading replays the actions from the initial position.
//!
//! Every file goes through `durable_write`: the new content is written to
//! `<name>.tmp`, an existing `<name>` is renamed to `<name>~`, and the
//! temporary file is renamed into place. `<name>` therefore always refers
//! to a complete file.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{end_score, one_hot, EngineError, GameResult, GameRules, Result, StorageError};

use super::record::{Match, MatchEnd, MatchLabels};

/// Current match file version.
pub const FORMAT_VERSION: i32 = 1;

/// First value of every match file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Format version, see `FORMAT_VERSION`.
    pub version: i32,
}

/// Stored form of one match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord<A> {
    /// Ply cap the match was played with.
    pub max_plies: u64,
    /// Actions in play order.
    pub actions: Vec<A>,
    /// One score per position, or empty when never scored.
    pub scores: Vec<f32>,
    /// One entry per action (empty for unlabeled plies), or empty when the
    /// match has no policy labels at all.
    pub policy_labels: Vec<Vec<f32>>,
}

/// Stored form of `m`.
pub fn encode_match<G: GameRules>(m: &Match<G>) -> MatchRecord<G::Action> {
    let labels = m.labels().snapshot();
    let plies = m.actions().len();
    let labeled = labels.policy[..plies].iter().any(Option::is_some);
    let policy_labels = if labeled {
        labels.policy[..plies]
            .iter()
            .map(|p| p.clone().unwrap_or_default())
            .collect()
    } else {
        Vec::new()
    };
    MatchRecord {
        max_plies: m.max_plies as u64,
        actions: m.actions().to_vec(),
        scores: labels.scores,
        policy_labels,
    }
}

/// Rebuild match `id` from its record by replaying the actions.
///
/// A record without policy labels gets one-hot labels of the actions taken.
/// A skip is only accepted where no legal action exists.
pub fn decode_match<G: GameRules>(
    rules: &G,
    id: u64,
    record: MatchRecord<G::Action>,
) -> Result<Match<G>> {
    let MatchRecord {
        max_plies,
        actions,
        scores,
        policy_labels,
    } = record;
    let max_plies = max_plies as usize;
    let skip = rules.skip_action();
    let fill_one_hot = policy_labels.is_empty();
    if !fill_one_hot && policy_labels.len() != actions.len() {
        return Err(EngineError::invariant(format!(
            "match {id}: {} policy labels for {} actions",
            policy_labels.len(),
            actions.len()
        )));
    }

    let mut positions = Vec::with_capacity(actions.len() + 1);
    let mut policy = Vec::with_capacity(actions.len() + 1);
    let mut position = rules.initial_position(max_plies);
    for (ply, action) in actions.iter().enumerate() {
        let legal = rules.legal_actions(&position);
        let label = if *action == skip {
            if !legal.is_empty() {
                return Err(EngineError::invariant(format!(
                    "match {id}: skip at ply {ply} where {} actions are legal",
                    legal.len()
                )));
            }
            None
        } else {
            let index = legal.iter().position(|a| a == action).ok_or_else(|| {
                EngineError::invariant(format!(
                    "match {id}: illegal action {action:?} at ply {ply}"
                ))
            })?;
            if fill_one_hot {
                Some(one_hot(legal.len(), index))
            } else {
                match &policy_labels[ply] {
                    weights if weights.is_empty() => None,
                    weights if weights.len() == legal.len() => Some(weights.clone()),
                    weights => {
                        return Err(EngineError::invariant(format!(
                            "match {id}: {} policy weights for {} actions at ply {ply}",
                            weights.len(),
                            legal.len()
                        )))
                    }
                }
            }
        };
        let next = rules.apply(&position, action);
        positions.push(position);
        policy.push(label);
        position = next;
    }

    let final_score = end_score(rules, &position).unwrap_or(0.0);
    let end = if rules.is_terminal(&position) {
        MatchEnd::Terminal
    } else if rules.ply(&position) >= max_plies {
        MatchEnd::PlyLimit
    } else {
        MatchEnd::Repetition
    };
    let result = rules.result(&position).unwrap_or(GameResult::Draw);
    positions.push(position);
    policy.push(None);

    let scores = if scores.is_empty() {
        let mut zeros = vec![0.0; positions.len()];
        zeros[positions.len() - 1] = final_score;
        zeros
    } else {
        scores
    };
    let labels = MatchLabels { scores, policy };
    Match::from_parts(id, max_plies, false, end, result, positions, actions, labels)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Temporary name used while `path` is written.
#[must_use]
pub fn temporary_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

/// Name the previous version of `path` is kept under.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, "~")
}

/// Write `path` through a temporary file, keeping the old file as backup.
pub fn durable_write(path: &Path, write: impl FnOnce(&mut dyn Write) -> Result<()>) -> Result<()> {
    let tmp = temporary_path(path);
    let file = File::create(&tmp).map_err(|e| StorageError::io("create", &tmp, e))?;
    let mut out = BufWriter::new(file);
    if let Err(err) = write(&mut out) {
        drop(out);
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    let file = out
        .into_inner()
        .map_err(|e| StorageError::io("write", &tmp, e.into_error()))?;
    file.sync_all().map_err(|e| StorageError::io("sync", &tmp, e))?;
    drop(file);

    if path.exists() {
        let backup = backup_path(path);
        fs::rename(path, &backup).map_err(|e| StorageError::io("back up", path, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| StorageError::io("rename into place", &tmp, e))?;
    log::debug!("wrote {}", path.display());
    Ok(())
}

/// Write a header and one record per match.
pub fn write_matches<'a, G: GameRules>(
    out: &mut dyn Write,
    matches: impl IntoIterator<Item = &'a Match<G>>,
) -> std::result::Result<usize, bincode::Error> {
    bincode::serialize_into(&mut *out, &FileHeader { version: FORMAT_VERSION })?;
    let mut count = 0;
    for m in matches {
        bincode::serialize_into(&mut *out, &encode_match(m))?;
        count += 1;
    }
    Ok(count)
}

/// Read every match of a stream written by `write_matches`.
///
/// `path` only names the source in errors. Match ids are record indices.
pub fn read_matches<G: GameRules>(
    rules: &G,
    reader: &mut impl BufRead,
    path: &Path,
) -> Result<Vec<Match<G>>> {
    let header: FileHeader =
        bincode::deserialize_from(&mut *reader).map_err(|source| StorageError::Decode {
            path: path.to_path_buf(),
            record: 0,
            source,
        })?;
    if header.version != FORMAT_VERSION {
        return Err(StorageError::Version {
            path: path.to_path_buf(),
            version: header.version,
        }
        .into());
    }

    let mut matches = Vec::new();
    loop {
        let at_end = reader
            .fill_buf()
            .map_err(|e| StorageError::io("read", path, e))?
            .is_empty();
        if at_end {
            break;
        }
        let index = matches.len();
        let record: MatchRecord<G::Action> =
            bincode::deserialize_from(&mut *reader).map_err(|source| StorageError::Decode {
                path: path.to_path_buf(),
                record: index + 1,
                source,
            })?;
        matches.push(decode_match(rules, index as u64, record)?);
    }
    Ok(matches)
}

/// Save `matches` to `path` durably.
pub fn save_matches<'a, G: GameRules>(
    path: &Path,
    matches: impl IntoIterator<Item = &'a Match<G>>,
) -> Result<()> {
    let mut count = 0;
    durable_write(path, |out| {
        count = write_matches(out, matches).map_err(|source| StorageError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    })?;
    log::info!("saved {count} matches to {}", path.display());
    Ok(())
}

/// Load every match stored in `path`.
pub fn load_matches<G: GameRules>(rules: &G, path: &Path) -> Result<Vec<Match<G>>> {
    let file = File::open(path).map_err(|e| StorageError::io("open", path, e))?;
    let matches = read_matches(rules, &mut BufReader::new(file), path)?;
    log::info!("loaded {} matches from {}", matches.len(), path.display());
    Ok(matches)
}
