// ========================================================================================
//                         Participant selection against a roster
// ========================================================================================

use crate::types::ParticipantSubset;
use ahash::{AHashMap, AHashSet};
use thiserror::Error;

/// The number of offending IDs quoted in an error message.
const MISSING_ID_PREVIEW: usize = 5;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Both a keep list and a remove list were supplied for the same panel; supply at most one.")]
    Contradictory,

    #[error("{0}")]
    InconsistentKeepId(String),

    #[error("The panel roster contains the participant ID '{0}' more than once.")]
    DuplicateRosterId(String),
}

/// Keep/remove participant filters for one panel. At most one may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantFilter {
    pub keep: Option<Vec<String>>,
    pub remove: Option<Vec<String>>,
}

impl ParticipantFilter {
    pub fn keep(ids: Vec<String>) -> Self {
        Self {
            keep: Some(ids),
            remove: None,
        }
    }

    pub fn remove(ids: Vec<String>) -> Self {
        Self {
            keep: None,
            remove: Some(ids),
        }
    }

    pub fn is_unfiltered(&self) -> bool {
        self.keep.is_none() && self.remove.is_none()
    }
}

fn format_missing_ids_error(mut missing_ids: Vec<String>) -> String {
    missing_ids.sort_unstable();
    let preview: Vec<&str> = missing_ids
        .iter()
        .take(MISSING_ID_PREVIEW)
        .map(String::as_str)
        .collect();
    let more = missing_ids.len().saturating_sub(preview.len());
    let mut message = format!(
        "{} participant ID(s) from the keep list were not found in the panel roster: {}",
        missing_ids.len(),
        preview.join(", ")
    );
    if more > 0 {
        message.push_str(&format!(" (and {more} more)"));
    }
    message
}

/// Resolves a keep or remove list against `roster` into a sorted index subset.
///
/// Keep IDs that are absent from the roster are an error; remove IDs that are absent
/// are ignored with a warning. The resulting subset may be empty.
pub fn resolve_participants(
    roster: &[String],
    filter: &ParticipantFilter,
) -> Result<ParticipantSubset, SelectionError> {
    let mut id_to_index: AHashMap<&str, usize> = AHashMap::with_capacity(roster.len());
    for (idx, id) in roster.iter().enumerate() {
        if id_to_index.insert(id.as_str(), idx).is_some() {
            return Err(SelectionError::DuplicateRosterId(id.clone()));
        }
    }

    match (&filter.keep, &filter.remove) {
        (Some(_), Some(_)) => Err(SelectionError::Contradictory),
        (None, None) => Ok(ParticipantSubset::All),
        (Some(keep), None) => {
            let wanted: AHashSet<&str> = keep
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect();
            let mut found = Vec::with_capacity(wanted.len());
            let mut missing_ids = Vec::new();
            for iid in wanted {
                match id_to_index.get(iid) {
                    Some(&idx) => found.push(idx),
                    None => missing_ids.push(iid.to_string()),
                }
            }
            if !missing_ids.is_empty() {
                return Err(SelectionError::InconsistentKeepId(format_missing_ids_error(
                    missing_ids,
                )));
            }
            found.sort_unstable();
            log::info!(
                "> Keeping {} of {} participants.",
                found.len(),
                roster.len()
            );
            Ok(ParticipantSubset::Indices(found))
        }
        (None, Some(remove)) => {
            let unwanted: AHashSet<&str> = remove.iter().map(|s| s.trim()).collect();
            let unknown = unwanted
                .iter()
                .filter(|id| !id.is_empty() && !id_to_index.contains_key(*id))
                .count();
            if unknown > 0 {
                log::warn!("{unknown} participant ID(s) in the remove list are not on the panel roster.");
            }
            let kept: Vec<usize> = roster
                .iter()
                .enumerate()
                .filter(|(_, id)| !unwanted.contains(id.as_str()))
                .map(|(idx, _)| idx)
                .collect();
            log::info!(
                "> Removing {} of {} participants.",
                roster.len() - kept.len(),
                roster.len()
            );
            Ok(ParticipantSubset::Indices(kept))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Vec<String> {
        ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect()
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_filter_selects_everyone() {
        let subset = resolve_participants(&roster(), &ParticipantFilter::default()).unwrap();
        assert_eq!(subset, ParticipantSubset::All);
    }

    #[test]
    fn keep_list_resolves_to_sorted_indices() {
        let filter = ParticipantFilter::keep(ids(&["d", "b"]));
        let subset = resolve_participants(&roster(), &filter).unwrap();
        assert_eq!(subset, ParticipantSubset::Indices(vec![1, 3]));
    }

    #[test]
    fn keep_list_with_unknown_ids_is_rejected() {
        let filter = ParticipantFilter::keep(ids(&["a", "zz"]));
        let err = resolve_participants(&roster(), &filter).unwrap_err();
        assert!(err.to_string().contains("zz"));
    }

    #[test]
    fn remove_list_tolerates_unknown_ids() {
        let filter = ParticipantFilter::remove(ids(&["c", "zz"]));
        let subset = resolve_participants(&roster(), &filter).unwrap();
        assert_eq!(subset, ParticipantSubset::Indices(vec![0, 1, 3]));
    }

    #[test]
    fn keep_and_remove_together_are_contradictory() {
        let filter = ParticipantFilter {
            keep: Some(ids(&["a"])),
            remove: Some(ids(&["b"])),
        };
        assert!(matches!(
            resolve_participants(&roster(), &filter),
            Err(SelectionError::Contradictory)
        ));
    }

    #[test]
    fn duplicate_roster_ids_are_rejected() {
        let roster = ids(&["a", "a"]);
        assert!(matches!(
            resolve_participants(&roster, &ParticipantFilter::default()),
            Err(SelectionError::DuplicateRosterId(_))
        ));
    }
}
