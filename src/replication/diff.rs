//! Line Edit Scripts
//!
//! Computes an edit script between two sequences from an edit-distance table
//! and applies such a script to a mutable sequence.
//!
//! Element 0 of both sequences is treated as a fixed anchor and is never
//! edited, deleted or inserted before. Callers prepend a sentinel (see
//! [`SENTINEL`]) so that every real line sits at index 1 or later.

use serde::{Deserialize, Serialize};

/// Anchor line prepended to both sides of a text diff.
pub const SENTINEL: &str = "";

/// One operation of an edit script.
///
/// Indices refer to the sequence as already modified by the preceding
/// operations of the same script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EditOperation<T> {
    /// Overwrite the element at `index`.
    Edit { index: usize, value: T },
    /// Insert `value` before `index`.
    Insert { index: usize, value: T },
    /// Remove the element at `index`.
    Delete { index: usize },
}

impl<T> EditOperation<T> {
    pub fn index(&self) -> usize {
        match self {
            EditOperation::Edit { index, .. }
            | EditOperation::Insert { index, .. }
            | EditOperation::Delete { index } => *index,
        }
    }
}

/// Ordered list of operations, applied front to back.
pub type EditScript<T> = Vec<EditOperation<T>>;

/// Errors raised while applying a script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error("operation {position} targets index {index} but the sequence has {len} elements")]
    IndexOutOfRange {
        position: usize,
        index: usize,
        len: usize,
    },
}

/// Row-major edit-distance table.
struct DistanceTable {
    cells: Vec<usize>,
    width: usize,
}

impl DistanceTable {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            cells: vec![0; rows * cols],
            width: cols,
        }
    }

    fn get(&self, i: usize, j: usize) -> usize {
        self.cells[i * self.width + j]
    }

    fn set(&mut self, i: usize, j: usize, value: usize) {
        self.cells[i * self.width + j] = value;
    }
}

/// Compute the script that turns `source` into `target`.
///
/// The result is ordered back to front in source coordinates, so applying it
/// in order never shifts an index that a later operation relies on. Either
/// input being empty yields an empty script.
pub fn distance<T: PartialEq + Clone>(source: &[T], target: &[T]) -> EditScript<T> {
    if source.is_empty() || target.is_empty() {
        return Vec::new();
    }

    let rows = source.len();
    let cols = target.len();
    let mut d = DistanceTable::new(rows, cols);

    for i in 0..rows {
        d.set(i, 0, i);
    }
    for j in 0..cols {
        d.set(0, j, j);
    }

    for j in 1..cols {
        for i in 1..rows {
            let substitution = usize::from(source[i] != target[j]);
            let up = d.get(i - 1, j);
            let left = d.get(i, j - 1);
            let diag = d.get(i - 1, j - 1) + substitution;

            let cost = if up < left && up + 1 < diag {
                up + 1
            } else if left < up && left + 1 < diag {
                left + 1
            } else {
                diag
            };
            d.set(i, j, cost);
        }
    }

    backtrack(&d, source, target)
}

fn backtrack<T: PartialEq + Clone>(d: &DistanceTable, source: &[T], target: &[T]) -> EditScript<T> {
    let mut script = Vec::new();
    let mut i = source.len() - 1;
    let mut j = target.len() - 1;

    while i > 0 || j > 0 {
        if i > 0 && j > 0 {
            let diag = d.get(i - 1, j - 1);
            let up = d.get(i - 1, j);
            let left = d.get(i, j - 1);

            if diag <= left && diag <= up {
                if source[i] != target[j] {
                    script.push(EditOperation::Edit {
                        index: i,
                        value: target[j].clone(),
                    });
                }
                i -= 1;
                j -= 1;
            } else if up <= left && up < diag {
                script.push(EditOperation::Delete { index: i });
                i -= 1;
            } else {
                script.push(EditOperation::Insert {
                    index: i + 1,
                    value: target[j].clone(),
                });
                j -= 1;
            }
        } else if i > 0 {
            script.push(EditOperation::Delete { index: i });
            i -= 1;
        } else {
            script.push(EditOperation::Insert {
                index: 1,
                value: target[j].clone(),
            });
            j -= 1;
        }
    }

    script
}

/// Apply `script` to `sequence` in order.
///
/// Every index is checked against the sequence as it evolves. On error the
/// sequence may already hold the effect of earlier operations; apply to a
/// copy when that matters.
pub fn apply_edits<T: Clone>(sequence: &mut Vec<T>, script: &[EditOperation<T>]) -> Result<(), DiffError> {
    for (position, op) in script.iter().enumerate() {
        let len = sequence.len();
        let out_of_range = DiffError::IndexOutOfRange {
            position,
            index: op.index(),
            len,
        };
        match op {
            EditOperation::Edit { index, value } => {
                let slot = sequence.get_mut(*index).ok_or(out_of_range)?;
                *slot = value.clone();
            }
            EditOperation::Insert { index, value } => {
                if *index > len {
                    return Err(out_of_range);
                }
                sequence.insert(*index, value.clone());
            }
            EditOperation::Delete { index } => {
                if *index >= len {
                    return Err(out_of_range);
                }
                sequence.remove(*index);
            }
        }
    }
    Ok(())
}

/// Split text into lines on `\n`. Always yields at least one line.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_string).collect()
}

/// Inverse of [`split_lines`].
pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}

/// Lines of `text` with the sentinel anchor in front.
pub fn anchored_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::with_capacity(text.len() / 32 + 2);
    lines.push(SENTINEL.to_string());
    lines.extend(split_lines(text));
    lines
}

/// Inverse of [`anchored_lines`]: drop the anchor and join.
pub fn unanchor_lines(lines: &[String]) -> String {
    join_lines(lines.get(1..).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn round_trip(source: &[&str], target: &[&str]) -> EditScript<String> {
        let source = lines(source);
        let target = lines(target);
        let script = distance(&source, &target);
        let mut patched = source.clone();
        apply_edits(&mut patched, &script).unwrap();
        assert_eq!(patched, target, "script {:?}", script);
        script
    }

    #[test]
    fn test_identical_sequences_produce_empty_script() {
        let s = lines(&["", "a", "b", "a", "b"]);
        assert!(distance(&s, &s).is_empty());
    }

    #[test]
    fn test_insert_in_the_middle() {
        let script = round_trip(&["a", "b", "c"], &["a", "x", "b", "c"]);
        assert_eq!(
            script,
            vec![EditOperation::Insert {
                index: 1,
                value: "x".to_string()
            }]
        );
    }

    #[test]
    fn test_append_and_truncate() {
        round_trip(&["", "a"], &["", "a", "b", "c"]);
        round_trip(&["", "a", "b", "c"], &["", "a"]);
    }

    #[test]
    fn test_single_substitution_is_an_edit() {
        let script = round_trip(&["", "a", "b", "c"], &["", "a", "B", "c"]);
        assert_eq!(
            script,
            vec![EditOperation::Edit {
                index: 2,
                value: "B".to_string()
            }]
        );
    }

    #[test]
    fn test_delete_in_the_middle() {
        let script = round_trip(&["", "a", "b", "c"], &["", "a", "c"]);
        assert_eq!(script, vec![EditOperation::Delete { index: 2 }]);
    }

    #[test]
    fn test_mixed_changes_round_trip() {
        round_trip(
            &["", "fn main() {", "  let x = 1;", "  println!(x);", "}"],
            &["", "// entry", "fn main() {", "  let y = 2;", "}", ""],
        );
        round_trip(&["", "a", "b", "c", "d", "e"], &["", "e", "d", "c", "b", "a"]);
        round_trip(&["", "x", "x", "x"], &["", "y"]);
        round_trip(&["", "y"], &["", "x", "x", "x"]);
    }

    #[test]
    fn test_only_anchor_on_either_side() {
        round_trip(&[""], &["", "a", "b"]);
        round_trip(&["", "a", "b"], &[""]);
        assert!(distance(&lines(&[""]), &lines(&[""])).is_empty());
    }

    #[test]
    fn test_empty_inputs_yield_empty_script() {
        let empty: Vec<String> = Vec::new();
        assert!(distance(&empty, &lines(&["a"])).is_empty());
        assert!(distance(&lines(&["a"]), &empty).is_empty());
    }

    #[test]
    fn test_anchor_is_never_touched() {
        let script = distance(&lines(&["", "a", "b"]), &lines(&["", "c"]));
        assert!(script.iter().all(|op| op.index() >= 1));
    }

    #[test]
    fn test_works_for_non_string_elements() {
        let source = vec![0, 1, 2, 3, 4];
        let target = vec![0, 2, 3, 9, 4, 5];
        let script = distance(&source, &target);
        let mut patched = source.clone();
        apply_edits(&mut patched, &script).unwrap();
        assert_eq!(patched, target);
    }

    #[test]
    fn test_apply_rejects_out_of_range_ops() {
        let mut seq = lines(&["", "a"]);
        let err = apply_edits(&mut seq, &[EditOperation::Delete { index: 5 }]).unwrap_err();
        assert_eq!(
            err,
            DiffError::IndexOutOfRange {
                position: 0,
                index: 5,
                len: 2
            }
        );

        let err = apply_edits(
            &mut seq,
            &[EditOperation::Insert {
                index: 3,
                value: "z".to_string(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DiffError::IndexOutOfRange { index: 3, .. }));

        let err = apply_edits(
            &mut seq,
            &[EditOperation::Edit {
                index: 2,
                value: "z".to_string(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DiffError::IndexOutOfRange { index: 2, .. }));
    }

    #[test]
    fn test_insert_at_end_is_allowed() {
        let mut seq = lines(&["", "a"]);
        apply_edits(
            &mut seq,
            &[EditOperation::Insert {
                index: 2,
                value: "b".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(seq, lines(&["", "a", "b"]));
    }

    #[test]
    fn test_script_json_shape() {
        let op: EditOperation<String> = EditOperation::Insert {
            index: 3,
            value: "x".to_string(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "insert");
        assert_eq!(json["index"], 3);
        assert_eq!(json["value"], "x");

        let delete: EditOperation<String> = serde_json::from_str(r#"{"kind":"delete","index":2}"#).unwrap();
        assert_eq!(delete, EditOperation::Delete { index: 2 });
    }

    #[test]
    fn test_anchored_lines_round_trip_text() {
        for text in ["", "one", "one\ntwo", "trailing\n", "\n\n"] {
            let anchored = anchored_lines(text);
            assert_eq!(anchored[0], SENTINEL);
            assert_eq!(unanchor_lines(&anchored), text);
        }
    }

    #[test]
    fn test_text_diff_through_anchor() {
        let before = anchored_lines("alpha\nbeta");
        let after = anchored_lines("gamma\nalpha\nbeta\ndelta");
        let script = distance(&before, &after);
        let mut patched = before.clone();
        apply_edits(&mut patched, &script).unwrap();
        assert_eq!(unanchor_lines(&patched), "gamma\nalpha\nbeta\ndelta");
    }
}
