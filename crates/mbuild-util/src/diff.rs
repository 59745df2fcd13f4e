//! Whitespace-insensitive line comparison of tool output against a reference.

use std::fmt;

/// One differing line pair. Line numbers are 1-based in the input texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub actual_line: Option<usize>,
    pub actual: Option<String>,
    pub expected_line: Option<usize>,
    pub expected: Option<String>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.expected, &self.actual) {
            (Some(e), Some(a)) => write!(f, "-{e}\n+{a}"),
            (Some(e), None) => write!(f, "-{e}"),
            (None, Some(a)) => write!(f, "+{a}"),
            (None, None) => Ok(()),
        }
    }
}

/// Maximum number of mismatches collected by [`compare_normalized`].
pub const MAX_MISMATCHES: usize = 20;

/// Compare two texts line by line after normalization.
///
/// Whitespace runs collapse to one space, blank lines are dropped, and lines
/// containing any of the `ignore` markers are dropped from both sides. The
/// remaining lines are aligned on their longest common subsequence, so one
/// inserted or deleted line is reported once instead of shifting every line
/// after it. Within a run of unmatched lines, expected and actual lines are
/// paired in order; leftovers are reported alone. Returns up to
/// [`MAX_MISMATCHES`] entries; an empty result means equal.
pub fn compare_normalized(actual: &str, expected: &str, ignore: &[&str]) -> Vec<Mismatch> {
    let left = normalize(actual, ignore);
    let right = normalize(expected, ignore);
    let table = lcs_table(&left, &right);

    let mut mismatches = Vec::new();
    let mut hunk = Hunk::default();
    let (mut i, mut j) = (0, 0);
    while let (Some(a), Some(e)) = (left.get(i), right.get(j)) {
        if a.1 == e.1 {
            hunk.flush(&mut mismatches);
            i += 1;
            j += 1;
        } else if lcs_at(&table, i + 1, j) >= lcs_at(&table, i, j + 1) {
            hunk.added.push(a);
            i += 1;
        } else {
            hunk.removed.push(e);
            j += 1;
        }
    }
    hunk.added.extend(left.get(i..).unwrap_or_default());
    hunk.removed.extend(right.get(j..).unwrap_or_default());
    hunk.flush(&mut mismatches);

    mismatches.truncate(MAX_MISMATCHES);
    mismatches
}

type NumberedLine = (usize, String);

/// Consecutive unmatched lines between two matches.
#[derive(Default)]
struct Hunk<'a> {
    added: Vec<&'a NumberedLine>,
    removed: Vec<&'a NumberedLine>,
}

impl Hunk<'_> {
    fn flush(&mut self, out: &mut Vec<Mismatch>) {
        let len = self.added.len().max(self.removed.len());
        for k in 0..len {
            let a = self.added.get(k);
            let e = self.removed.get(k);
            out.push(Mismatch {
                actual_line: a.map(|(n, _)| *n),
                actual: a.map(|(_, l)| l.clone()),
                expected_line: e.map(|(n, _)| *n),
                expected: e.map(|(_, l)| l.clone()),
            });
        }
        self.added.clear();
        self.removed.clear();
    }
}

/// `table[i][j]` is the LCS length of `left[i..]` and `right[j..]`.
fn lcs_table(left: &[NumberedLine], right: &[NumberedLine]) -> Vec<Vec<usize>> {
    let width = right.len() + 1;
    let mut rows: Vec<Vec<usize>> = vec![vec![0; width]];
    for (_, a) in left.iter().rev() {
        let mut row = vec![0; width];
        if let Some(below) = rows.last() {
            for (j, (_, e)) in right.iter().enumerate().rev() {
                let value = if a == e {
                    below.get(j + 1).map_or(1, |v| v + 1)
                } else {
                    let down = below.get(j).copied().unwrap_or(0);
                    let across = row.get(j + 1).copied().unwrap_or(0);
                    down.max(across)
                };
                if let Some(slot) = row.get_mut(j) {
                    *slot = value;
                }
            }
        }
        rows.push(row);
    }
    rows.reverse();
    rows
}

fn lcs_at(table: &[Vec<usize>], i: usize, j: usize) -> usize {
    table.get(i).and_then(|row| row.get(j)).copied().unwrap_or(0)
}

fn normalize(text: &str, ignore: &[&str]) -> Vec<NumberedLine> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !ignore.iter().any(|marker| line.contains(marker)))
        .map(|(i, line)| (i + 1, line.split_whitespace().collect::<Vec<_>>().join(" ")))
        .filter(|(_, line)| !line.is_empty())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DISASM: &str = "\

test.o:     file format elf32-k1

Disassembly of section .text:

00000000 <_start>:
   0:\t00 00 00 7f \tnop;;
";

    #[test]
    fn whitespace_and_blank_lines_are_ignored() {
        let reference = "Disassembly of section .text:\n00000000 <_start>:\n 0: 00 00 00 7f nop;;\n";
        let mismatches = compare_normalized(DISASM, reference, &["test.o: "]);
        assert!(mismatches.is_empty(), "mismatches: {mismatches:?}");
    }

    #[test]
    fn ignore_marker_drops_lines() {
        let mismatches = compare_normalized("a.o: format x\nnop\n", "b.o: format y\nnop\n", &["format"]);
        assert!(mismatches.is_empty());
    }

    #[test]
    fn changed_line_reported_with_line_numbers() {
        let mismatches = compare_normalized("nop\nadd r0 = r1\n", "nop\nadd r0 = r2\n", &[]);
        assert_eq!(mismatches.len(), 1);
        let m = mismatches.first().unwrap();
        assert_eq!(m.actual_line, Some(2));
        assert_eq!(m.to_string(), "-add r0 = r2\n+add r0 = r1");
    }

    #[test]
    fn extra_trailing_line_reported() {
        let mismatches = compare_normalized("nop\nnop\n", "nop\n", &[]);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches.first().unwrap().expected, None);
    }

    #[test]
    fn inserted_line_does_not_shift_the_rest() {
        let expected = "nop\nadd r0 = r1\nsub r2 = r3\nret\n";
        let actual = "nop\nmake r9 = 0\nadd r0 = r1\nsub r2 = r3\nret\n";
        let mismatches = compare_normalized(actual, expected, &[]);
        assert_eq!(mismatches.len(), 1, "mismatches: {mismatches:?}");
        let m = mismatches.first().unwrap();
        assert_eq!(m.actual_line, Some(2));
        assert_eq!(m.expected, None);
        assert_eq!(m.to_string(), "+make r9 = 0");
    }

    #[test]
    fn deleted_line_reported_once() {
        let expected = "nop\nadd r0 = r1\nret\n";
        let actual = "nop\nret\n";
        let mismatches = compare_normalized(actual, expected, &[]);
        assert_eq!(mismatches.len(), 1);
        let m = mismatches.first().unwrap();
        assert_eq!(m.expected_line, Some(2));
        assert_eq!(m.actual, None);
    }

    #[test]
    fn mismatches_are_capped() {
        let actual = "x\n".repeat(100);
        let expected = "y\n".repeat(100);
        assert_eq!(compare_normalized(&actual, &expected, &[]).len(), MAX_MISMATCHES);
    }
}
