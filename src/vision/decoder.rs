//! Greedy best-path decoding of recognizer output
//!
//! Each time step is decided independently by arg-max. A class is emitted only
//! when it differs from the last emitted class and exists in the label table;
//! out-of-range classes (the blank slot of CTC-style models) are dropped.

use ndarray::{ArrayView1, ArrayView2};
use std::fmt;

use super::labels::LabelTable;

/// Final recognition result
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedText {
    pub text: String,
    /// No glyph was retained
    pub empty: bool,
}

impl DecodedText {
    pub fn new(text: String) -> Self {
        let empty = text.is_empty();
        Self { text, empty }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

impl fmt::Display for DecodedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Decode `[seq_len x num_classes]` scores
pub fn decode(scores: ArrayView2<'_, f32>, labels: &LabelTable) -> DecodedText {
    let mut text = String::new();
    let mut last_appended: Option<usize> = None;

    for step in scores.rows() {
        let Some(class) = argmax(step) else {
            continue;
        };
        if last_appended == Some(class) {
            continue;
        }
        if let Some(label) = labels.get(class) {
            text.push_str(label);
            last_appended = Some(class);
        }
    }

    DecodedText::new(text)
}

/// Index of the highest score; the first one wins ties and NaN never wins
fn argmax(scores: ArrayView1<'_, f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((index, score)),
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    fn labels(glyphs: &[&str]) -> LabelTable {
        LabelTable::new(glyphs.iter().map(|g| g.to_string()).collect())
    }

    /// One-hot scores for a class sequence
    fn one_hot(classes: &[usize], num_classes: usize) -> Array2<f32> {
        let mut scores = Array2::<f32>::zeros((classes.len(), num_classes));
        for (step, &class) in classes.iter().enumerate() {
            scores[[step, class]] = 1.0;
        }
        scores
    }

    #[test]
    fn test_five_step_sequence() {
        let scores = arr2(&[
            [0.9, 0.1, 0.0, 0.0],
            [0.9, 0.1, 0.0, 0.0],
            [0.1, 0.8, 0.1, 0.0],
            [0.1, 0.8, 0.1, 0.0],
            [0.0, 0.0, 0.0, 0.99],
        ]);
        // Class 3 is the conventional blank and has no label
        let decoded = decode(scores.view(), &labels(&["A", "B", "C"]));

        assert_eq!(decoded.text, "AB");
        assert!(!decoded.empty);
    }

    #[test]
    fn test_runs_collapse_to_one_glyph() {
        let table = labels(&["x", "y"]);
        for k in 1..6 {
            let mut classes = vec![0; k];
            classes.extend(vec![1; k]);
            let decoded = decode(one_hot(&classes, 2).view(), &table);
            assert_eq!(decoded.text, "xy", "run length {}", k);
        }
    }

    #[test]
    fn test_non_adjacent_repeats_are_kept() {
        let decoded = decode(one_hot(&[0, 1, 0], 2).view(), &labels(&["a", "b"]));
        assert_eq!(decoded.text, "aba");
    }

    #[test]
    fn test_dropped_class_does_not_separate_repeats() {
        // a <blank> a: the blank is never appended, so the second a repeats the last appended class
        let decoded = decode(one_hot(&[0, 2, 0], 3).view(), &labels(&["a", "b"]));
        assert_eq!(decoded.text, "a");
    }

    #[test]
    fn test_decoding_is_a_fixed_point_without_repeats() {
        let table = labels(&["h", "e", "l", "o"]);
        let classes = [0, 1, 2, 3];
        let first = decode(one_hot(&classes, 4).view(), &table);
        assert_eq!(first.text, "helo");

        let reencoded: Vec<usize> = first
            .text
            .chars()
            .map(|c| (0..table.len()).find(|&i| table.get(i) == Some(&c.to_string()[..])).unwrap())
            .collect();
        let second = decode(one_hot(&reencoded, 4).view(), &table);
        assert_eq!(second, first);
    }

    #[test]
    fn test_all_blank_is_empty() {
        let decoded = decode(one_hot(&[5, 5, 5], 6).view(), &labels(&["a"]));
        assert!(decoded.is_empty());
        assert_eq!(decoded.text, "");
    }

    #[test]
    fn test_argmax_ties_and_nan() {
        assert_eq!(argmax(arr2(&[[0.5, 0.5, 0.1]]).row(0)), Some(0));
        assert_eq!(argmax(arr2(&[[f32::NAN, 0.2, 0.3]]).row(0)), Some(2));
        assert_eq!(argmax(Array2::<f32>::zeros((1, 0)).row(0)), None);
    }
}
