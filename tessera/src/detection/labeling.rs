//! Connected component labeling of binary masks.
//!
//! Rows are encoded as runs of foreground pixels; runs touching runs of the
//! previous row (diagonals included) are merged with a union-find. Labels are
//! numbered 1..=n in raster order of each component's first pixel.

use common::Buffer2;

/// A horizontal run of foreground pixels.
#[derive(Debug, Clone, Copy)]
struct Run {
    start: u32, // inclusive
    end: u32,   // exclusive
    label: u32,
}

/// 8-connectivity: runs on adjacent rows touch when they overlap or meet diagonally.
#[inline]
fn runs_connected(prev: &Run, curr: &Run) -> bool {
    prev.start < curr.end + 1 && prev.end + 1 > curr.start
}

fn extract_runs(row: &[u8], runs: &mut Vec<Run>) {
    let mut start = None;
    for (x, &value) in row.iter().enumerate() {
        match (value != 0, start) {
            (true, None) => start = Some(x as u32),
            (false, Some(s)) => {
                runs.push(Run {
                    start: s,
                    end: x as u32,
                    label: 0,
                });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push(Run {
            start: s,
            end: row.len() as u32,
            label: 0,
        });
    }
}

struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: Vec::with_capacity(256),
        }
    }

    fn make_set(&mut self) -> u32 {
        let label = self.parent.len() as u32 + 1;
        self.parent.push(label);
        label
    }

    fn find(&mut self, label: u32) -> u32 {
        let mut root = label;
        while self.parent[(root - 1) as usize] != root {
            root = self.parent[(root - 1) as usize];
        }

        let mut current = label;
        while current != root {
            let next = self.parent[(current - 1) as usize];
            self.parent[(current - 1) as usize] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: u32, b: u32) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            let (smaller, larger) = if root_a < root_b {
                (root_a, root_b)
            } else {
                (root_b, root_a)
            };
            self.parent[(larger - 1) as usize] = smaller;
        }
    }

    /// Maps every provisional label to a sequential final label.
    fn final_labels(&mut self) -> (Vec<u32>, usize) {
        let len = self.parent.len();
        let mut map = vec![0u32; len + 1];
        let mut count = 0u32;
        for label in 1..=len as u32 {
            let root = self.find(label);
            if map[root as usize] == 0 {
                count += 1;
                map[root as usize] = count;
            }
            map[label as usize] = map[root as usize];
        }
        (map, count as usize)
    }
}

fn merge_with_prev(curr: &mut [Run], prev: &[Run], uf: &mut UnionFind) {
    let mut prev_idx = 0;
    for run in curr.iter_mut() {
        let search_start = run.start.saturating_sub(1);
        let search_end = run.end + 1;

        while prev_idx < prev.len() && prev[prev_idx].end <= search_start {
            prev_idx += 1;
        }

        let mut assigned = None;
        let mut i = prev_idx;
        while i < prev.len() && prev[i].start < search_end {
            if runs_connected(&prev[i], run) {
                match assigned {
                    Some(label) if label != prev[i].label => uf.union(label, prev[i].label),
                    None => assigned = Some(prev[i].label),
                    _ => {}
                }
            }
            i += 1;
        }

        run.label = assigned.unwrap_or_else(|| uf.make_set());
    }
}

/// Label image of a binary mask. Background is 0.
#[derive(Debug)]
pub struct LabelMap {
    labels: Buffer2<u32>,
    count: usize,
}

impl LabelMap {
    /// Labels the nonzero pixels of `mask` with 8-connectivity.
    pub fn from_mask(mask: &Buffer2<u8>) -> Self {
        let (width, height) = mask.dimensions();
        let mut labels = Buffer2::new_default(width, height);

        let mut uf = UnionFind::new();
        let mut prev: Vec<Run> = Vec::new();
        let mut curr: Vec<Run> = Vec::new();

        for y in 0..height {
            curr.clear();
            extract_runs(mask.row(y), &mut curr);
            if curr.is_empty() {
                prev.clear();
                continue;
            }

            merge_with_prev(&mut curr, &prev, &mut uf);

            let row = labels.row_mut(y);
            for run in &curr {
                row[run.start as usize..run.end as usize].fill(run.label);
            }
            std::mem::swap(&mut prev, &mut curr);
        }

        let (map, count) = uf.final_labels();
        for label in labels.pixels_mut() {
            *label = map[*label as usize];
        }

        Self { labels, count }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn labels(&self) -> &Buffer2<u32> {
        &self.labels
    }

    /// Mean `(row, column)` of every component, ordered by label.
    pub fn centroids(&self) -> Vec<(f64, f64)> {
        let mut sums = vec![(0.0f64, 0.0f64, 0usize); self.count];
        for y in 0..self.labels.height() {
            for (x, &label) in self.labels.row(y).iter().enumerate() {
                if label > 0 {
                    let entry = &mut sums[(label - 1) as usize];
                    entry.0 += y as f64;
                    entry.1 += x as f64;
                    entry.2 += 1;
                }
            }
        }
        sums.into_iter()
            .map(|(rows, cols, n)| (rows / n as f64, cols / n as f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(rows: &[&str]) -> Buffer2<u8> {
        let width = rows[0].len();
        let pixels = rows
            .iter()
            .flat_map(|r| r.bytes().map(|b| u8::from(b == b'#')))
            .collect();
        Buffer2::new(width, rows.len(), pixels)
    }

    #[test]
    fn empty_mask_has_no_components() {
        let labels = LabelMap::from_mask(&Buffer2::new_default(8, 8));
        assert_eq!(labels.count(), 0);
        assert!(labels.centroids().is_empty());
    }

    #[test]
    fn diagonal_neighbours_are_connected() {
        let labels = LabelMap::from_mask(&mask(&["#...", ".#..", "..#.", "...."]));
        assert_eq!(labels.count(), 1);
        assert_eq!(labels.centroids(), vec![(1.0, 1.0)]);
    }

    #[test]
    fn u_shape_merges_into_one_component() {
        let labels = LabelMap::from_mask(&mask(&["#.#", "#.#", "###"]));
        assert_eq!(labels.count(), 1);
        assert!(labels.labels().pixels().iter().all(|&l| l <= 1));
    }

    #[test]
    fn labels_follow_raster_order() {
        let labels = LabelMap::from_mask(&mask(&["...##", "#....", "#...#"]));
        assert_eq!(labels.count(), 3);
        assert_eq!(*labels.labels().get(3, 0), 1);
        assert_eq!(*labels.labels().get(0, 1), 2);
        assert_eq!(*labels.labels().get(4, 2), 3);
    }

    #[test]
    fn centroid_is_row_then_column() {
        // 2x3 block spanning rows 1..3 and columns 2..5.
        let labels = LabelMap::from_mask(&mask(&["......", "..###.", "..###.", "......"]));
        assert_eq!(labels.centroids(), vec![(1.5, 3.0)]);
    }
}
