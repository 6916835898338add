use ndarray::ArrayView1;

/// Per-feature split candidates. A value falls in bin `b` when exactly `b` edges are below it,
/// so "bin <= b" and "value <= edges[b]" select the same rows.
#[derive(Debug, Clone)]
pub(crate) struct BinMapper {
    edges: Vec<f64>,
}

impl BinMapper {
    /// Edges are midpoints between adjacent distinct values, thinned to quantiles when a
    /// column holds more distinct values than `max_bins`.
    pub(crate) fn fit(column: ArrayView1<'_, f64>, max_bins: usize) -> Self {
        let mut distinct: Vec<f64> = column.iter().copied().collect();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        let edges = if distinct.len() <= max_bins {
            distinct
                .windows(2)
                .map(|pair| midpoint(pair[0], pair[1]))
                .collect()
        } else {
            let mut edges: Vec<f64> = (1..max_bins)
                .map(|k| {
                    let idx = k * distinct.len() / max_bins;
                    midpoint(distinct[idx - 1], distinct[idx])
                })
                .collect();
            edges.dedup();
            edges
        };
        Self { edges }
    }

    pub(crate) fn bin(&self, value: f64) -> u16 {
        let idx = self.edges.partition_point(|edge| *edge < value);
        u16::try_from(idx).unwrap_or(u16::MAX)
    }

    /// Number of bins, one more than the edge count.
    pub(crate) fn n_bins(&self) -> usize {
        self.edges.len() + 1
    }

    /// Threshold that separates bins `0..=bin` from the rest.
    pub(crate) fn threshold(&self, bin: usize) -> f64 {
        self.edges[bin]
    }
}

fn midpoint(low: f64, high: f64) -> f64 {
    low + (high - low) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn edges_sit_between_distinct_values() {
        let column = array![3.0, 1.0, 2.0, 2.0, 1.0];
        let mapper = BinMapper::fit(column.view(), 256);
        assert_eq!(mapper.n_bins(), 3);
        assert_eq!(mapper.threshold(0), 1.5);
        assert_eq!(mapper.bin(1.0), 0);
        assert_eq!(mapper.bin(2.0), 1);
        assert_eq!(mapper.bin(3.0), 2);
        assert_eq!(mapper.bin(99.0), 2);
    }

    #[test]
    fn bin_agrees_with_threshold_comparison() {
        let column = ndarray::Array1::from_iter((0..1000).map(|v| f64::from(v) * 0.37));
        let mapper = BinMapper::fit(column.view(), 16);
        assert!(mapper.n_bins() <= 16);
        for &value in &column {
            let bin = usize::from(mapper.bin(value));
            for split in 0..mapper.n_bins() - 1 {
                assert_eq!(bin <= split, value <= mapper.threshold(split));
            }
        }
    }

    #[test]
    fn constant_column_has_single_bin() {
        let column = array![4.0, 4.0, 4.0];
        let mapper = BinMapper::fit(column.view(), 256);
        assert_eq!(mapper.n_bins(), 1);
    }
}
